//! End-to-end runs of the executor against in-memory trees and handlers.

use async_trait::async_trait;
use expander_core::{
    CandidateCategory, CandidateNode, ExpandError, ExpandOptions, NodeId, RevealHandler,
    TreeAccess,
};
use expander_engine::{EngineError, ExpansionExecutor, HandlerRegistry};
use expander_session::SessionStatus;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tree that hands out a fixed candidate set once, then reports empty.
struct StaticTree {
    pending: Mutex<HashMap<CandidateCategory, Vec<CandidateNode>>>,
}

impl StaticTree {
    fn new(nodes: Vec<CandidateNode>) -> Arc<Self> {
        let mut pending: HashMap<CandidateCategory, Vec<CandidateNode>> = HashMap::new();
        for node in nodes {
            pending.entry(node.category).or_default().push(node);
        }
        Arc::new(Self {
            pending: Mutex::new(pending),
        })
    }
}

#[async_trait]
impl TreeAccess for StaticTree {
    async fn find_candidates(
        &self,
        category: CandidateCategory,
    ) -> expander_core::Result<Vec<CandidateNode>> {
        Ok(self
            .pending
            .lock()
            .unwrap()
            .remove(&category)
            .unwrap_or_default())
    }

    async fn is_visible(&self, _id: &NodeId) -> bool {
        true
    }

    async fn is_settled(&self, _id: &NodeId) -> bool {
        true
    }
}

/// Handler that records processing order and succeeds.
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RevealHandler for Recorder {
    async fn reveal(&self, node: &CandidateNode) -> expander_core::Result<bool> {
        self.seen.lock().unwrap().push(node.id.to_string());
        Ok(true)
    }
}

/// Handler that returns a fixed error on every reveal.
struct AlwaysErr(fn() -> ExpandError);

#[async_trait]
impl RevealHandler for AlwaysErr {
    async fn reveal(&self, _node: &CandidateNode) -> expander_core::Result<bool> {
        Err((self.0)())
    }
}

fn fast_options() -> ExpandOptions {
    ExpandOptions {
        batch_size: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        settle_timeout: Duration::from_millis(100),
        cooldown: Duration::from_millis(40),
        ..ExpandOptions::default()
    }
}

fn nodes(category: CandidateCategory, prefix: &str, n: usize) -> Vec<CandidateNode> {
    (0..n)
        .map(|i| CandidateNode::new(format!("{prefix}-{i}"), category, true))
        .collect()
}

#[tokio::test]
async fn higher_priority_candidates_drain_first() {
    let mut all = nodes(CandidateCategory::ViewRest, "low", 5);
    all.extend(nodes(CandidateCategory::Collapsed, "high", 10));
    let tree = StaticTree::new(all);

    let recorder = Recorder::new();
    let handlers = HandlerRegistry::new()
        .with(CandidateCategory::Collapsed, recorder.clone())
        .with(CandidateCategory::ViewRest, recorder.clone());

    let executor = ExpansionExecutor::new(tree, handlers);
    let stats = executor.run(fast_options()).await.unwrap();

    assert_eq!(stats.status, SessionStatus::Complete);
    assert_eq!(stats.progress.total, 15);
    assert_eq!(stats.progress.successful, 15);

    let seen = recorder.seen();
    assert_eq!(seen.len(), 15);
    assert!(
        seen[..10].iter().all(|id| id.starts_with("high")),
        "all collapsed nodes should process before any view-rest node: {seen:?}"
    );
    assert!(seen[10..].iter().all(|id| id.starts_with("low")));
}

#[tokio::test]
async fn cancellation_burst_triggers_cooldown() {
    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 7));
    let handlers = HandlerRegistry::new().with(
        CandidateCategory::Collapsed,
        Arc::new(AlwaysErr(|| ExpandError::Cancelled)),
    );

    let executor = ExpansionExecutor::new(tree, handlers);
    let stats = executor.run(fast_options()).await.unwrap();

    assert_eq!(stats.status, SessionStatus::Complete);
    assert_eq!(stats.cancelled_outcomes, 7);
    assert_eq!(stats.progress.processed, 7);
    // Cancelled attempts are not failures of the candidates themselves.
    assert_eq!(stats.progress.failed, 0);
    assert!(stats.cooldowns >= 1, "expected at least one cooldown");
}

#[tokio::test]
async fn element_budget_caps_the_run() {
    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 10));
    let recorder = Recorder::new();
    let handlers = HandlerRegistry::new().with(CandidateCategory::Collapsed, recorder.clone());

    let executor = ExpansionExecutor::new(tree, handlers);
    let options = ExpandOptions {
        max_elements: 4,
        ..fast_options()
    };
    let stats = executor.run(options).await.unwrap();

    assert_eq!(stats.status, SessionStatus::Complete);
    assert_eq!(stats.progress.total, 4);
    assert_eq!(stats.progress.processed, 4);
    assert_eq!(recorder.seen().len(), 4);
}

/// Handler that cancels the executor after a set number of reveals.
struct CancelAfter {
    hits: AtomicUsize,
    limit: usize,
    executor: Mutex<Option<ExpansionExecutor>>,
}

#[async_trait]
impl RevealHandler for CancelAfter {
    async fn reveal(&self, _node: &CandidateNode) -> expander_core::Result<bool> {
        let n = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.limit {
            if let Some(executor) = self.executor.lock().unwrap().as_ref() {
                assert!(executor.cancel());
            }
        }
        Ok(true)
    }
}

#[tokio::test]
async fn cancel_stops_at_the_next_item_boundary() {
    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 12));
    let handler = Arc::new(CancelAfter {
        hits: AtomicUsize::new(0),
        limit: 4,
        executor: Mutex::new(None),
    });
    let handlers = HandlerRegistry::new().with(CandidateCategory::Collapsed, handler.clone());

    let executor = ExpansionExecutor::new(tree, handlers);
    *handler.executor.lock().unwrap() = Some(executor.clone());

    let stats = executor.run(fast_options()).await.unwrap();

    assert_eq!(stats.status, SessionStatus::Cancelled);
    assert_eq!(stats.progress.processed, 4);
    assert_eq!(handler.hits.load(Ordering::SeqCst), 4);
    // Nothing left running, so a second cancel is a no-op.
    assert!(!executor.cancel());
}

#[tokio::test]
async fn fatal_error_aborts_and_marks_the_session() {
    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 5));
    let handlers = HandlerRegistry::new().with(
        CandidateCategory::Collapsed,
        Arc::new(AlwaysErr(|| ExpandError::Fatal("tree detached".into()))),
    );

    let executor = ExpansionExecutor::new(tree, handlers);
    let err = executor.run(fast_options()).await.unwrap_err();

    assert!(matches!(err, EngineError::Aborted(ExpandError::Fatal(_))));
    assert_eq!(executor.get_status(), SessionStatus::Error);
    assert!(!executor.get_errors().is_empty());
}

#[tokio::test]
async fn transient_failures_do_not_abort_the_run() {
    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 4));
    let handlers = HandlerRegistry::new().with(
        CandidateCategory::Collapsed,
        Arc::new(AlwaysErr(|| ExpandError::Transient("flaky".into()))),
    );

    let executor = ExpansionExecutor::new(tree, handlers);
    let stats = executor.run(fast_options()).await.unwrap();

    assert_eq!(stats.status, SessionStatus::Complete);
    assert_eq!(stats.progress.failed, 4);
    assert_eq!(stats.progress.successful, 0);
    assert_eq!(stats.error_count, 4);
}

#[tokio::test]
async fn second_run_while_busy_is_rejected() {
    /// Handler slow enough to keep the first run in flight.
    struct Slow;

    #[async_trait]
    impl RevealHandler for Slow {
        async fn reveal(&self, _node: &CandidateNode) -> expander_core::Result<bool> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(true)
        }
    }

    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 6));
    let handlers = HandlerRegistry::new().with(CandidateCategory::Collapsed, Arc::new(Slow));
    let executor = ExpansionExecutor::new(tree, handlers);

    let first = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.run(fast_options()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = executor.run(fast_options()).await;
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));

    let stats = first.await.unwrap().unwrap();
    assert_eq!(stats.status, SessionStatus::Complete);
}

#[tokio::test]
async fn time_budget_completes_the_run_early() {
    struct Slow;

    #[async_trait]
    impl RevealHandler for Slow {
        async fn reveal(&self, _node: &CandidateNode) -> expander_core::Result<bool> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(true)
        }
    }

    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 50));
    let handlers = HandlerRegistry::new().with(CandidateCategory::Collapsed, Arc::new(Slow));
    let executor = ExpansionExecutor::new(tree, handlers);

    let options = ExpandOptions {
        max_time: Duration::from_millis(100),
        ..fast_options()
    };
    let stats = executor.run(options).await.unwrap();

    // The deadline is honored at the next batch boundary, not by aborting
    // the run, so the session still ends cleanly.
    assert_eq!(stats.status, SessionStatus::Complete);
    assert!(
        stats.progress.processed < stats.progress.total,
        "expected an early stop: {}/{} processed",
        stats.progress.processed,
        stats.progress.total
    );
}

#[tokio::test]
async fn pause_holds_progress_until_resume() {
    struct Slow;

    #[async_trait]
    impl RevealHandler for Slow {
        async fn reveal(&self, _node: &CandidateNode) -> expander_core::Result<bool> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(true)
        }
    }

    let tree = StaticTree::new(nodes(CandidateCategory::Collapsed, "n", 20));
    let handlers = HandlerRegistry::new().with(CandidateCategory::Collapsed, Arc::new(Slow));
    let executor = ExpansionExecutor::new(tree, handlers);

    let run = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.run(fast_options()).await })
    };
    tokio::time::sleep(Duration::from_millis(25)).await;

    assert!(executor.pause("manual hold"));
    assert_eq!(executor.get_status(), SessionStatus::Paused);

    // Let any in-flight item drain, then confirm progress has stopped.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let held = executor.get_progress().processed;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.get_progress().processed, held);

    assert!(executor.resume());
    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.status, SessionStatus::Complete);
    assert_eq!(stats.progress.processed, 20);
    // Resume is a no-op once the run is over.
    assert!(!executor.resume());
}
