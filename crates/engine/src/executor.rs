use crate::control::CancelToken;
use crate::limiter::RateLimiter;
use crate::queue::CandidateQueue;
use crate::{EngineError, Result};
use expander_core::{
    CandidateCategory, CandidateNode, ExpandError, ExpandOptions, NodeId, Outcome, RevealHandler,
    TreeAccess,
};
use expander_session::{
    ErrorEntry, EventFilter, Progress, SessionEvent, SessionMetrics, SessionSnapshot,
    SessionState, SessionStatus, SubscriptionId,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Cancellation outcomes inside this window trip the burst guard.
const BURST_WINDOW: Duration = Duration::from_secs(10);
/// How many cancellations within the window trip it.
const BURST_THRESHOLD: usize = 5;
/// Poll interval of the post-reveal settle wait.
const SETTLE_POLL: Duration = Duration::from_millis(25);

/// Per-category reveal operations, registered before a run starts.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CandidateCategory, Arc<dyn RevealHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, category: CandidateCategory, handler: Arc<dyn RevealHandler>) {
        self.handlers.insert(category, handler);
    }

    #[must_use]
    pub fn with(mut self, category: CandidateCategory, handler: Arc<dyn RevealHandler>) -> Self {
        self.insert(category, handler);
        self
    }

    fn get(&self, category: CandidateCategory) -> Option<&Arc<dyn RevealHandler>> {
        self.handlers.get(&category)
    }
}

/// Summary handed back when a run finishes (and on demand via `get_stats`).
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub session_id: String,
    pub status: SessionStatus,
    pub progress: Progress,
    pub metrics: SessionMetrics,
    pub cancelled_outcomes: usize,
    pub cooldowns: u32,
    pub error_count: usize,
}

/// The orchestrating state machine: discovers candidates, drains the queue
/// in bounded batches, and drives the rate limiter and session bookkeeping.
///
/// Cheap to clone; all clones share one run. `run` is single-flight: a
/// second invocation while one is in progress is rejected.
#[derive(Clone)]
pub struct ExpansionExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    tree: Arc<dyn TreeAccess>,
    handlers: HandlerRegistry,
    session: Mutex<SessionState>,
    running: AtomicBool,
    paused: AtomicBool,
    resume_notify: Notify,
    cancel: Mutex<CancelToken>,
    cooldowns: AtomicU32,
}

/// Clears the single-flight guard even on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ExpansionExecutor {
    #[must_use]
    pub fn new(tree: Arc<dyn TreeAccess>, handlers: HandlerRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                tree,
                handlers,
                session: Mutex::new(SessionState::new()),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                resume_notify: Notify::new(),
                cancel: Mutex::new(CancelToken::new()),
                cooldowns: AtomicU32::new(0),
            }),
        }
    }

    /// Execute one expansion run to a terminal status.
    ///
    /// Per-candidate failures never abort the run; only a `Fatal` outcome
    /// does, leaving the session in `Error` with the cause logged.
    pub async fn run(&self, options: ExpandOptions) -> Result<RunStats> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.inner.running);

        // Fresh cooperative state per run.
        let cancel = {
            let mut slot = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
            *slot = CancelToken::new();
            slot.clone()
        };
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.cooldowns.store(0, Ordering::SeqCst);
        {
            let mut session = self.lock_session();
            if session.status() != SessionStatus::Idle {
                session.reset();
            }
            session.transition(SessionStatus::Expanding)?;
        }

        let result = self.run_loop(&options, &cancel).await;

        let stats = self.get_stats();
        match result {
            Ok(()) => Ok(stats),
            Err(err) => Err(err),
        }
    }

    async fn run_loop(&self, options: &ExpandOptions, cancel: &CancelToken) -> Result<()> {
        let deadline = Instant::now() + options.max_time;
        let mut queue = CandidateQueue::new();
        let mut attempted: HashSet<NodeId> = HashSet::new();
        let mut limiter = RateLimiter::new(options.base_delay, options.max_delay);
        let mut burst: VecDeque<Instant> = VecDeque::new();

        self.discover(&mut queue, &mut attempted, options).await?;
        log::info!(
            "run {} starting with {} candidates",
            self.lock_session().session_id(),
            queue.len()
        );

        'outer: loop {
            if cancel.is_cancelled() {
                break;
            }
            if Instant::now() >= deadline {
                log::info!("time budget exhausted; completing run");
                break;
            }
            self.wait_while_paused(cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            if queue.is_empty() {
                // The tree mutates while we work; one more poll may surface
                // content revealed by earlier expansions.
                self.discover(&mut queue, &mut attempted, options).await?;
                if queue.is_empty() {
                    break;
                }
            }

            let batch = queue.dequeue_batch(options.batch_size.max(1));
            for candidate in batch {
                if cancel.is_cancelled() {
                    break 'outer;
                }
                self.wait_while_paused(cancel).await;
                if cancel.is_cancelled() {
                    break 'outer;
                }

                // Failure-burst guard: a spike of intentional interruptions
                // means the external system wants us to back off, not stop.
                prune_burst(&mut burst);
                if burst.len() >= BURST_THRESHOLD {
                    log::info!(
                        "cancellation burst ({} in {:?}); cooling down for {:?}",
                        burst.len(),
                        BURST_WINDOW,
                        options.cooldown
                    );
                    self.inner.cooldowns.fetch_add(1, Ordering::Relaxed);
                    burst.clear();
                    tokio::select! {
                        () = tokio::time::sleep(options.cooldown) => {}
                        () = cancel.cancelled() => break 'outer,
                    }
                }

                limiter.wait_if_needed(cancel).await;
                if cancel.is_cancelled() {
                    break 'outer;
                }

                let outcome = self
                    .attempt(&candidate, options, cancel, &mut limiter)
                    .await?;
                if outcome == Outcome::Cancelled {
                    burst.push_back(Instant::now());
                }
            }

            self.discover(&mut queue, &mut attempted, options).await?;
            // Cooperative multitasking boundary between batches.
            tokio::task::yield_now().await;
        }

        let terminal = if cancel.is_cancelled() {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Complete
        };
        let mut session = self.lock_session();
        session.transition(terminal)?;
        log::info!(
            "run {} finished: {} ({}/{} successful)",
            session.session_id(),
            terminal,
            session.progress().successful,
            session.progress().total
        );
        Ok(())
    }

    /// Run one reveal attempt and record its outcome everywhere.
    async fn attempt(
        &self,
        candidate: &CandidateNode,
        options: &ExpandOptions,
        cancel: &CancelToken,
        limiter: &mut RateLimiter,
    ) -> Result<Outcome> {
        let start = Instant::now();

        let mut result = match self.inner.handlers.get(candidate.category) {
            Some(handler) => handler.reveal(candidate).await,
            None => Err(ExpandError::StructuralMismatch(format!(
                "no reveal handler registered for {}",
                candidate.category
            ))),
        };

        // Post-reveal settle: give the tree a bounded window to stabilize
        // before the next mutation. A node that never settles is a soft
        // structural failure of this candidate only.
        if matches!(result, Ok(true))
            && !self
                .wait_for_settle(&candidate.id, options.settle_timeout, cancel)
                .await
        {
            log::warn!(
                "node {} did not settle within {:?}",
                candidate.id,
                options.settle_timeout
            );
            result = Err(ExpandError::StructuralMismatch(format!(
                "node {} did not settle",
                candidate.id
            )));
        }

        let outcome = Outcome::classify(&result);
        match outcome {
            Outcome::Success => limiter.on_success(),
            Outcome::Transient => {
                if matches!(result, Err(ExpandError::RateLimited)) {
                    limiter.on_rate_limit_signal();
                } else {
                    limiter.on_failure();
                }
            }
            Outcome::Structural => limiter.on_failure(),
            // Intentional interruptions feed the burst window only; they say
            // nothing about sustainable throughput.
            Outcome::Cancelled | Outcome::Fatal => {}
        }

        let mut session = self.lock_session();
        if let Err(err) = &result {
            if outcome != Outcome::Cancelled {
                session.add_error(err.to_string(), candidate.category.as_str());
            }
        }
        if let Err(err) = session.record_outcome(candidate.category, outcome, start.elapsed()) {
            log::warn!("outcome for {} rejected by session: {err}", candidate.id);
        }

        if outcome == Outcome::Fatal {
            let cause = match result {
                Err(err) => err,
                Ok(_) => ExpandError::Fatal("unreachable: fatal outcome from ok".into()),
            };
            session.transition(SessionStatus::Error)?;
            drop(session);
            log::error!("fatal error on {}: {cause}; aborting run", candidate.id);
            return Err(EngineError::Aborted(cause));
        }

        Ok(outcome)
    }

    /// Pull current candidates for every enabled category, skipping nodes
    /// already attempted this run and respecting the element budget.
    async fn discover(
        &self,
        queue: &mut CandidateQueue,
        attempted: &mut HashSet<NodeId>,
        options: &ExpandOptions,
    ) -> Result<()> {
        for category in CandidateCategory::ALL {
            if !options.is_enabled(category) {
                continue;
            }
            let budget = options.max_elements.saturating_sub(attempted.len());
            if budget == 0 {
                return Ok(());
            }

            let found = match self.inner.tree.find_candidates(category).await {
                Ok(found) => found,
                Err(err) if err.is_fatal() => {
                    let mut session = self.lock_session();
                    session.add_error(err.to_string(), "discovery");
                    session.transition(SessionStatus::Error)?;
                    return Err(EngineError::Aborted(err));
                }
                Err(err) => {
                    log::warn!("discovery failed for {category}: {err}");
                    self.lock_session().add_error(err.to_string(), "discovery");
                    continue;
                }
            };

            let mut added = 0usize;
            for node in found {
                if added >= budget {
                    break;
                }
                if !attempted.insert(node.id.clone()) {
                    continue;
                }
                queue.enqueue(node);
                added += 1;
            }
            if added > 0 {
                log::debug!("discovered {added} new {category} candidates");
                if let Err(err) = self.lock_session().add_total(category, added) {
                    log::warn!("failed to grow total for {category}: {err}");
                }
            }
        }
        Ok(())
    }

    async fn wait_for_settle(
        &self,
        id: &NodeId,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.tree.is_settled(id).await {
                return true;
            }
            // Don't misclassify a cancelled run as a structural failure.
            if cancel.is_cancelled() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(SETTLE_POLL).await;
        }
    }

    async fn wait_while_paused(&self, cancel: &CancelToken) {
        loop {
            if !self.inner.paused.load(Ordering::SeqCst) || cancel.is_cancelled() {
                return;
            }
            let notified = self.inner.resume_notify.notified();
            tokio::pin!(notified);
            // Register before the re-check so a resume fired in between is
            // not lost.
            notified.as_mut().enable();
            if !self.inner.paused.load(Ordering::SeqCst) || cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                () = notified => {}
                () = cancel.cancelled() => {}
            }
        }
    }

    // --- control ------------------------------------------------------------

    /// Request a pause at the next cooperative boundary. No-op (`false`)
    /// unless a run is currently expanding.
    pub fn pause(&self, reason: impl Into<String>) -> bool {
        let mut session = self.lock_session();
        if session.pause(reason).is_err() {
            return false;
        }
        self.inner.paused.store(true, Ordering::SeqCst);
        true
    }

    /// Resume a paused run. No-op (`false`) unless currently paused.
    pub fn resume(&self) -> bool {
        let mut session = self.lock_session();
        if session.status() != SessionStatus::Paused
            || session.transition(SessionStatus::Expanding).is_err()
        {
            return false;
        }
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.resume_notify.notify_waiters();
        true
    }

    /// Request cancellation; effective at the next batch or item boundary.
    /// Always reaches a terminal state. No-op (`false`) when nothing runs.
    pub fn cancel(&self) -> bool {
        if !self.inner.running.load(Ordering::SeqCst) {
            return false;
        }
        let token = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        // Wake a paused loop so cancellation is not stuck behind resume.
        self.inner.resume_notify.notify_waiters();
        true
    }

    // --- reads --------------------------------------------------------------

    #[must_use]
    pub fn get_stats(&self) -> RunStats {
        let session = self.lock_session();
        RunStats {
            session_id: session.session_id().to_string(),
            status: session.status(),
            progress: session.progress(),
            metrics: session.metrics(),
            cancelled_outcomes: session.cancelled_count(),
            cooldowns: self.inner.cooldowns.load(Ordering::Relaxed),
            error_count: session.errors().len(),
        }
    }

    #[must_use]
    pub fn get_status(&self) -> SessionStatus {
        self.lock_session().status()
    }

    #[must_use]
    pub fn get_progress(&self) -> Progress {
        self.lock_session().progress()
    }

    #[must_use]
    pub fn get_errors(&self) -> Vec<ErrorEntry> {
        self.lock_session().errors()
    }

    #[must_use]
    pub fn get_metrics(&self) -> SessionMetrics {
        self.lock_session().metrics()
    }

    #[must_use]
    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.lock_session().snapshot()
    }

    pub fn subscribe(
        &self,
        filter: EventFilter,
        callback: impl Fn(&SessionEvent) + Send + 'static,
    ) -> SubscriptionId {
        self.lock_session().subscribe(filter, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock_session().unsubscribe(id)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn prune_burst(burst: &mut VecDeque<Instant>) {
    let Some(cutoff) = Instant::now().checked_sub(BURST_WINDOW) else {
        return;
    };
    while burst.front().is_some_and(|t| *t < cutoff) {
        burst.pop_front();
    }
}
