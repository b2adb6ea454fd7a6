use crate::observer::{EventFilter, ObserverConfig, ObserverRegistry, SessionEvent, SubscriptionId};
use crate::status::SessionStatus;
use crate::{Result, SessionError};
use expander_core::{CandidateCategory, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Bound on the error log; oldest entries fall off the back.
pub const ERROR_LOG_CAP: usize = 50;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}

fn next_session_id() -> String {
    format!(
        "run-{}-{}",
        current_unix_ms(),
        SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Aggregate progress of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub percentage: f32,
    pub current_category: Option<CandidateCategory>,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    pub estimated_remaining_ms: Option<u64>,
}

/// Per-category slice of the progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Throughput and quality metrics, recomputed on every recorded outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub elements_per_sec: f32,
    pub success_rate: f32,
    pub retry_rate: f32,
    pub avg_processing_ms: f32,
}

/// One entry of the bounded, newest-first error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub context: String,
    pub at_ms: u64,
}

/// Serialized view of a session, handed to external persistence/transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub previous_status: SessionStatus,
    pub progress: Progress,
    pub categories: HashMap<CandidateCategory, CategoryCounts>,
    pub errors: Vec<ErrorEntry>,
    pub metrics: SessionMetrics,
    pub cancelled: usize,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Canonical state of one expansion run.
///
/// Exactly one mutator (the executor) drives this through validated update
/// operations; observers receive events synchronously on the mutating call.
pub struct SessionState {
    session_id: String,
    status: SessionStatus,
    previous_status: SessionStatus,
    progress: Progress,
    categories: HashMap<CandidateCategory, CategoryCounts>,
    errors: VecDeque<ErrorEntry>,
    metrics: SessionMetrics,
    /// Expected interruptions get their own counter; they are neither
    /// successes nor failures.
    cancelled: usize,
    transient_failures: usize,
    total_processing: Duration,
    started_instant: Option<Instant>,
    pause_reason: Option<String>,
    paused_at_ms: Option<u64>,
    resumed_at_ms: Option<u64>,
    created_at_ms: u64,
    updated_at_ms: u64,
    observers: ObserverRegistry,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_observer_config(ObserverConfig::default())
    }

    #[must_use]
    pub fn with_observer_config(config: ObserverConfig) -> Self {
        let now = current_unix_ms();
        Self {
            session_id: next_session_id(),
            status: SessionStatus::Idle,
            previous_status: SessionStatus::Idle,
            progress: Progress::default(),
            categories: HashMap::new(),
            errors: VecDeque::new(),
            metrics: SessionMetrics::default(),
            cancelled: 0,
            transient_failures: 0,
            total_processing: Duration::ZERO,
            started_instant: None,
            pause_reason: None,
            paused_at_ms: None,
            resumed_at_ms: None,
            created_at_ms: now,
            updated_at_ms: now,
            observers: ObserverRegistry::new(config),
        }
    }

    // --- reads ------------------------------------------------------------

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn previous_status(&self) -> SessionStatus {
        self.previous_status
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    #[must_use]
    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    /// Error log, newest first.
    #[must_use]
    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.errors.iter().cloned().collect()
    }

    #[must_use]
    pub fn category_counts(&self) -> HashMap<CandidateCategory, CategoryCounts> {
        self.categories.clone()
    }

    #[must_use]
    pub fn cancelled_count(&self) -> usize {
        self.cancelled
    }

    #[must_use]
    pub fn pause_reason(&self) -> Option<&str> {
        self.pause_reason.as_deref()
    }

    // --- observers --------------------------------------------------------

    pub fn subscribe(
        &mut self,
        filter: EventFilter,
        callback: impl Fn(&SessionEvent) + Send + 'static,
    ) -> SubscriptionId {
        self.observers.subscribe(filter, callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // --- validated mutations ----------------------------------------------

    /// Move to `to` if the state machine has that edge; otherwise reject and
    /// leave the state untouched.
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SessionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        let from = self.status;
        self.previous_status = from;
        self.status = to;
        self.updated_at_ms = current_unix_ms();

        match to {
            SessionStatus::Expanding if from == SessionStatus::Idle => {
                self.progress.started_at_ms = Some(self.updated_at_ms);
                self.started_instant = Some(Instant::now());
            }
            SessionStatus::Expanding if from == SessionStatus::Paused => {
                self.resumed_at_ms = Some(self.updated_at_ms);
            }
            SessionStatus::Complete | SessionStatus::Error | SessionStatus::Cancelled => {
                self.progress.ended_at_ms = Some(self.updated_at_ms);
            }
            _ => {}
        }

        self.observers.notify(&SessionEvent::StatusChanged { from, to });
        Ok(())
    }

    /// `Expanding -> Paused`, recording why.
    pub fn pause(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        // Validate the edge before touching the reason field.
        if self.status.is_terminal() {
            return Err(SessionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(SessionStatus::Paused) {
            return Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::Paused,
            });
        }
        self.pause_reason = Some(reason);
        self.paused_at_ms = Some(current_unix_ms());
        self.transition(SessionStatus::Paused)
    }

    /// Grow the run's scope: `n` more candidates of `category`.
    pub fn add_total(&mut self, category: CandidateCategory, n: usize) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SessionError::Terminal(self.status));
        }
        self.progress.total += n;
        self.categories.entry(category).or_default().total += n;
        self.recompute_progress(Some(category));
        self.observers
            .notify(&SessionEvent::ProgressUpdated(self.progress.clone()));
        Ok(())
    }

    /// Record one attempt. Rejected if it would violate
    /// `successful + failed <= processed <= total`.
    pub fn record_outcome(
        &mut self,
        category: CandidateCategory,
        outcome: Outcome,
        processing_time: Duration,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SessionError::Terminal(self.status));
        }
        if self.progress.processed + 1 > self.progress.total {
            return Err(SessionError::InvalidProgress(format!(
                "processed ({}) would exceed total ({})",
                self.progress.processed + 1,
                self.progress.total
            )));
        }

        self.progress.processed += 1;
        let counts = self.categories.entry(category).or_default();
        counts.processed += 1;

        match outcome {
            Outcome::Success => {
                self.progress.successful += 1;
                counts.successful += 1;
            }
            Outcome::Cancelled => {
                self.cancelled += 1;
            }
            Outcome::Transient => {
                self.progress.failed += 1;
                counts.failed += 1;
                self.transient_failures += 1;
            }
            Outcome::Structural | Outcome::Fatal => {
                self.progress.failed += 1;
                counts.failed += 1;
            }
        }

        debug_assert!(
            self.progress.successful + self.progress.failed <= self.progress.processed
                && self.progress.processed <= self.progress.total
        );

        self.total_processing += processing_time;
        self.updated_at_ms = current_unix_ms();
        self.recompute_progress(Some(category));
        self.recompute_metrics();

        self.observers
            .notify(&SessionEvent::ProgressUpdated(self.progress.clone()));
        self.observers
            .notify(&SessionEvent::MetricsUpdated(self.metrics));
        Ok(())
    }

    /// Append to the bounded error log and fire `ErrorAdded`. A pure
    /// recording operation; it never affects `status`.
    pub fn add_error(&mut self, message: impl Into<String>, context: impl Into<String>) {
        let entry = ErrorEntry {
            message: message.into(),
            context: context.into(),
            at_ms: current_unix_ms(),
        };
        self.errors.push_front(entry.clone());
        self.errors.truncate(ERROR_LOG_CAP);
        self.observers.notify(&SessionEvent::ErrorAdded(entry));
    }

    /// Start over with a fresh session id and cleared counters.
    pub fn reset(&mut self) {
        let config = self.observers.config();
        let observers = std::mem::replace(&mut self.observers, ObserverRegistry::new(config));
        *self = Self::new();
        self.observers = observers;
        self.observers.notify(&SessionEvent::Reset);
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            status: self.status,
            previous_status: self.previous_status,
            progress: self.progress.clone(),
            categories: self.categories.clone(),
            errors: self.errors.iter().cloned().collect(),
            metrics: self.metrics,
            cancelled: self.cancelled,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        }
    }

    /// Re-hydrate from a snapshot (external persistence hands these back).
    /// Elapsed-time based metrics freeze at their snapshotted values.
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.session_id = snapshot.session_id;
        self.status = snapshot.status;
        self.previous_status = snapshot.previous_status;
        self.progress = snapshot.progress;
        self.categories = snapshot.categories;
        self.errors = snapshot.errors.into();
        self.metrics = snapshot.metrics;
        self.cancelled = snapshot.cancelled;
        self.created_at_ms = snapshot.created_at_ms;
        self.updated_at_ms = snapshot.updated_at_ms;
        self.started_instant = None;
        self.observers.notify(&SessionEvent::Restored);
    }

    // --- internals --------------------------------------------------------

    fn recompute_progress(&mut self, current: Option<CandidateCategory>) {
        self.progress.current_category = current;
        self.progress.percentage = if self.progress.total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                (self.progress.processed as f32 / self.progress.total as f32) * 100.0
            }
        };

        // Plain projection: avg time per item x remaining. No smoothing.
        let remaining = self.progress.total.saturating_sub(self.progress.processed);
        self.progress.estimated_remaining_ms = if self.progress.processed == 0 || remaining == 0 {
            None
        } else {
            let avg_ms = self.total_processing.as_millis() / self.progress.processed as u128;
            u64::try_from(avg_ms.saturating_mul(remaining as u128)).ok()
        };
    }

    fn recompute_metrics(&mut self) {
        let processed = self.progress.processed;
        if processed == 0 {
            self.metrics = SessionMetrics::default();
            return;
        }

        #[allow(clippy::cast_precision_loss)]
        {
            let elapsed = self
                .started_instant
                .map_or(0.0, |t| t.elapsed().as_secs_f32());
            self.metrics.elements_per_sec = if elapsed > 0.0 {
                processed as f32 / elapsed
            } else {
                0.0
            };
            self.metrics.success_rate = self.progress.successful as f32 / processed as f32;
            self.metrics.retry_rate = self.transient_failures as f32 / processed as f32;
            self.metrics.avg_processing_ms =
                self.total_processing.as_millis() as f32 / processed as f32;
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn expanding_session(total: usize) -> SessionState {
        let mut session = SessionState::new();
        session.transition(SessionStatus::Expanding).unwrap();
        session.add_total(CandidateCategory::Collapsed, total).unwrap();
        session
    }

    #[test]
    fn record_outcome_updates_counters_and_percentage() {
        let mut session = expanding_session(4);
        session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Success,
                Duration::from_millis(10),
            )
            .unwrap();
        session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Structural,
                Duration::from_millis(30),
            )
            .unwrap();

        let progress = session.progress();
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.successful, 1);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.percentage, 50.0);
        // avg 20ms x 2 remaining
        assert_eq!(progress.estimated_remaining_ms, Some(40));
        assert_eq!(session.metrics().success_rate, 0.5);
    }

    #[test]
    fn cancelled_outcomes_count_processed_but_not_failed() {
        let mut session = expanding_session(2);
        session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Cancelled,
                Duration::ZERO,
            )
            .unwrap();

        let progress = session.progress();
        assert_eq!(progress.processed, 1);
        assert_eq!(progress.successful, 0);
        assert_eq!(progress.failed, 0);
        assert_eq!(session.cancelled_count(), 1);
    }

    #[test]
    fn overflowing_total_is_rejected_and_state_unchanged() {
        let mut session = expanding_session(1);
        session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Success,
                Duration::ZERO,
            )
            .unwrap();

        let before = session.progress();
        let err = session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Success,
                Duration::ZERO,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidProgress(_)));
        assert_eq!(session.progress(), before);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut session = SessionState::new();
        let err = session.transition(SessionStatus::Complete).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                from: SessionStatus::Idle,
                to: SessionStatus::Complete,
            }
        );
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn terminal_state_blocks_further_mutation() {
        let mut session = expanding_session(5);
        session.transition(SessionStatus::Complete).unwrap();
        assert!(matches!(
            session.transition(SessionStatus::Expanding),
            Err(SessionError::Terminal(SessionStatus::Complete))
        ));
        assert!(matches!(
            session.record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Success,
                Duration::ZERO
            ),
            Err(SessionError::Terminal(_))
        ));
    }

    #[test]
    fn pause_records_reason_and_resume_clears_status() {
        let mut session = expanding_session(5);
        session.pause("rate limit cooldown").unwrap();
        assert_eq!(session.status(), SessionStatus::Paused);
        assert_eq!(session.pause_reason(), Some("rate limit cooldown"));
        session.transition(SessionStatus::Expanding).unwrap();
        assert_eq!(session.status(), SessionStatus::Expanding);
        assert_eq!(session.previous_status(), SessionStatus::Paused);
    }

    #[test]
    fn error_log_is_bounded_and_newest_first() {
        let mut session = SessionState::new();
        for i in 0..(ERROR_LOG_CAP + 10) {
            session.add_error(format!("error {i}"), "test");
        }
        let errors = session.errors();
        assert_eq!(errors.len(), ERROR_LOG_CAP);
        assert_eq!(errors[0].message, format!("error {}", ERROR_LOG_CAP + 9));
    }

    #[test]
    fn add_error_never_changes_status() {
        let mut session = expanding_session(1);
        session.add_error("boom", "handler");
        assert_eq!(session.status(), SessionStatus::Expanding);
    }

    #[test]
    fn observers_fire_on_status_and_progress() {
        let mut session = SessionState::new();
        let status_hits = Arc::new(AtomicUsize::new(0));
        let progress_hits = Arc::new(AtomicUsize::new(0));

        let s = status_hits.clone();
        session.subscribe(EventFilter::StatusChanged, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let p = progress_hits.clone();
        session.subscribe(EventFilter::ProgressUpdated, move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });

        session.transition(SessionStatus::Expanding).unwrap();
        session.add_total(CandidateCategory::Collapsed, 1).unwrap();
        session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Success,
                Duration::ZERO,
            )
            .unwrap();

        assert_eq!(status_hits.load(Ordering::SeqCst), 1);
        // add_total + record_outcome
        assert_eq!(progress_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut session = expanding_session(3);
        session
            .record_outcome(
                CandidateCategory::Collapsed,
                Outcome::Success,
                Duration::from_millis(5),
            )
            .unwrap();
        session.add_error("stale node", "reveal");

        let snapshot = session.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: SessionSnapshot = serde_json::from_str(&json).unwrap();

        let mut restored = SessionState::new();
        let restored_hits = Arc::new(AtomicUsize::new(0));
        let r = restored_hits.clone();
        restored.subscribe(EventFilter::Restored, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        restored.restore(parsed);

        assert_eq!(restored.session_id(), session.session_id());
        assert_eq!(restored.status(), SessionStatus::Expanding);
        assert_eq!(restored.progress(), session.progress());
        assert_eq!(restored_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_starts_a_fresh_session_but_keeps_observers() {
        let mut session = expanding_session(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        session.subscribe(EventFilter::Reset, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let old_id = session.session_id().to_string();

        session.reset();
        assert_ne!(session.session_id(), old_id);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.progress().total, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
