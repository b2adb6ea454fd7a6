use crate::CandidateCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Per-run options for the expansion executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandOptions {
    /// Categories the run is allowed to touch. Defaults to all of them.
    pub enabled_categories: HashSet<CandidateCategory>,

    /// Hard cap on attempted candidates; caps `progress.total` too so the
    /// percentage reflects only work the run will actually do.
    pub max_elements: usize,

    /// Cooperative wall-clock budget for the whole run.
    pub max_time: Duration,

    /// Candidates dequeued per batch. Kept small to bound the blast radius
    /// of a single misbehaving operation.
    pub batch_size: usize,

    /// Rate limiter floor.
    pub base_delay: Duration,

    /// Rate limiter ceiling.
    pub max_delay: Duration,

    /// Soft budget for the post-reveal settle wait.
    pub settle_timeout: Duration,

    /// Pause inserted when the cancellation burst guard trips.
    pub cooldown: Duration,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            enabled_categories: CandidateCategory::ALL.into_iter().collect(),
            max_elements: 1_000,
            max_time: Duration::from_secs(600),
            batch_size: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            settle_timeout: Duration::from_secs(3),
            cooldown: Duration::from_secs(5),
        }
    }
}

impl ExpandOptions {
    #[must_use]
    pub fn is_enabled(&self, category: CandidateCategory) -> bool {
        self.enabled_categories.contains(&category)
    }

    /// Restrict the run to the given categories.
    #[must_use]
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = CandidateCategory>) -> Self {
        self.enabled_categories = categories.into_iter().collect();
        self
    }
}
