//! In-memory tree and handlers used by `expander run` to exercise a full
//! expansion without a live content source.

use async_trait::async_trait;
use expander_core::{
    CandidateCategory, CandidateNode, ExpandError, NodeId, RevealHandler, TreeAccess,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Deterministic xorshift generator so every run with the same seed produces
/// the same candidate layout and failure pattern.
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        // Zero state would never leave zero.
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn next_f64(&mut self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let v = (self.next_u64() >> 11) as f64;
        v / (1u64 << 53) as f64
    }
}

/// Tree seeded with a fixed candidate population. Candidates are handed out
/// once per category and marked consumed so re-polls converge.
pub struct SimulatedTree {
    pending: Mutex<HashMap<CandidateCategory, Vec<CandidateNode>>>,
}

impl SimulatedTree {
    pub fn new(node_count: usize, rng: &mut Rng) -> Self {
        let categories = CandidateCategory::ALL;
        let mut pending: HashMap<CandidateCategory, Vec<CandidateNode>> = HashMap::new();
        for i in 0..node_count {
            let category = categories[i % categories.len()];
            let visible = rng.next_f64() < 0.5;
            let node = CandidateNode::new(format!("sim-{i}"), category, visible);
            pending.entry(category).or_default().push(node);
        }
        Self {
            pending: Mutex::new(pending),
        }
    }
}

#[async_trait]
impl TreeAccess for SimulatedTree {
    async fn find_candidates(
        &self,
        category: CandidateCategory,
    ) -> expander_core::Result<Vec<CandidateNode>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        Ok(pending.remove(&category).unwrap_or_default())
    }

    async fn is_visible(&self, _id: &NodeId) -> bool {
        true
    }

    async fn is_settled(&self, _id: &NodeId) -> bool {
        true
    }
}

/// Handler that succeeds, fails transiently, or reports an interruption
/// according to the configured rates.
pub struct SimulatedHandler {
    rng: Mutex<Rng>,
    failure_rate: f64,
    cancel_rate: f64,
    latency: Duration,
}

impl SimulatedHandler {
    pub fn new(seed: u64, failure_rate: f64, cancel_rate: f64, latency: Duration) -> Self {
        Self {
            rng: Mutex::new(Rng::new(seed)),
            failure_rate,
            cancel_rate,
            latency,
        }
    }
}

#[async_trait]
impl RevealHandler for SimulatedHandler {
    async fn reveal(&self, node: &CandidateNode) -> expander_core::Result<bool> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let roll = self
            .rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_f64();
        if roll < self.cancel_rate {
            return Err(ExpandError::Cancelled);
        }
        if roll < self.cancel_rate + self.failure_rate {
            return Err(ExpandError::Transient(format!(
                "simulated failure expanding {}",
                node.id
            )));
        }
        Ok(true)
    }
}
