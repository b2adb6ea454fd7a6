//! # Expander Workers
//!
//! Fixed-size pool of isolated OS-thread workers for CPU-heavy tree-analysis
//! tasks, driven purely by message passing.
//!
//! ```text
//! caller ──submit──> WorkerPool
//!                      │  semaphore admission
//!                      ├──> worker thread (std::mpsc in, oneshot out)
//!                      │      └─> pure analysis over a content snapshot
//!                      └──> synchronous fallback when workers are
//!                           unavailable, crashed, or the kind is unknown
//! ```
//!
//! Workers never share memory with the caller; a crashed worker is replaced
//! and cannot corrupt anything outside its thread. Every degraded result is
//! tagged `fallback: true` instead of failing the caller.

mod analysis;
mod pool;
mod task;

pub use analysis::{analyze_structure, optimize_patterns, parse_candidates};
pub use pool::{HealthReport, WorkerPool, WorkerPoolConfig, WorkerStats};
pub use task::{
    AnalysisOutput, AnalysisResult, CandidateMatch, PatternPerf, PatternSpec, StructureReport,
    TaskPayload, WorkerTask,
};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerPoolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("task {task_id} exceeded its deadline")]
    TaskTimeout { task_id: u64 },

    #[error("worker pool destroyed")]
    Destroyed,
}
