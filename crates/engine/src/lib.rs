//! # Expander Engine
//!
//! The orchestrating state machine for adaptive tree expansion.
//!
//! ## Control flow
//!
//! ```text
//! TreeAccess.find_candidates ──> CandidateQueue (priority order)
//!         ▲                          │ dequeue bounded batch
//!         │ re-poll between batches  ▼
//!         │                  RateLimiter.wait ──> RevealHandler.reveal
//!         │                          │                  │
//!         └──────────────────────────┘        classify Outcome ──> SessionState
//! ```
//!
//! The executor runs single-task and cooperative: every suspension point is
//! an await, cancellation is a flag consulted at batch and item boundaries,
//! and exactly one mutator touches the session, queue, and limiter.

mod control;
mod executor;
mod limiter;
mod queue;

pub use control::CancelToken;
pub use executor::{ExpansionExecutor, HandlerRegistry, RunStats};
pub use limiter::RateLimiter;
pub use queue::CandidateQueue;

use expander_core::ExpandError;
use expander_session::SessionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("an expansion run is already in progress")]
    AlreadyRunning,

    #[error("session update rejected: {0}")]
    Session(#[from] SessionError),

    #[error("run aborted: {0}")]
    Aborted(#[from] ExpandError),
}
