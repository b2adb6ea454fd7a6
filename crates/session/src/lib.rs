//! # Expander Session
//!
//! Canonical state of one expansion run: status state machine, validated
//! progress bookkeeping, bounded error log, throughput metrics, and a typed
//! observer registry with synchronous, isolated dispatch.
//!
//! The executor is the only mutator; everyone else reads snapshots or
//! subscribes to events. Updates that would corrupt the bookkeeping
//! (`successful + failed > processed`, illegal status edges) are rejected and
//! leave the state untouched.

mod observer;
mod state;
mod status;

pub use observer::{EventFilter, ObserverConfig, SessionEvent, SubscriptionId};
pub use state::{
    CategoryCounts, ErrorEntry, Progress, SessionMetrics, SessionSnapshot, SessionState,
    ERROR_LOG_CAP,
};
pub use status::SessionStatus;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("invalid progress update: {0}")]
    InvalidProgress(String),

    #[error("session is terminal ({0}); no further mutation permitted")]
    Terminal(SessionStatus),
}
