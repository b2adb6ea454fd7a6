use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExpandError>;

/// Error taxonomy for reveal attempts and the run as a whole.
///
/// `Cancelled` is the expected-interruption class: the external system aborted
/// an in-flight interaction on purpose. It is never surfaced to the user as a
/// failure and feeds only the dedicated burst counter.
#[derive(Error, Debug, Clone)]
pub enum ExpandError {
    #[error("interaction cancelled by the external system")]
    Cancelled,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited by the external system")]
    RateLimited,

    #[error("expected element shape not found: {0}")]
    StructuralMismatch(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl ExpandError {
    /// Retryable with backoff on a later run; the current candidate is still
    /// counted as failed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, ExpandError::Transient(_) | ExpandError::RateLimited)
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, ExpandError::Fatal(_))
    }
}

/// Classified result of one reveal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Expected interruption; counted separately, never shown as a failure.
    Cancelled,
    /// Retryable class (network, timeout, throttle).
    Transient,
    /// The element did not have the expected shape; soft failure, no retry.
    Structural,
    /// Programming error; terminates the run.
    Fatal,
}

impl Outcome {
    /// Classify a reveal handler result. `Ok(false)` means the handler ran but
    /// the element refused to expand, which is a structural soft failure.
    #[must_use]
    pub fn classify(result: &std::result::Result<bool, ExpandError>) -> Self {
        match result {
            Ok(true) => Outcome::Success,
            Ok(false) => Outcome::Structural,
            Err(ExpandError::Cancelled) => Outcome::Cancelled,
            Err(ExpandError::Transient(_) | ExpandError::RateLimited) => Outcome::Transient,
            Err(ExpandError::StructuralMismatch(_)) => Outcome::Structural,
            Err(ExpandError::Fatal(_)) => Outcome::Fatal,
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_the_full_taxonomy() {
        assert_eq!(Outcome::classify(&Ok(true)), Outcome::Success);
        assert_eq!(Outcome::classify(&Ok(false)), Outcome::Structural);
        assert_eq!(
            Outcome::classify(&Err(ExpandError::Cancelled)),
            Outcome::Cancelled
        );
        assert_eq!(
            Outcome::classify(&Err(ExpandError::Transient("timeout".into()))),
            Outcome::Transient
        );
        assert_eq!(
            Outcome::classify(&Err(ExpandError::RateLimited)),
            Outcome::Transient
        );
        assert_eq!(
            Outcome::classify(&Err(ExpandError::StructuralMismatch("gone".into()))),
            Outcome::Structural
        );
        assert_eq!(
            Outcome::classify(&Err(ExpandError::Fatal("bug".into()))),
            Outcome::Fatal
        );
    }

    #[test]
    fn transient_covers_rate_limit() {
        assert!(ExpandError::RateLimited.is_transient());
        assert!(!ExpandError::Cancelled.is_transient());
        assert!(ExpandError::Fatal("x".into()).is_fatal());
    }
}
