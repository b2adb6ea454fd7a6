use serde::{Deserialize, Serialize};
use std::fmt;

/// Run lifecycle: `Idle -> Expanding <-> Paused -> {Complete | Error | Cancelled}`.
///
/// Terminal states admit no further transitions; a new run starts a fresh
/// session instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Expanding,
    Paused,
    Complete,
    Error,
    Cancelled,
}

impl SessionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Error | SessionStatus::Cancelled
        )
    }

    /// Whether the edge `self -> to` exists in the state machine.
    #[must_use]
    pub const fn can_transition_to(self, to: SessionStatus) -> bool {
        match self {
            SessionStatus::Idle => matches!(to, SessionStatus::Expanding),
            SessionStatus::Expanding => matches!(
                to,
                SessionStatus::Paused
                    | SessionStatus::Complete
                    | SessionStatus::Error
                    | SessionStatus::Cancelled
            ),
            SessionStatus::Paused => matches!(
                to,
                SessionStatus::Expanding
                    | SessionStatus::Complete
                    | SessionStatus::Error
                    | SessionStatus::Cancelled
            ),
            SessionStatus::Complete | SessionStatus::Error | SessionStatus::Cancelled => false,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Expanding => "expanding",
            SessionStatus::Paused => "paused",
            SessionStatus::Complete => "complete",
            SessionStatus::Error => "error",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStatus::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [Complete, Error, Cancelled] {
            for to in [Idle, Expanding, Paused, Complete, Error, Cancelled] {
                assert!(!terminal.can_transition_to(to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn pause_resume_cycle_is_legal() {
        assert!(Idle.can_transition_to(Expanding));
        assert!(Expanding.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Expanding));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(Expanding.can_transition_to(Complete));
    }

    #[test]
    fn idle_cannot_jump_to_terminal() {
        assert!(!Idle.can_transition_to(Complete));
        assert!(!Idle.can_transition_to(Paused));
    }
}
