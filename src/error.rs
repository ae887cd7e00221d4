//! Fault taxonomy for the coordinator
//!
//! None of these cross the public boundary of the managers: they are
//! produced by internal transition checks and turned into log records.

use crate::state::{AppMode, MicrophoneState};

/// Faults raised while applying state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("invalid transition: {action} not allowed while {state}")]
    InvalidTransition {
        action: &'static str,
        state: String,
    },

    #[error("duplicate event: {event} for session {session_id} while {state}")]
    DuplicateEvent {
        event: &'static str,
        session_id: String,
        state: MicrophoneState,
    },

    #[error("timed out waiting for {what} after {waited_ms}ms")]
    Timeout { what: &'static str, waited_ms: u64 },

    #[error("selector fault: field `{field}` is malformed, using default")]
    SelectorFault { field: &'static str },
}

impl CoordinatorError {
    pub fn invalid_mic(action: &'static str, state: MicrophoneState) -> Self {
        Self::InvalidTransition {
            action,
            state: state.to_string(),
        }
    }

    pub fn invalid_mode(from: AppMode, to: AppMode) -> Self {
        Self::InvalidTransition {
            action: to.request_name(),
            state: from.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoordinatorError::invalid_mic("request_open", MicrophoneState::Active);
        assert_eq!(
            err.to_string(),
            "invalid transition: request_open not allowed while active"
        );

        let err = CoordinatorError::invalid_mode(AppMode::Processing, AppMode::Listening);
        assert!(err.to_string().contains("processing"));
    }
}
