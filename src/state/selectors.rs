//! Read-only queries over a [`StateSnapshot`]
//!
//! Integrations call these instead of touching snapshot fields. They never
//! fail: raw snapshots coming from outside the process go through
//! [`snapshot_from_value`], which swaps malformed fields for the safest value.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::error::CoordinatorError;

use super::{AppMode, MicrophoneState, StateSnapshot};

pub fn get_current_mode(snapshot: &StateSnapshot) -> AppMode {
    snapshot.mode
}

pub fn get_session_id(snapshot: &StateSnapshot) -> Option<&str> {
    snapshot.session_id.as_deref()
}

pub fn get_mic_state(snapshot: &StateSnapshot) -> MicrophoneState {
    snapshot.mic_state
}

pub fn is_listening(snapshot: &StateSnapshot) -> bool {
    snapshot.mode == AppMode::Listening
}

/// Hardware confirmed capture
pub fn is_mic_active(snapshot: &StateSnapshot) -> bool {
    snapshot.mic_state == MicrophoneState::Active
}

/// Any session outstanding, acknowledged or not
pub fn is_mic_busy(snapshot: &StateSnapshot) -> bool {
    snapshot.mic_state != MicrophoneState::Idle
}

pub fn is_first_run(snapshot: &StateSnapshot) -> bool {
    snapshot.first_run
}

pub fn is_restart_pending(snapshot: &StateSnapshot) -> bool {
    snapshot.restart_pending
}

pub fn is_ptt_pressed(snapshot: &StateSnapshot) -> bool {
    snapshot.ptt_pressed
}

/// A new recording may start: microphone free and no restart pending
pub fn can_start_recording(snapshot: &StateSnapshot) -> bool {
    !is_mic_busy(snapshot) && !is_restart_pending(snapshot)
}

/// Listening indicator only lights once the hardware acked
pub fn should_show_listening_indicator(snapshot: &StateSnapshot) -> bool {
    is_listening(snapshot) && is_mic_active(snapshot)
}

/// Lenient parse of a raw snapshot.
///
/// Each missing or malformed field is logged and replaced by its default,
/// so a broken peer degrades to "sleeping, microphone idle".
pub fn snapshot_from_value(value: &Value) -> StateSnapshot {
    StateSnapshot {
        mode: field(value, "mode"),
        session_id: field(value, "session_id"),
        mic_state: field(value, "mic_state"),
        first_run: field(value, "first_run"),
        restart_pending: field(value, "restart_pending"),
        ptt_pressed: field(value, "ptt_pressed"),
    }
}

fn field<T>(value: &Value, name: &'static str) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(raw) = value.get(name) else {
        let fault = CoordinatorError::SelectorFault { field: name };
        warn!(%fault, "snapshot field missing");
        return T::default();
    };

    match serde_json::from_value(raw.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            let fault = CoordinatorError::SelectorFault { field: name };
            warn!(%fault, error = %e, "snapshot field malformed");
            T::default()
        }
    }
}
