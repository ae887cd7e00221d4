//! Push-to-talk key input
//!
//! On macOS a CGEventTap listener reports edges of the configured modifier
//! key. Other platforms get no listener; PTT signals can still arrive over
//! IPC.

mod keys;
#[cfg(target_os = "macos")]
mod listener;

pub use keys::{ModifierState, PttKey};
#[cfg(target_os = "macos")]
pub use listener::HotkeyListener;

/// Raw key edges sent to the press classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    PttDown,
    PttUp,
    /// Event tap was disabled by macOS and re-enabled
    TapDisabled,
}

#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("push-to-talk listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Input Monitoring permission")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to send event to channel")]
    ChannelSend,
}
