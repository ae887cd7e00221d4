//! Microphone lifecycle
//!
//! `MicrophoneManager` owns the Idle/Opening/Active/Closing state machine
//! and is the sole publisher of `voice.mic_opened` / `voice.mic_closed`.
//! `MicrophoneBridge` feeds it from the bus and guards opens and closes
//! with timeouts.

mod bridge;
mod manager;

pub use bridge::MicrophoneBridge;
pub use manager::MicrophoneManager;
