//! Interaction mode derivation
//!
//! Sleeping → (press) pending → (long press) Listening → (release or
//! interrupt) Processing → (response complete) Speaking → (playback done)
//! Sleeping. A short press while pending falls back to Sleeping.

mod coordinator;
mod press;

pub use coordinator::ModeCoordinator;
pub use press::{PressClassifier, PttSignal};
