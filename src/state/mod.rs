//! Coordinator state: snapshot store, mode authority and selectors
//!
//! - `MicrophoneState`: Idle → Opening → Active → Closing → Idle
//! - `AppMode`: Sleeping, Listening, Processing, Speaking
//! - Each snapshot field group has exactly one writer

mod authority;
pub mod selectors;
mod snapshot;

pub use authority::ModeAuthority;
pub use snapshot::{
    new_store, AppMode, InputSlot, LifecycleSlot, MicSlot, MicrophoneState, ModeSlot,
    SnapshotReader, StateSlots, StateSnapshot,
};
