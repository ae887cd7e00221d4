//! Shared state snapshot and its single-writer store
//!
//! The store hands out one write slot per field group. Each slot is owned by
//! exactly one component, everyone else reads copies through a
//! [`SnapshotReader`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::CoordinatorError;

/// Microphone lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneState {
    #[default]
    Idle,
    /// Open requested, waiting for the hardware ack
    Opening,
    Active,
    /// Close requested, waiting for the hardware ack
    Closing,
}

impl std::fmt::Display for MicrophoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MicrophoneState::Idle => write!(f, "idle"),
            MicrophoneState::Opening => write!(f, "opening"),
            MicrophoneState::Active => write!(f, "active"),
            MicrophoneState::Closing => write!(f, "closing"),
        }
    }
}

/// Application interaction mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// Nothing in progress, waiting for push-to-talk
    #[default]
    Sleeping,
    /// Recording the user
    Listening,
    /// Waiting for the assistant response
    Processing,
    /// Playing back the assistant response
    Speaking,
}

impl AppMode {
    /// Whether a request to move from `from` to `to` may be committed.
    ///
    /// Same-mode requests are never valid; the caller treats them as no-ops.
    pub fn can_enter(from: AppMode, to: AppMode, interrupt: bool) -> bool {
        use AppMode::*;
        match (from, to) {
            (a, b) if a == b => false,
            (_, Sleeping) => true,
            (Sleeping, Listening) => true,
            (Processing | Speaking, Listening) => interrupt,
            (Listening, Processing) => true,
            (Processing, Speaking) => true,
            _ => false,
        }
    }

    pub(crate) fn request_name(self) -> &'static str {
        match self {
            AppMode::Sleeping => "enter_sleeping",
            AppMode::Listening => "enter_listening",
            AppMode::Processing => "enter_processing",
            AppMode::Speaking => "enter_speaking",
        }
    }
}

impl std::fmt::Display for AppMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppMode::Sleeping => write!(f, "sleeping"),
            AppMode::Listening => write!(f, "listening"),
            AppMode::Processing => write!(f, "processing"),
            AppMode::Speaking => write!(f, "speaking"),
        }
    }
}

/// Immutable view of the coordinator state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub mode: AppMode,
    pub session_id: Option<String>,
    pub mic_state: MicrophoneState,
    pub first_run: bool,
    pub restart_pending: bool,
    pub ptt_pressed: bool,
}

/// Creates the snapshot channel and splits it into its write slots.
pub fn new_store(first_run: bool) -> (SnapshotReader, StateSlots) {
    let (tx, rx) = watch::channel(StateSnapshot {
        first_run,
        ..StateSnapshot::default()
    });
    let tx = Arc::new(tx);

    let slots = StateSlots {
        mic: MicSlot { tx: Arc::clone(&tx) },
        mode: ModeSlot { tx: Arc::clone(&tx) },
        input: InputSlot { tx: Arc::clone(&tx) },
        lifecycle: LifecycleSlot { tx },
    };

    (SnapshotReader { rx }, slots)
}

/// One writer per field group, handed to the owning component at startup
pub struct StateSlots {
    pub mic: MicSlot,
    pub mode: ModeSlot,
    pub input: InputSlot,
    pub lifecycle: LifecycleSlot,
}

/// Writes `mic_state` and `session_id`. Owned by the microphone manager.
pub struct MicSlot {
    tx: Arc<watch::Sender<StateSnapshot>>,
}

impl MicSlot {
    pub fn set(&self, mic_state: MicrophoneState, session_id: Option<String>) {
        self.tx.send_modify(|s| {
            s.mic_state = mic_state;
            s.session_id = session_id;
        });
    }
}

/// Writes `mode`. Owned by the mode authority.
pub struct ModeSlot {
    tx: Arc<watch::Sender<StateSnapshot>>,
}

impl ModeSlot {
    pub fn set(&self, mode: AppMode) {
        self.tx.send_modify(|s| s.mode = mode);
    }

    pub fn current(&self) -> AppMode {
        self.tx.borrow().mode
    }
}

/// Writes `ptt_pressed`. Owned by the mode coordinator.
pub struct InputSlot {
    tx: Arc<watch::Sender<StateSnapshot>>,
}

impl InputSlot {
    pub fn set_ptt_pressed(&self, pressed: bool) {
        self.tx.send_modify(|s| s.ptt_pressed = pressed);
    }
}

/// Writes `restart_pending`. Owned by the permission monitor.
pub struct LifecycleSlot {
    tx: Arc<watch::Sender<StateSnapshot>>,
}

impl LifecycleSlot {
    pub fn set_restart_pending(&self, pending: bool) {
        self.tx.send_modify(|s| s.restart_pending = pending);
    }
}

/// Cloneable read handle
#[derive(Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<StateSnapshot>,
}

impl SnapshotReader {
    /// Copy of the current snapshot
    pub fn snapshot(&self) -> StateSnapshot {
        self.rx.borrow().clone()
    }

    /// Suspend until `predicate` holds or `timeout` elapses.
    pub async fn wait_until<F>(
        &self,
        what: &'static str,
        timeout: Duration,
        mut predicate: F,
    ) -> Result<StateSnapshot, CoordinatorError>
    where
        F: FnMut(&StateSnapshot) -> bool,
    {
        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(|s| predicate(s)).await.map(|s| (*s).clone())
        })
        .await;

        match waited {
            Ok(Ok(snapshot)) => Ok(snapshot),
            // Sender gone means the daemon is shutting down; report it as a timeout
            Ok(Err(_)) | Err(_) => Err(CoordinatorError::Timeout {
                what,
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
