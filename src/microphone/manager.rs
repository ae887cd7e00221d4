//! Microphone lifecycle owner
//!
//! The only component that publishes `voice.mic_opened` and
//! `voice.mic_closed`. All transitions run under `state_lock`, and the
//! event for a transition is published after the state commit while the
//! lock is still held, so subscribers reading the snapshot see the new state.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::events::{BusEvent, Component, EventBus, EventSource};
use crate::state::{MicSlot, MicrophoneState, SnapshotReader};

/// How many finished session ids are remembered to reject reuse
const RECENT_SESSIONS: usize = 32;

struct Inner {
    state: MicrophoneState,
    session_id: Option<String>,
    /// Close requested before the hardware acked the open
    close_after_open: bool,
    recent_sessions: VecDeque<String>,
}

impl Inner {
    fn owns(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    fn remember(&mut self, session_id: &str) {
        if self.recent_sessions.len() == RECENT_SESSIONS {
            self.recent_sessions.pop_front();
        }
        self.recent_sessions.push_back(session_id.to_owned());
    }
}

pub struct MicrophoneManager {
    state_lock: Mutex<Inner>,
    slot: MicSlot,
    bus: EventBus,
    reader: SnapshotReader,
}

impl MicrophoneManager {
    pub fn new(bus: EventBus, slot: MicSlot, reader: SnapshotReader) -> Self {
        Self {
            state_lock: Mutex::new(Inner {
                state: MicrophoneState::Idle,
                session_id: None,
                close_after_open: false,
                recent_sessions: VecDeque::with_capacity(RECENT_SESSIONS),
            }),
            slot,
            bus,
            reader,
        }
    }

    pub async fn state(&self) -> MicrophoneState {
        self.state_lock.lock().await.state
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state_lock.lock().await.session_id.clone()
    }

    /// Whether `session_id` is still waiting for its hardware open ack.
    pub async fn is_opening(&self, session_id: &str) -> bool {
        let inner = self.state_lock.lock().await;
        inner.state == MicrophoneState::Opening && inner.owns(session_id)
    }

    /// Start opening the microphone for `session_id`.
    ///
    /// Dropped with a warning unless the microphone is idle.
    pub async fn request_open(&self, session_id: &str) {
        let mut inner = self.state_lock.lock().await;
        if let Err(e) = self.open_locked(&mut inner, session_id) {
            warn!(error = %e, session_id, "open request dropped");
        }
    }

    /// Hardware confirmed the device is capturing.
    pub async fn on_hardware_opened(&self, session_id: &str) {
        let mut inner = self.state_lock.lock().await;
        if let Err(e) = self.hardware_opened_locked(&mut inner, session_id) {
            warn!(error = %e, "hardware open ack dropped");
        }
    }

    /// Ask the hardware to release the device, or drop straight to idle
    /// when `force` is set.
    pub async fn request_close(&self, session_id: &str, force: bool) {
        let mut inner = self.state_lock.lock().await;
        if let Err(e) = self.close_locked(&mut inner, session_id, force) {
            warn!(error = %e, session_id, force, "close request dropped");
        }
    }

    /// Close whatever session is outstanding.
    pub async fn request_close_current(&self, force: bool) {
        let mut inner = self.state_lock.lock().await;
        let Some(session_id) = inner.session_id.clone() else {
            let err = CoordinatorError::invalid_mic("request_close", inner.state);
            warn!(error = %err, force, "close request dropped");
            return;
        };
        if let Err(e) = self.close_locked(&mut inner, &session_id, force) {
            warn!(error = %e, session_id = %session_id, force, "close request dropped");
        }
    }

    /// Hardware confirmed the device is released.
    pub async fn on_hardware_closed(&self, session_id: &str) {
        let mut inner = self.state_lock.lock().await;
        if let Err(e) = self.hardware_closed_locked(&mut inner, session_id) {
            warn!(error = %e, "hardware close ack dropped");
        }
    }

    /// Unconditionally return to idle and announce it.
    pub async fn force_close_internal(&self, reason: &str) {
        let mut inner = self.state_lock.lock().await;
        self.force_close_locked(&mut inner, reason);
    }

    /// Force close only if `session_id` is still the outstanding session.
    ///
    /// Used by watchdogs so a late timeout never kills a newer session.
    pub async fn force_close_session(&self, session_id: &str, reason: &str) {
        let mut inner = self.state_lock.lock().await;
        if inner.owns(session_id) {
            self.force_close_locked(&mut inner, reason);
        } else {
            debug!(session_id, reason, "session already gone, nothing to force close");
        }
    }

    /// Wait until `session_id` is acknowledged open or no longer outstanding.
    pub async fn wait_opened(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<(), CoordinatorError> {
        self.reader
            .wait_until("microphone.opened", timeout, |s| {
                s.session_id.as_deref() != Some(session_id)
                    || matches!(
                        s.mic_state,
                        MicrophoneState::Active | MicrophoneState::Closing
                    )
            })
            .await
            .map(|_| ())
    }

    /// Wait until `session_id` is no longer outstanding.
    pub async fn wait_released(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<(), CoordinatorError> {
        self.reader
            .wait_until("microphone.closed", timeout, |s| {
                s.session_id.as_deref() != Some(session_id)
            })
            .await
            .map(|_| ())
    }

    fn open_locked(&self, inner: &mut Inner, session_id: &str) -> Result<(), CoordinatorError> {
        if inner.state != MicrophoneState::Idle {
            return Err(CoordinatorError::invalid_mic("request_open", inner.state));
        }
        if inner.recent_sessions.iter().any(|s| s == session_id) {
            return Err(CoordinatorError::InvalidTransition {
                action: "reuse_session_id",
                state: inner.state.to_string(),
            });
        }

        inner.remember(session_id);
        self.commit(inner, MicrophoneState::Opening, Some(session_id.to_owned()));
        self.publish(BusEvent::DeviceOpen {
            session_id: session_id.to_owned(),
        });
        Ok(())
    }

    fn hardware_opened_locked(
        &self,
        inner: &mut Inner,
        session_id: &str,
    ) -> Result<(), CoordinatorError> {
        if inner.state != MicrophoneState::Opening || !inner.owns(session_id) {
            return Err(CoordinatorError::DuplicateEvent {
                event: "microphone.opened",
                session_id: session_id.to_owned(),
                state: inner.state,
            });
        }

        self.commit(inner, MicrophoneState::Active, Some(session_id.to_owned()));
        self.publish(BusEvent::MicOpened {
            session_id: session_id.to_owned(),
            timestamp: Utc::now(),
            source: EventSource::Hardware,
        });

        if std::mem::take(&mut inner.close_after_open) {
            debug!(session_id, "applying close deferred during open");
            self.begin_close(inner, session_id);
        }
        Ok(())
    }

    fn close_locked(
        &self,
        inner: &mut Inner,
        session_id: &str,
        force: bool,
    ) -> Result<(), CoordinatorError> {
        if !inner.owns(session_id) {
            return Err(CoordinatorError::invalid_mic("request_close", inner.state));
        }

        if force {
            self.force_close_locked(inner, "forced");
            return Ok(());
        }

        match inner.state {
            MicrophoneState::Active => {
                self.begin_close(inner, session_id);
                Ok(())
            }
            MicrophoneState::Opening => {
                info!(session_id, "close requested while opening, deferring until ack");
                inner.close_after_open = true;
                Ok(())
            }
            state => Err(CoordinatorError::invalid_mic("request_close", state)),
        }
    }

    fn begin_close(&self, inner: &mut Inner, session_id: &str) {
        self.commit(inner, MicrophoneState::Closing, Some(session_id.to_owned()));
        self.publish(BusEvent::DeviceClose {
            session_id: session_id.to_owned(),
        });
    }

    fn hardware_closed_locked(
        &self,
        inner: &mut Inner,
        session_id: &str,
    ) -> Result<(), CoordinatorError> {
        if inner.state != MicrophoneState::Closing || !inner.owns(session_id) {
            return Err(CoordinatorError::DuplicateEvent {
                event: "microphone.closed",
                session_id: session_id.to_owned(),
                state: inner.state,
            });
        }

        self.commit(inner, MicrophoneState::Idle, None);
        self.publish(BusEvent::MicClosed {
            session_id: Some(session_id.to_owned()),
            timestamp: Utc::now(),
            source: EventSource::Hardware,
            reason: None,
        });
        Ok(())
    }

    fn force_close_locked(&self, inner: &mut Inner, reason: &str) {
        let session_id = inner.session_id.clone();
        let was = inner.state;
        inner.close_after_open = false;

        if was == MicrophoneState::Idle {
            warn!(reason, "force close while already idle");
        } else {
            self.commit(inner, MicrophoneState::Idle, None);
        }

        self.publish(BusEvent::MicClosed {
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            source: EventSource::Forced,
            reason: Some(reason.to_owned()),
        });

        // The device never acked a release; tell it to let go anyway
        if let Some(session_id) = session_id {
            self.publish(BusEvent::DeviceClose { session_id });
        }
    }

    fn commit(&self, inner: &mut Inner, state: MicrophoneState, session_id: Option<String>) {
        info!(
            from = %inner.state,
            to = %state,
            session_id = session_id.as_deref().unwrap_or("-"),
            "microphone transition"
        );
        inner.state = state;
        inner.session_id = session_id.clone();
        self.slot.set(state, session_id);
    }

    fn publish(&self, event: BusEvent) {
        self.bus.publish(Component::MicrophoneManager, event);
    }
}
