//! Derives mode intents from push-to-talk, interrupts and pipeline progress
//!
//! The coordinator never writes the mode itself. It publishes
//! `mode.request` and lets the mode authority commit it.

use std::collections::VecDeque;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CoordinatorError;
use crate::events::{next_event, BusEvent, Component, EventBus, EventSource};
use crate::permissions::{PermissionKind, PermissionStatus};
use crate::state::{selectors, AppMode, InputSlot, SnapshotReader};

use super::PttSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Key is down, waiting to learn whether it is a long press
    Pending { interrupt: bool },
    /// Long press accepted, the user is being recorded
    Recording,
}

pub struct ModeCoordinator {
    bus: EventBus,
    reader: SnapshotReader,
    input: InputSlot,
    phase: Phase,
    /// Mode as of our last request or the last commit we observed
    believed_mode: AppMode,
    /// Requests published but not yet seen committed, oldest first
    in_flight: VecDeque<AppMode>,
    /// Session started by the last accepted long press
    live_session: Option<String>,
}

impl ModeCoordinator {
    pub fn new(bus: EventBus, reader: SnapshotReader, input: InputSlot) -> Self {
        let believed_mode = selectors::get_current_mode(&reader.snapshot());
        Self {
            bus,
            reader,
            input,
            phase: Phase::Idle,
            believed_mode,
            in_flight: VecDeque::new(),
            live_session: None,
        }
    }

    pub async fn run(mut self, mut rx: broadcast::Receiver<BusEvent>) {
        info!(mode = %self.believed_mode, "mode coordinator started");

        while let Some(event) = next_event(&mut rx).await {
            self.handle(&event);
        }

        info!("mode coordinator stopped");
    }

    pub fn handle(&mut self, event: &BusEvent) {
        match event {
            BusEvent::Ptt { signal } => self.on_ptt(*signal),
            BusEvent::Interrupt => self.on_interrupt(),
            BusEvent::ResponseComplete => {
                self.request(AppMode::Speaking, false, "response_complete");
            }
            BusEvent::PlaybackFinished => {
                if self.phase == Phase::Recording {
                    debug!("playback finished while recording, ignored");
                } else {
                    self.request(AppMode::Sleeping, false, "playback_finished");
                }
            }
            BusEvent::ModeChanged { mode, .. } => self.on_commit(*mode),
            BusEvent::MicClosed {
                session_id: Some(session_id),
                source,
                reason,
                ..
            } if self.live_session.as_deref() == Some(session_id.as_str()) => {
                self.live_session = None;
                if *source == EventSource::Forced && self.phase == Phase::Recording {
                    warn!(
                        session_id,
                        reason = reason.as_deref().unwrap_or("-"),
                        "microphone lost while listening"
                    );
                    self.phase = Phase::Idle;
                    self.request(AppMode::Sleeping, false, "mic_forced_closed");
                }
            }
            BusEvent::PermissionChanged { kind, status } => {
                if selectors::is_restart_pending(&self.reader.snapshot()) {
                    self.on_restart_pending(*kind, *status);
                }
            }
            _ => {}
        }
    }

    /// Adopt a committed mode unless a newer request is still on its way.
    fn on_commit(&mut self, mode: AppMode) {
        match self.in_flight.iter().position(|m| *m == mode) {
            Some(index) => {
                self.in_flight.drain(..=index);
            }
            None => self.in_flight.clear(),
        }

        if self.in_flight.is_empty() {
            self.believed_mode = mode;
        } else {
            debug!(
                committed = %mode,
                believed = %self.believed_mode,
                "stale commit, newer request in flight"
            );
        }
    }

    fn on_restart_pending(&mut self, kind: PermissionKind, status: PermissionStatus) {
        let recording = self.phase == Phase::Recording;
        if self.believed_mode == AppMode::Sleeping && !recording {
            debug!(?kind, ?status, "restart pending, already asleep");
            return;
        }

        info!(?kind, ?status, recording, "restart pending, returning to sleep");
        self.phase = Phase::Idle;
        if recording {
            self.end_recording();
        }
        self.request(AppMode::Sleeping, true, "permission_restart");
    }

    fn on_ptt(&mut self, signal: PttSignal) {
        match signal {
            PttSignal::Press => {
                self.input.set_ptt_pressed(true);
                match self.believed_mode {
                    AppMode::Listening => {
                        debug!("press while listening ignored");
                    }
                    mode => {
                        let interrupt = matches!(mode, AppMode::Processing | AppMode::Speaking);
                        self.phase = Phase::Pending { interrupt };
                    }
                }
            }
            PttSignal::LongPress => {
                let Phase::Pending { interrupt } = self.phase else {
                    debug!(phase = ?self.phase, "long press without pending press ignored");
                    return;
                };
                self.phase = Phase::Idle;
                self.start_listening(interrupt);
            }
            PttSignal::ShortPress => {
                let Phase::Pending { interrupt } = self.phase else {
                    return;
                };
                self.phase = Phase::Idle;
                if interrupt {
                    self.request(AppMode::Sleeping, true, "short_press_interrupt");
                } else {
                    debug!("short press cancelled pending activation");
                }
            }
            PttSignal::Release => {
                self.input.set_ptt_pressed(false);
                match self.phase {
                    Phase::Recording => self.stop_listening("release"),
                    _ => self.phase = Phase::Idle,
                }
            }
        }
    }

    fn on_interrupt(&mut self) {
        if self.phase == Phase::Recording {
            self.stop_listening("interrupt");
            return;
        }
        self.phase = Phase::Idle;
        match self.believed_mode {
            AppMode::Processing | AppMode::Speaking => {
                self.request(AppMode::Sleeping, true, "interrupt");
            }
            mode => debug!(%mode, "nothing to interrupt"),
        }
    }

    fn start_listening(&mut self, interrupt: bool) {
        let snapshot = self.reader.snapshot();
        if !selectors::can_start_recording(&snapshot) {
            warn!(
                mic_state = %selectors::get_mic_state(&snapshot),
                restart_pending = selectors::is_restart_pending(&snapshot),
                "long press ignored, recording not possible"
            );
            return;
        }

        if !self.request(AppMode::Listening, interrupt, "long_press") {
            return;
        }

        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, "recording requested");
        self.publish(BusEvent::RecordingStart {
            session_id: session_id.clone(),
        });
        self.publish(BusEvent::MicProvisional {
            session_id: session_id.clone(),
        });
        self.live_session = Some(session_id);
        self.phase = Phase::Recording;
    }

    fn stop_listening(&mut self, reason: &str) {
        self.phase = Phase::Idle;
        self.request(AppMode::Processing, false, reason);
        self.end_recording();
    }

    /// Ask the microphone to release the live session.
    fn end_recording(&mut self) {
        if let Some(session_id) = self.live_session.clone() {
            self.publish(BusEvent::RecordingStop { session_id });
        }
    }

    /// Publish a mode request if it is valid from the believed mode.
    fn request(&mut self, target: AppMode, interrupt: bool, reason: &str) -> bool {
        let from = self.believed_mode;
        if !AppMode::can_enter(from, target, interrupt) {
            let err = CoordinatorError::invalid_mode(from, target);
            warn!(error = %err, interrupt, reason, "mode request not sent");
            return false;
        }

        self.believed_mode = target;
        self.in_flight.push_back(target);
        self.publish(BusEvent::ModeRequest {
            target_mode: target,
            interrupt,
            reason: reason.to_owned(),
        });
        true
    }

    fn publish(&self, event: BusEvent) {
        self.bus.publish(Component::ModeCoordinator, event);
    }
}
