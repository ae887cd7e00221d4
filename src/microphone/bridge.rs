//! Bus adapter for the microphone manager
//!
//! Routes recording requests and hardware acks into the manager and owns the
//! open/close watchdogs. Timeouts end in a forced close; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{next_event, BusEvent};

use super::MicrophoneManager;

pub struct MicrophoneBridge {
    manager: Arc<MicrophoneManager>,
    open_timeout: Duration,
    close_timeout: Duration,
}

impl MicrophoneBridge {
    pub fn new(manager: Arc<MicrophoneManager>, open_timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            manager,
            open_timeout,
            close_timeout,
        }
    }

    pub async fn run(self, mut rx: broadcast::Receiver<BusEvent>) {
        info!("microphone bridge started");

        while let Some(event) = next_event(&mut rx).await {
            self.handle(event).await;
        }

        info!("microphone bridge stopped");
    }

    async fn handle(&self, event: BusEvent) {
        match event {
            BusEvent::RecordingStart { session_id } => self.open(session_id).await,
            BusEvent::OpenRequested { session_id } => {
                let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                self.open(session_id).await;
            }
            BusEvent::RecordingStop { session_id } => {
                self.manager.request_close(&session_id, false).await;
                self.arm_close_watchdog(session_id);
            }
            BusEvent::CloseRequested { force } => {
                let current = self.manager.session_id().await;
                self.manager.request_close_current(force).await;
                if let (Some(session_id), false) = (current, force) {
                    self.arm_close_watchdog(session_id);
                }
            }
            BusEvent::HardwareOpened { session_id } => {
                self.manager.on_hardware_opened(&session_id).await;
            }
            BusEvent::HardwareClosed { session_id } => {
                self.manager.on_hardware_closed(&session_id).await;
            }
            _ => {}
        }
    }

    async fn open(&self, session_id: String) {
        self.manager.request_open(&session_id).await;
        // Only watch the session if this request is the one that got in
        if self.manager.session_id().await.as_deref() == Some(session_id.as_str()) {
            self.arm_open_watchdog(session_id);
        }
    }

    fn arm_open_watchdog(&self, session_id: String) {
        let manager = Arc::clone(&self.manager);
        let timeout = self.open_timeout;

        tokio::spawn(async move {
            match manager.wait_opened(&session_id, timeout).await {
                Ok(()) => debug!(session_id = %session_id, "open watchdog satisfied"),
                Err(e) => {
                    warn!(error = %e, session_id = %session_id, "microphone open not acknowledged");
                    manager.force_close_session(&session_id, "open_timeout").await;
                }
            }
        });
    }

    /// Bound the release of `session_id`.
    ///
    /// A close deferred during Opening only starts its clock once the open
    /// is acked; a missing ack is left to the open watchdog.
    fn arm_close_watchdog(&self, session_id: String) {
        let manager = Arc::clone(&self.manager);
        let open_timeout = self.open_timeout;
        let timeout = self.close_timeout;

        tokio::spawn(async move {
            if manager.is_opening(&session_id).await
                && manager.wait_opened(&session_id, open_timeout).await.is_err()
            {
                debug!(session_id = %session_id, "open never acked, close watchdog stands down");
                return;
            }

            match manager.wait_released(&session_id, timeout).await {
                Ok(()) => debug!(session_id = %session_id, "close watchdog satisfied"),
                Err(e) => {
                    warn!(error = %e, session_id = %session_id, "microphone close not acknowledged");
                    manager.force_close_session(&session_id, "close_timeout").await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Component, EventBus, EventSource};
    use crate::state::{new_store, MicrophoneState, SnapshotReader};

    struct Harness {
        bus: EventBus,
        reader: SnapshotReader,
        observer: broadcast::Receiver<BusEvent>,
    }

    fn spawn_bridge() -> Harness {
        let bus = EventBus::new(64);
        let observer = bus.subscribe();
        let (reader, slots) = new_store(false);
        let manager = Arc::new(MicrophoneManager::new(bus.clone(), slots.mic, reader.clone()));
        let bridge = MicrophoneBridge::new(manager, Duration::from_secs(3), Duration::from_secs(2));
        tokio::spawn(bridge.run(bus.subscribe()));
        Harness {
            bus,
            reader,
            observer,
        }
    }

    async fn wait_for_event<F>(rx: &mut broadcast::Receiver<BusEvent>, mut predicate: F) -> BusEvent
    where
        F: FnMut(&BusEvent) -> bool,
    {
        loop {
            let event = next_event(rx).await.expect("bus closed");
            if predicate(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_round_trip_through_bus() {
        let mut h = spawn_bridge();

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStart { session_id: "s1".into() },
        );
        wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::DeviceOpen { .. })).await;

        h.bus.publish(
            Component::AudioDevice,
            BusEvent::HardwareOpened { session_id: "s1".into() },
        );
        wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicOpened { .. })).await;
        assert_eq!(h.reader.snapshot().mic_state, MicrophoneState::Active);

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStop { session_id: "s1".into() },
        );
        wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::DeviceClose { .. })).await;

        h.bus.publish(
            Component::AudioDevice,
            BusEvent::HardwareClosed { session_id: "s1".into() },
        );
        let closed =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicClosed { .. })).await;
        assert!(matches!(
            closed,
            BusEvent::MicClosed { source: EventSource::Hardware, .. }
        ));
        assert_eq!(h.reader.snapshot().mic_state, MicrophoneState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_timeout_forces_close() {
        let mut h = spawn_bridge();

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStart { session_id: "s1".into() },
        );

        let closed =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicClosed { .. })).await;
        match closed {
            BusEvent::MicClosed {
                session_id,
                source,
                reason,
                ..
            } => {
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert_eq!(source, EventSource::Forced);
                assert_eq!(reason.as_deref(), Some("open_timeout"));
            }
            _ => unreachable!(),
        }
        assert_eq!(h.reader.snapshot().mic_state, MicrophoneState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_timeout_forces_close() {
        let mut h = spawn_bridge();

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStart { session_id: "s1".into() },
        );
        h.bus.publish(
            Component::AudioDevice,
            BusEvent::HardwareOpened { session_id: "s1".into() },
        );
        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStop { session_id: "s1".into() },
        );

        let closed =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicClosed { .. })).await;
        assert!(matches!(
            closed,
            BusEvent::MicClosed { reason: Some(ref r), .. } if r == "close_timeout"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_ack_reports_open_timeout() {
        let mut h = spawn_bridge();

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStart { session_id: "s1".into() },
        );
        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStop { session_id: "s1".into() },
        );

        let closed =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicClosed { .. })).await;
        assert!(matches!(
            closed,
            BusEvent::MicClosed { reason: Some(ref r), .. } if r == "open_timeout"
        ));
        assert_eq!(h.reader.snapshot().mic_state, MicrophoneState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_close_still_guarded_after_ack() {
        let mut h = spawn_bridge();

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStart { session_id: "s1".into() },
        );
        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStop { session_id: "s1".into() },
        );
        tokio::time::sleep(Duration::from_millis(2500)).await;
        h.bus.publish(
            Component::AudioDevice,
            BusEvent::HardwareOpened { session_id: "s1".into() },
        );
        wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::DeviceClose { .. })).await;

        let closed =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicClosed { .. })).await;
        assert!(matches!(
            closed,
            BusEvent::MicClosed { reason: Some(ref r), .. } if r == "close_timeout"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ui_open_request_generates_session() {
        let mut h = spawn_bridge();

        h.bus.publish(Component::Ui, BusEvent::OpenRequested { session_id: None });
        let open =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::DeviceOpen { .. })).await;

        let BusEvent::DeviceOpen { session_id } = open else {
            unreachable!()
        };
        assert!(Uuid::parse_str(&session_id).is_ok());
        assert_eq!(h.reader.snapshot().session_id, Some(session_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ui_forced_close() {
        let mut h = spawn_bridge();

        h.bus.publish(
            Component::ModeCoordinator,
            BusEvent::RecordingStart { session_id: "s1".into() },
        );
        h.bus.publish(Component::Ui, BusEvent::CloseRequested { force: true });

        let closed =
            wait_for_event(&mut h.observer, |e| matches!(e, BusEvent::MicClosed { .. })).await;
        assert!(matches!(
            closed,
            BusEvent::MicClosed { reason: Some(ref r), .. } if r == "forced"
        ));
    }
}
