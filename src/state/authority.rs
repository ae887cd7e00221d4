//! Single writer of the application mode
//!
//! Applies `mode.request` intents in bus order and announces each commit
//! with `app.mode_changed`.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::events::{next_event, BusEvent, Component, EventBus};

use super::{AppMode, ModeSlot};

pub struct ModeAuthority {
    bus: EventBus,
    slot: ModeSlot,
}

impl ModeAuthority {
    pub fn new(bus: EventBus, slot: ModeSlot) -> Self {
        Self { bus, slot }
    }

    pub fn mode(&self) -> AppMode {
        self.slot.current()
    }

    pub async fn run(self, mut rx: broadcast::Receiver<BusEvent>) {
        info!(mode = %self.mode(), "mode authority started");

        while let Some(event) = next_event(&mut rx).await {
            if let BusEvent::ModeRequest {
                target_mode,
                interrupt,
                reason,
            } = event
            {
                self.apply(target_mode, interrupt, &reason);
            }
        }

        info!("mode authority stopped");
    }

    /// Commit `target` if it is reachable from the current mode.
    ///
    /// Returns whether the mode changed.
    pub fn apply(&self, target: AppMode, interrupt: bool, reason: &str) -> bool {
        let previous = self.slot.current();

        if previous == target {
            debug!(mode = %target, reason, "mode request is a no-op");
            return false;
        }

        if !AppMode::can_enter(previous, target, interrupt) {
            let err = CoordinatorError::invalid_mode(previous, target);
            warn!(error = %err, interrupt, reason, "mode request dropped");
            return false;
        }

        self.slot.set(target);
        info!(from = %previous, to = %target, reason, "mode transition");

        self.bus.publish(
            Component::ModeAuthority,
            BusEvent::ModeChanged {
                mode: target,
                previous,
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_store;

    fn create_authority() -> (ModeAuthority, broadcast::Receiver<BusEvent>) {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        let (_reader, slots) = new_store(false);
        (ModeAuthority::new(bus, slots.mode), rx)
    }

    #[test]
    fn test_valid_request_commits_and_announces() {
        let (authority, mut rx) = create_authority();

        assert!(authority.apply(AppMode::Listening, false, "long_press"));
        assert_eq!(authority.mode(), AppMode::Listening);
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::ModeChanged {
                mode: AppMode::Listening,
                previous: AppMode::Sleeping,
            }
        );
    }

    #[test]
    fn test_invalid_request_is_dropped_not_coerced() {
        let (authority, mut rx) = create_authority();
        authority.apply(AppMode::Listening, false, "long_press");
        authority.apply(AppMode::Processing, false, "release");
        while rx.try_recv().is_ok() {}

        assert!(!authority.apply(AppMode::Listening, false, "long_press"));
        assert_eq!(authority.mode(), AppMode::Processing);
        assert!(rx.try_recv().is_err());

        assert!(authority.apply(AppMode::Listening, true, "barge_in"));
        assert_eq!(authority.mode(), AppMode::Listening);
    }

    #[test]
    fn test_same_mode_request_is_noop() {
        let (authority, mut rx) = create_authority();
        assert!(!authority.apply(AppMode::Sleeping, true, "interrupt"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_applies_requests_from_bus() {
        let bus = EventBus::new(16);
        let (reader, slots) = new_store(false);
        let authority = ModeAuthority::new(bus.clone(), slots.mode);
        let mut observer = bus.subscribe();
        let handle = tokio::spawn(authority.run(bus.subscribe()));

        bus.publish(
            Component::ModeCoordinator,
            BusEvent::ModeRequest {
                target_mode: AppMode::Listening,
                interrupt: false,
                reason: "long_press".into(),
            },
        );

        loop {
            match next_event(&mut observer).await {
                Some(BusEvent::ModeChanged { mode, .. }) => {
                    assert_eq!(mode, AppMode::Listening);
                    break;
                }
                Some(_) => continue,
                None => panic!("bus closed"),
            }
        }
        assert_eq!(reader.snapshot().mode, AppMode::Listening);
        handle.abort();
    }
}
