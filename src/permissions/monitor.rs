//! Periodic permission polling and the first-run restart flow

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::events::{BusEvent, Component, EventBus};
use crate::state::{selectors, LifecycleSlot, SnapshotReader};

use super::{PermissionChecker, PermissionKind, PermissionStatus};

pub struct PermissionMonitor {
    checker: Arc<dyn PermissionChecker>,
    bus: EventBus,
    reader: SnapshotReader,
    lifecycle: LifecycleSlot,
    last: HashMap<PermissionKind, PermissionStatus>,
}

impl PermissionMonitor {
    pub fn new(
        checker: Arc<dyn PermissionChecker>,
        bus: EventBus,
        reader: SnapshotReader,
        lifecycle: LifecycleSlot,
    ) -> Self {
        Self {
            checker,
            bus,
            reader,
            lifecycle,
            last: HashMap::new(),
        }
    }

    pub async fn run(mut self, every: Duration) {
        info!(interval_secs = every.as_secs(), "permission monitor started");

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Check every kind once and publish what changed.
    pub async fn poll_once(&mut self) {
        for kind in PermissionKind::ALL {
            let status = self.checker.check(kind).await;
            let previous = self.last.insert(kind, status);
            if previous == Some(status) {
                continue;
            }

            info!(kind = kind.as_str(), ?previous, ?status, "permission status changed");

            // A grant seen mid-session during first run needs a restart to stick
            let newly_granted = status == PermissionStatus::Granted
                && matches!(
                    previous,
                    Some(PermissionStatus::Denied | PermissionStatus::Unknown)
                );
            if newly_granted && kind.needs_restart_on_grant() {
                let snapshot = self.reader.snapshot();
                if selectors::is_first_run(&snapshot) && !selectors::is_restart_pending(&snapshot) {
                    warn!(kind = kind.as_str(), "permission granted during first run, restart required");
                    self.lifecycle.set_restart_pending(true);
                }
            }

            self.bus.publish(
                Component::PermissionMonitor,
                BusEvent::PermissionChanged { kind, status },
            );
        }
    }

    /// Last observed status, `Unknown` before the first poll
    pub fn status(&self, kind: PermissionKind) -> PermissionStatus {
        self.last
            .get(&kind)
            .copied()
            .unwrap_or(PermissionStatus::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use super::*;
    use crate::state::new_store;

    /// Checker answering from a table the test can rewrite
    struct TableChecker {
        table: Mutex<HashMap<PermissionKind, PermissionStatus>>,
    }

    impl TableChecker {
        fn set(&self, kind: PermissionKind, status: PermissionStatus) {
            self.table.lock().unwrap().insert(kind, status);
        }
    }

    #[async_trait]
    impl PermissionChecker for TableChecker {
        async fn check(&self, kind: PermissionKind) -> PermissionStatus {
            self.table
                .lock()
                .unwrap()
                .get(&kind)
                .copied()
                .unwrap_or(PermissionStatus::Unknown)
        }
    }

    fn create_monitor(
        first_run: bool,
    ) -> (
        PermissionMonitor,
        Arc<TableChecker>,
        SnapshotReader,
        broadcast::Receiver<BusEvent>,
    ) {
        let checker = Arc::new(TableChecker {
            table: Mutex::new(HashMap::new()),
        });
        checker.set(PermissionKind::Microphone, PermissionStatus::Denied);
        let bus = EventBus::new(32);
        let rx = bus.subscribe();
        let (reader, slots) = new_store(first_run);
        let monitor = PermissionMonitor::new(checker.clone(), bus, reader.clone(), slots.lifecycle);
        (monitor, checker, reader, rx)
    }

    fn changes(rx: &mut broadcast::Receiver<BusEvent>) -> Vec<(PermissionKind, PermissionStatus)> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                BusEvent::PermissionChanged { kind, status } => Some((kind, status)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_poll_reports_everything() {
        let (mut monitor, _checker, _reader, mut rx) = create_monitor(false);
        monitor.poll_once().await;

        let seen = changes(&mut rx);
        assert_eq!(seen.len(), PermissionKind::ALL.len());
        assert_eq!(monitor.status(PermissionKind::Microphone), PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn test_unchanged_status_not_republished() {
        let (mut monitor, _checker, _reader, mut rx) = create_monitor(false);
        monitor.poll_once().await;
        changes(&mut rx);

        monitor.poll_once().await;
        assert!(changes(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_grant_during_first_run_sets_restart_pending() {
        let (mut monitor, checker, reader, mut rx) = create_monitor(true);
        monitor.poll_once().await;
        changes(&mut rx);

        checker.set(PermissionKind::Microphone, PermissionStatus::Granted);
        monitor.poll_once().await;

        assert!(reader.snapshot().restart_pending);
        assert_eq!(
            changes(&mut rx),
            vec![(PermissionKind::Microphone, PermissionStatus::Granted)]
        );
    }

    #[tokio::test]
    async fn test_grant_after_first_run_needs_no_restart() {
        let (mut monitor, checker, reader, _rx) = create_monitor(false);
        monitor.poll_once().await;

        checker.set(PermissionKind::Microphone, PermissionStatus::Granted);
        monitor.poll_once().await;

        assert!(!reader.snapshot().restart_pending);
    }

    #[tokio::test]
    async fn test_granted_at_startup_needs_no_restart() {
        let (mut monitor, checker, reader, _rx) = create_monitor(true);
        checker.set(PermissionKind::Microphone, PermissionStatus::Granted);
        monitor.poll_once().await;

        assert!(!reader.snapshot().restart_pending);
    }
}
