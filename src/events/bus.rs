//! In-process publish/subscribe channel

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::{BusEvent, Component};

/// Broadcast bus shared by every component
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publish `event` on behalf of `from`.
    ///
    /// Returns `false` when `from` is not the canonical publisher of the
    /// event; the event is dropped in that case.
    pub fn publish(&self, from: Component, event: BusEvent) -> bool {
        let owner = event.owner();
        if owner != from {
            error!(
                topic = event.topic(),
                %from,
                %owner,
                "rejected publication from non-canonical publisher"
            );
            return false;
        }

        debug!(%event, "publishing");
        // No subscribers is not an error
        let _ = self.tx.send(event);
        true
    }
}

/// Receive the next event, skipping over lag gaps.
///
/// Returns `None` once the bus is closed.
pub async fn next_event(rx: &mut broadcast::Receiver<BusEvent>) -> Option<BusEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "bus receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
