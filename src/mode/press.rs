//! Push-to-talk press classification
//!
//! Turns raw key down/up edges into `press`, `long_press`, `short_press`
//! and `release` signals. A hold that crosses the threshold fires
//! `long_press` while the key is still down; letting go earlier yields
//! `short_press`. Every press ends with `release`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{BusEvent, Component, EventBus};
use crate::hotkey::HotkeyEvent;

/// Push-to-talk input signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PttSignal {
    Press,
    LongPress,
    ShortPress,
    Release,
}

pub struct PressClassifier {
    bus: EventBus,
    long_press: Duration,
}

impl PressClassifier {
    pub fn new(bus: EventBus, long_press: Duration) -> Self {
        Self { bus, long_press }
    }

    pub async fn run(self, mut hotkey_rx: mpsc::Receiver<HotkeyEvent>) {
        info!(threshold_ms = self.long_press.as_millis() as u64, "press classifier started");

        // Some(deadline) while held and long press not yet fired
        let mut deadline: Option<Instant> = None;
        let mut held = false;

        loop {
            tokio::select! {
                event = hotkey_rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        HotkeyEvent::PttDown if !held => {
                            held = true;
                            deadline = Some(Instant::now() + self.long_press);
                            self.emit(PttSignal::Press);
                        }
                        HotkeyEvent::PttUp if held => {
                            held = false;
                            if deadline.take().is_some() {
                                self.emit(PttSignal::ShortPress);
                            }
                            self.emit(PttSignal::Release);
                        }
                        HotkeyEvent::PttDown | HotkeyEvent::PttUp => {
                            debug!(?event, "ignoring repeated key edge");
                        }
                        HotkeyEvent::TapDisabled => {
                            warn!("hotkey tap disabled, events may be missed");
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    deadline = None;
                    self.emit(PttSignal::LongPress);
                }
            }
        }

        info!("press classifier stopped");
    }

    fn emit(&self, signal: PttSignal) {
        self.bus.publish(Component::Input, BusEvent::Ptt { signal });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    use crate::events::next_event;

    fn spawn_classifier() -> (mpsc::Sender<HotkeyEvent>, broadcast::Receiver<BusEvent>) {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        let (tx, hotkey_rx) = mpsc::channel(8);
        tokio::spawn(PressClassifier::new(bus, Duration::from_millis(600)).run(hotkey_rx));
        (tx, rx)
    }

    async fn next_signal(rx: &mut broadcast::Receiver<BusEvent>) -> PttSignal {
        match next_event(rx).await {
            Some(BusEvent::Ptt { signal }) => signal,
            other => panic!("expected ptt signal, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_tap_is_short_press() {
        let (tx, mut rx) = spawn_classifier();

        tx.send(HotkeyEvent::PttDown).await.unwrap();
        assert_eq!(next_signal(&mut rx).await, PttSignal::Press);
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(HotkeyEvent::PttUp).await.unwrap();

        assert_eq!(next_signal(&mut rx).await, PttSignal::ShortPress);
        assert_eq!(next_signal(&mut rx).await, PttSignal::Release);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_is_long_press() {
        let (tx, mut rx) = spawn_classifier();

        tx.send(HotkeyEvent::PttDown).await.unwrap();
        assert_eq!(next_signal(&mut rx).await, PttSignal::Press);
        assert_eq!(next_signal(&mut rx).await, PttSignal::LongPress);

        tx.send(HotkeyEvent::PttUp).await.unwrap();
        assert_eq!(next_signal(&mut rx).await, PttSignal::Release);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_down_edges_ignored() {
        let (tx, mut rx) = spawn_classifier();

        tx.send(HotkeyEvent::PttDown).await.unwrap();
        tx.send(HotkeyEvent::PttDown).await.unwrap();
        tx.send(HotkeyEvent::PttUp).await.unwrap();

        assert_eq!(next_signal(&mut rx).await, PttSignal::Press);
        assert_eq!(next_signal(&mut rx).await, PttSignal::ShortPress);
        assert_eq!(next_signal(&mut rx).await, PttSignal::Release);
    }
}
