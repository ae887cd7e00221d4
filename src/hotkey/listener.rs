//! Global push-to-talk listener using macOS CGEventTap
//!
//! Watches modifier flag changes system-wide and forwards edges of the PTT
//! key. Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::keys::{ModifierState, PttKey};
use super::{HotkeyError, HotkeyEvent};

pub struct HotkeyListener {
    event_tx: mpsc::Sender<HotkeyEvent>,
    key: PttKey,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new(event_tx: mpsc::Sender<HotkeyEvent>, key: PttKey) -> Self {
        Self {
            event_tx,
            key,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the listener thread. Runs until `stop()` is called.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);
        let key = self.key;

        thread::Builder::new()
            .name("ptt-listener".to_string())
            .spawn(move || {
                info!(?key, "push-to-talk listener thread started");

                if let Err(e) = run_event_loop(event_tx, key, running.clone()) {
                    error!(?e, "push-to-talk listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("push-to-talk listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    pub fn stop(&self) {
        // The run loop polls this flag every 100ms
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

enum TapMessage {
    Flags(CGEventFlags),
    Disabled,
}

fn run_event_loop(
    event_tx: mpsc::Sender<HotkeyEvent>,
    key: PttKey,
    running: Arc<AtomicBool>,
) -> Result<(), HotkeyError> {
    let mut last_state = ModifierState::default();

    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<TapMessage>();

    // Must stay fast and non-blocking
    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        match event_type {
            CGEventType::FlagsChanged => {
                let _ = callback_tx.send(TapMessage::Flags(event.get_flags()));
            }
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                let _ = callback_tx.send(TapMessage::Disabled);
            }
            _ => {}
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged],
        callback,
    )
    .map_err(|_| {
        error!("failed to create event tap - is Input Monitoring permission granted?");
        HotkeyError::EventTapCreation
    })?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HotkeyError::EventTapCreation)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(
                kCFRunLoopDefaultMode,
                std::time::Duration::from_millis(100),
                true,
            );
        }

        while let Ok(message) = callback_rx.try_recv() {
            let event = match message {
                TapMessage::Disabled => {
                    warn!("event tap disabled, re-enabling");
                    tap.enable();
                    Some(HotkeyEvent::TapDisabled)
                }
                TapMessage::Flags(flags) => {
                    let new_state = ModifierState::from_flags(flags);
                    let edge = new_state.edge(&last_state, key);
                    last_state = new_state;
                    edge.map(|down| {
                        debug!(?key, down, "push-to-talk edge");
                        if down {
                            HotkeyEvent::PttDown
                        } else {
                            HotkeyEvent::PttUp
                        }
                    })
                }
            };

            if let Some(event) = event {
                // Not in an async context, so block on the bounded channel
                if event_tx.blocking_send(event).is_err() {
                    warn!("push-to-talk channel closed, stopping listener");
                    return Err(HotkeyError::ChannelSend);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(32);
        let listener = HotkeyListener::new(tx, PttKey::Control);
        assert!(!listener.is_running());
    }
}
