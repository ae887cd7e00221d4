//! nexy-coordinator: microphone and mode state daemon for the Nexy assistant
//!
//! This daemon runs as a LaunchAgent next to the menu bar app and provides:
//! - The microphone lifecycle state machine, sole source of
//!   `voice.mic_opened` / `voice.mic_closed`
//! - Push-to-talk driven mode requests and the single mode writer
//! - Read-only state snapshots for integrations
//! - Permission polling with the first-run restart flow
//! - IPC server for the menu bar app, audio device and speech pipeline

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nexy_coordinator::config::Config;
use nexy_coordinator::events::EventBus;
use nexy_coordinator::ipc::Server;
use nexy_coordinator::lifecycle::ShutdownSignal;
use nexy_coordinator::microphone::{MicrophoneBridge, MicrophoneManager};
use nexy_coordinator::mode::{ModeCoordinator, PressClassifier};
use nexy_coordinator::permissions::{HelperPermissionChecker, PermissionChecker, PermissionMonitor};
use nexy_coordinator::state::{new_store, selectors, ModeAuthority, StateSlots};

/// Bus capacity before slow subscribers start lagging
const BUS_CAPACITY: usize = 256;

/// Upper bound for a single permission helper run
const PERMISSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "nexy-coordinator starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    let first_run = config.is_first_run();
    info!(?config.socket_path, first_run, "configuration loaded");

    let shutdown = ShutdownSignal::new();
    let bus = EventBus::new(BUS_CAPACITY);
    let (reader, slots) = new_store(first_run);
    let StateSlots {
        mic,
        mode,
        input,
        lifecycle,
    } = slots;

    let manager = Arc::new(MicrophoneManager::new(bus.clone(), mic, reader.clone()));
    let bridge = MicrophoneBridge::new(
        Arc::clone(&manager),
        config.open_timeout,
        config.close_timeout,
    );
    let authority = ModeAuthority::new(bus.clone(), mode);
    let coordinator = ModeCoordinator::new(bus.clone(), reader.clone(), input);

    let checker: Arc<dyn PermissionChecker> = Arc::new(HelperPermissionChecker::new(
        config.permission_helper.clone(),
        PERMISSION_CHECK_TIMEOUT,
    ));
    let monitor = PermissionMonitor::new(checker, bus.clone(), reader.clone(), lifecycle);

    // Hotkey listener -> press classifier
    let (hotkey_tx, hotkey_rx) = mpsc::channel(32);
    let classifier = PressClassifier::new(bus.clone(), config.long_press);

    #[cfg(target_os = "macos")]
    let hotkey_listener = {
        let listener = nexy_coordinator::hotkey::HotkeyListener::new(hotkey_tx.clone(), config.ptt_key);
        match listener.start() {
            Ok(()) => info!(key = ?config.ptt_key, "push-to-talk listener started"),
            Err(e) => {
                error!(?e, "failed to start push-to-talk listener");
                warn!("continuing without hotkey support - check Input Monitoring permission");
            }
        }
        listener
    };
    #[cfg(not(target_os = "macos"))]
    info!(key = ?config.ptt_key, "no native push-to-talk listener, expecting input over IPC");

    // Subscribe everyone before anything can publish
    let bridge_rx = bus.subscribe();
    let authority_rx = bus.subscribe();
    let coordinator_rx = bus.subscribe();

    let server = Server::new(&config.socket_path, bus.clone(), reader.clone())?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = bridge.run(bridge_rx) => {
            info!("microphone bridge exited");
        }
        _ = authority.run(authority_rx) => {
            info!("mode authority exited");
        }
        _ = coordinator.run(coordinator_rx) => {
            info!("mode coordinator exited");
        }
        _ = classifier.run(hotkey_rx) => {
            info!("press classifier exited");
        }
        _ = monitor.run(config.permission_poll) => {
            info!("permission monitor exited");
        }
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    if selectors::is_mic_busy(&reader.snapshot()) {
        manager.force_close_internal("shutdown").await;
    }

    #[cfg(target_os = "macos")]
    hotkey_listener.stop();
    drop(hotkey_tx);

    server.shutdown().await;

    if first_run {
        if let Err(e) = config.mark_first_run_complete() {
            warn!(?e, "failed to record first run completion");
        }
    }

    info!("nexy-coordinator stopped");

    Ok(())
}
