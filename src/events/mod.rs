//! Bus events and their ownership table
//!
//! Every event kind has exactly one canonical publisher. The bus refuses
//! publications from any other component, which is what keeps
//! `voice.mic_opened` / `voice.mic_closed` single-sourced.

mod bus;

pub use bus::{next_event, EventBus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mode::PttSignal;
use crate::permissions::{PermissionKind, PermissionStatus};
use crate::state::AppMode;

/// Components allowed to publish on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    MicrophoneManager,
    ModeCoordinator,
    ModeAuthority,
    PermissionMonitor,
    /// Push-to-talk key source (hotkey listener or a UI forwarding it)
    Input,
    /// Physical audio device driver
    AudioDevice,
    /// Speech pipeline (STT/LLM/TTS)
    Pipeline,
    /// Menu-bar UI
    Ui,
}

impl Component {
    /// Components that live outside the daemon and may publish over IPC
    pub fn is_external(self) -> bool {
        matches!(
            self,
            Component::Input | Component::AudioDevice | Component::Pipeline | Component::Ui
        )
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Component::MicrophoneManager => "microphone_manager",
            Component::ModeCoordinator => "mode_coordinator",
            Component::ModeAuthority => "mode_authority",
            Component::PermissionMonitor => "permission_monitor",
            Component::Input => "input",
            Component::AudioDevice => "audio_device",
            Component::Pipeline => "pipeline",
            Component::Ui => "ui",
        };
        f.write_str(name)
    }
}

/// Where a microphone lifecycle event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Acknowledged by the audio device
    Hardware,
    /// Closed without waiting for the audio device
    Forced,
}

/// Events carried by the bus, tagged by topic name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum BusEvent {
    #[serde(rename = "voice.recording_start")]
    RecordingStart { session_id: String },

    #[serde(rename = "voice.recording_stop")]
    RecordingStop { session_id: String },

    /// Immediate UI feedback at recording start. Not authoritative.
    #[serde(rename = "voice.mic_provisional")]
    MicProvisional { session_id: String },

    #[serde(rename = "voice.mic_opened")]
    MicOpened {
        session_id: String,
        timestamp: DateTime<Utc>,
        source: EventSource,
    },

    #[serde(rename = "voice.mic_closed")]
    MicClosed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        timestamp: DateTime<Utc>,
        source: EventSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "microphone.open_requested")]
    OpenRequested {
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "microphone.close_requested")]
    CloseRequested {
        #[serde(default)]
        force: bool,
    },

    /// Hardware ack: device is capturing
    #[serde(rename = "microphone.opened")]
    HardwareOpened { session_id: String },

    /// Hardware ack: device released
    #[serde(rename = "microphone.closed")]
    HardwareClosed { session_id: String },

    /// Command to the audio device
    #[serde(rename = "microphone.device_open")]
    DeviceOpen { session_id: String },

    /// Command to the audio device
    #[serde(rename = "microphone.device_close")]
    DeviceClose { session_id: String },

    #[serde(rename = "input.ptt")]
    Ptt { signal: PttSignal },

    #[serde(rename = "input.interrupt")]
    Interrupt,

    #[serde(rename = "assistant.response_complete")]
    ResponseComplete,

    #[serde(rename = "playback.finished")]
    PlaybackFinished,

    #[serde(rename = "mode.request")]
    ModeRequest {
        target_mode: AppMode,
        #[serde(default)]
        interrupt: bool,
        reason: String,
    },

    #[serde(rename = "app.mode_changed")]
    ModeChanged { mode: AppMode, previous: AppMode },

    #[serde(rename = "permissions.changed")]
    PermissionChanged {
        kind: PermissionKind,
        status: PermissionStatus,
    },
}

impl BusEvent {
    /// Topic name as seen by subscribers
    pub fn topic(&self) -> &'static str {
        match self {
            BusEvent::RecordingStart { .. } => "voice.recording_start",
            BusEvent::RecordingStop { .. } => "voice.recording_stop",
            BusEvent::MicProvisional { .. } => "voice.mic_provisional",
            BusEvent::MicOpened { .. } => "voice.mic_opened",
            BusEvent::MicClosed { .. } => "voice.mic_closed",
            BusEvent::OpenRequested { .. } => "microphone.open_requested",
            BusEvent::CloseRequested { .. } => "microphone.close_requested",
            BusEvent::HardwareOpened { .. } => "microphone.opened",
            BusEvent::HardwareClosed { .. } => "microphone.closed",
            BusEvent::DeviceOpen { .. } => "microphone.device_open",
            BusEvent::DeviceClose { .. } => "microphone.device_close",
            BusEvent::Ptt { .. } => "input.ptt",
            BusEvent::Interrupt => "input.interrupt",
            BusEvent::ResponseComplete => "assistant.response_complete",
            BusEvent::PlaybackFinished => "playback.finished",
            BusEvent::ModeRequest { .. } => "mode.request",
            BusEvent::ModeChanged { .. } => "app.mode_changed",
            BusEvent::PermissionChanged { .. } => "permissions.changed",
        }
    }

    /// The only component allowed to publish this event
    pub fn owner(&self) -> Component {
        match self {
            BusEvent::MicOpened { .. }
            | BusEvent::MicClosed { .. }
            | BusEvent::DeviceOpen { .. }
            | BusEvent::DeviceClose { .. } => Component::MicrophoneManager,

            BusEvent::RecordingStart { .. }
            | BusEvent::RecordingStop { .. }
            | BusEvent::MicProvisional { .. }
            | BusEvent::ModeRequest { .. } => Component::ModeCoordinator,

            BusEvent::ModeChanged { .. } => Component::ModeAuthority,
            BusEvent::PermissionChanged { .. } => Component::PermissionMonitor,

            BusEvent::Ptt { .. } | BusEvent::Interrupt => Component::Input,

            BusEvent::HardwareOpened { .. } | BusEvent::HardwareClosed { .. } => {
                Component::AudioDevice
            }

            BusEvent::ResponseComplete | BusEvent::PlaybackFinished => Component::Pipeline,

            BusEvent::OpenRequested { .. } | BusEvent::CloseRequested { .. } => Component::Ui,
        }
    }
}

impl std::fmt::Display for BusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusEvent::RecordingStart { session_id }
            | BusEvent::RecordingStop { session_id }
            | BusEvent::MicProvisional { session_id }
            | BusEvent::MicOpened { session_id, .. }
            | BusEvent::HardwareOpened { session_id }
            | BusEvent::HardwareClosed { session_id }
            | BusEvent::DeviceOpen { session_id }
            | BusEvent::DeviceClose { session_id } => {
                write!(f, "{} ({})", self.topic(), session_id)
            }
            BusEvent::MicClosed {
                session_id, reason, ..
            } => write!(
                f,
                "{} ({}, reason={})",
                self.topic(),
                session_id.as_deref().unwrap_or("-"),
                reason.as_deref().unwrap_or("-")
            ),
            BusEvent::ModeRequest {
                target_mode,
                interrupt,
                ..
            } => write!(f, "{} ({}, interrupt={})", self.topic(), target_mode, interrupt),
            BusEvent::ModeChanged { mode, previous } => {
                write!(f, "{} ({} -> {})", self.topic(), previous, mode)
            }
            _ => f.write_str(self.topic()),
        }
    }
}
