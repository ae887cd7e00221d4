//! Push-to-talk key selection and modifier tracking
//!
//! The PTT key is one of the macOS modifier keys. `ModifierState` records
//! which modifiers are down so the listener can detect edges on the chosen
//! one.

use std::str::FromStr;

#[cfg(target_os = "macos")]
use core_graphics::event::CGEventFlags;

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
}

/// Modifier used as the push-to-talk key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PttKey {
    #[default]
    Control,
    Option,
    Command,
}

impl FromStr for PttKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "control" | "ctrl" => Ok(PttKey::Control),
            "option" | "alt" => Ok(PttKey::Option),
            "command" | "cmd" => Ok(PttKey::Command),
            other => Err(format!("unknown push-to-talk key `{other}`")),
        }
    }
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

impl ModifierState {
    #[cfg(target_os = "macos")]
    pub fn from_flags(flags: CGEventFlags) -> Self {
        Self {
            control: flags.contains(flags::CONTROL),
            option: flags.contains(flags::OPTION),
            command: flags.contains(flags::COMMAND),
        }
    }

    pub fn is_held(&self, key: PttKey) -> bool {
        match key {
            PttKey::Control => self.control,
            PttKey::Option => self.option,
            PttKey::Command => self.command,
        }
    }

    /// `Some(true)` on press, `Some(false)` on release, `None` when `key`
    /// did not change between `prev` and `self`.
    pub fn edge(&self, prev: &ModifierState, key: PttKey) -> Option<bool> {
        let now = self.is_held(key);
        (now != prev.is_held(key)).then_some(now)
    }
}
