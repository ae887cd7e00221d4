//! Device & mode state coordination for the Nexy voice assistant
//!
//! Integrations read state through [`state::selectors`] over snapshots from a
//! [`state::SnapshotReader`] and talk to the daemon through [`events::EventBus`]
//! topics. Each bus topic has one canonical publisher.

pub mod config;
pub mod error;
pub mod events;
pub mod hotkey;
pub mod ipc;
pub mod lifecycle;
pub mod microphone;
pub mod mode;
pub mod permissions;
pub mod state;
