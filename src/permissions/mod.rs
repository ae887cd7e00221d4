//! macOS permission state behind a capability interface

mod checker;
mod monitor;

pub use checker::{HelperPermissionChecker, PermissionChecker, PermissionKind, PermissionStatus};
pub use monitor::PermissionMonitor;
