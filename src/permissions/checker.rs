//! Permission capability interface
//!
//! TCC queries can take the calling process down when they misbehave, so the
//! real check runs in a helper executable and only its answer crosses back.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Microphone,
    Accessibility,
    InputMonitoring,
    ScreenCapture,
}

impl PermissionKind {
    pub const ALL: [PermissionKind; 4] = [
        PermissionKind::Microphone,
        PermissionKind::Accessibility,
        PermissionKind::InputMonitoring,
        PermissionKind::ScreenCapture,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKind::Microphone => "microphone",
            PermissionKind::Accessibility => "accessibility",
            PermissionKind::InputMonitoring => "input_monitoring",
            PermissionKind::ScreenCapture => "screen_capture",
        }
    }

    /// Kinds whose first grant only takes effect after a restart
    pub fn needs_restart_on_grant(self) -> bool {
        matches!(self, PermissionKind::Microphone | PermissionKind::Accessibility)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Unknown,
}

impl PermissionStatus {
    fn from_helper_output(stdout: &str) -> Self {
        match stdout.trim().to_ascii_lowercase().as_str() {
            "granted" => PermissionStatus::Granted,
            "denied" => PermissionStatus::Denied,
            _ => PermissionStatus::Unknown,
        }
    }
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Never fails; anything inconclusive is `Unknown`.
    async fn check(&self, kind: PermissionKind) -> PermissionStatus;
}

/// Runs `<helper> <kind>` and reads the verdict from stdout
pub struct HelperPermissionChecker {
    helper: Option<PathBuf>,
    timeout: Duration,
}

impl HelperPermissionChecker {
    pub fn new(helper: Option<PathBuf>, timeout: Duration) -> Self {
        Self { helper, timeout }
    }
}

#[async_trait]
impl PermissionChecker for HelperPermissionChecker {
    async fn check(&self, kind: PermissionKind) -> PermissionStatus {
        let Some(helper) = &self.helper else {
            return PermissionStatus::Unknown;
        };

        let child = Command::new(helper)
            .arg(kind.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, ?helper, kind = kind.as_str(), "permission helper failed to run");
                return PermissionStatus::Unknown;
            }
            Err(_) => {
                warn!(?helper, kind = kind.as_str(), "permission helper timed out");
                return PermissionStatus::Unknown;
            }
        };

        if !output.status.success() {
            warn!(status = %output.status, kind = kind.as_str(), "permission helper exited with error");
            return PermissionStatus::Unknown;
        }

        let status = PermissionStatus::from_helper_output(&String::from_utf8_lossy(&output.stdout));
        debug!(kind = kind.as_str(), ?status, "permission checked");
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_output_parsing() {
        assert_eq!(PermissionStatus::from_helper_output("granted\n"), PermissionStatus::Granted);
        assert_eq!(PermissionStatus::from_helper_output(" DENIED "), PermissionStatus::Denied);
        assert_eq!(PermissionStatus::from_helper_output("maybe"), PermissionStatus::Unknown);
        assert_eq!(PermissionStatus::from_helper_output(""), PermissionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_no_helper_is_unknown() {
        let checker = HelperPermissionChecker::new(None, Duration::from_secs(1));
        assert_eq!(
            checker.check(PermissionKind::Microphone).await,
            PermissionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_missing_helper_binary_is_unknown() {
        let checker = HelperPermissionChecker::new(
            Some(PathBuf::from("/nonexistent/nexy-permission-helper")),
            Duration::from_secs(1),
        );
        assert_eq!(
            checker.check(PermissionKind::Accessibility).await,
            PermissionStatus::Unknown
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_script_verdict() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("helper.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nif [ \"$1\" = microphone ]; then echo granted; else echo denied; fi\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let checker = HelperPermissionChecker::new(Some(script), Duration::from_secs(5));
        assert_eq!(
            checker.check(PermissionKind::Microphone).await,
            PermissionStatus::Granted
        );
        assert_eq!(
            checker.check(PermissionKind::ScreenCapture).await,
            PermissionStatus::Denied
        );
    }
}
