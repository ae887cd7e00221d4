//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::hotkey::PttKey;

/// Marker written once the first run has completed
const FIRST_RUN_MARKER: &str = "first_run_complete";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Hold time after which a press counts as a long press
    pub long_press: Duration,

    /// How long to wait for the hardware to ack a microphone open
    pub open_timeout: Duration,

    /// How long to wait for the hardware to ack a microphone close
    pub close_timeout: Duration,

    pub permission_poll: Duration,

    /// Executable answering permission queries, `None` disables checks
    pub permission_helper: Option<PathBuf>,

    pub ptt_key: PttKey,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match lookup("NEXY_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home).join(".local").join("share").join("nexy")
            }
        };

        let socket_path = data_dir.join("daemon.sock");

        let ptt_key = match lookup("NEXY_PTT_KEY") {
            Some(raw) => raw
                .parse::<PttKey>()
                .map_err(anyhow::Error::msg)
                .context("invalid NEXY_PTT_KEY")?,
            None => PttKey::default(),
        };

        Ok(Self {
            socket_path,
            data_dir,
            long_press: millis(&lookup, "NEXY_LONG_PRESS_MS", 600)?,
            open_timeout: millis(&lookup, "NEXY_OPEN_TIMEOUT_MS", 3000)?,
            close_timeout: millis(&lookup, "NEXY_CLOSE_TIMEOUT_MS", 2000)?,
            permission_poll: Duration::from_secs(number(&lookup, "NEXY_PERMISSION_POLL_SECS", 5)?),
            permission_helper: lookup("NEXY_PERMISSION_HELPER").map(PathBuf::from),
            ptt_key,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    pub fn is_first_run(&self) -> bool {
        !self.marker_path().exists()
    }

    pub fn mark_first_run_complete(&self) -> Result<()> {
        std::fs::write(self.marker_path(), b"")
            .context("failed to write first run marker")?;
        Ok(())
    }

    fn marker_path(&self) -> PathBuf {
        self.data_dir.join(FIRST_RUN_MARKER)
    }
}

fn number<F>(lookup: &F, name: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}: `{raw}`")),
        None => Ok(default),
    }
}

fn millis<F>(lookup: &F, name: &str, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    number(lookup, name, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load_with(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load_with(&[("HOME", "/Users/test")]).unwrap();
        assert_eq!(
            config.socket_path,
            PathBuf::from("/Users/test/.local/share/nexy/daemon.sock")
        );
        assert_eq!(config.long_press, Duration::from_millis(600));
        assert_eq!(config.open_timeout, Duration::from_millis(3000));
        assert_eq!(config.close_timeout, Duration::from_millis(2000));
        assert_eq!(config.permission_poll, Duration::from_secs(5));
        assert_eq!(config.permission_helper, None);
        assert_eq!(config.ptt_key, PttKey::Control);
    }

    #[test]
    fn test_config_overrides() {
        let config = load_with(&[
            ("NEXY_DATA_DIR", "/tmp/nexy"),
            ("NEXY_LONG_PRESS_MS", "400"),
            ("NEXY_PTT_KEY", "option"),
            ("NEXY_PERMISSION_HELPER", "/usr/local/bin/nexy-tcc"),
        ])
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/nexy/daemon.sock"));
        assert_eq!(config.long_press, Duration::from_millis(400));
        assert_eq!(config.ptt_key, PttKey::Option);
        assert_eq!(
            config.permission_helper,
            Some(PathBuf::from("/usr/local/bin/nexy-tcc"))
        );
    }

    #[test]
    fn test_malformed_number_fails() {
        let err = load_with(&[("HOME", "/h"), ("NEXY_OPEN_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("NEXY_OPEN_TIMEOUT_MS"));
    }

    #[test]
    fn test_missing_home_fails() {
        assert!(load_with(&[]).is_err());
    }

    #[test]
    fn test_first_run_marker() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with(&[("NEXY_DATA_DIR", dir.path().to_str().unwrap())]).unwrap();

        assert!(config.is_first_run());
        config.mark_first_run_complete().unwrap();
        assert!(!config.is_first_run());
    }
}
