use std::{io::ErrorKind, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";

/// Granularity of the display refresh.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);
/// How long after our own write a change notification is taken to be its echo.
pub const DEFAULT_ECHO_WINDOW: Duration = Duration::from_millis(100);
/// Inactivity after which pending task time is written out.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(500);
/// How often a long running observer rereads a file store for foreign writes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tick_interval_ms: u64,
    pub echo_window_ms: u64,
    pub batch_window_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            echo_window_ms: DEFAULT_ECHO_WINDOW.as_millis() as u64,
            batch_window_ms: DEFAULT_BATCH_WINDOW.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl AppConfig {
    /// Reads `config.json` from the application directory. A missing file means defaults.
    pub fn load(app_dir: &Path) -> Result<Self> {
        let path = app_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Invalid configuration in {path:?}")),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No configuration at {path:?}, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {path:?}")),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = AppConfig::load(dir.path())?;
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.tick_interval(), DEFAULT_TICK_INTERVAL);
        assert_eq!(config.batch_window(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn test_partial_config() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"batch_window_ms": 2000}"#)?;
        let config = AppConfig::load(dir.path())?;
        assert_eq!(config.batch_window(), Duration::from_secs(2));
        assert_eq!(config.echo_window(), DEFAULT_ECHO_WINDOW);
        Ok(())
    }
}
