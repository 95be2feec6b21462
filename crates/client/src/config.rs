//! Client configuration
//!
//! Timings and retry budgets, loadable from a TOML file with sensible
//! defaults for every field.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for one client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Heartbeat write period, seconds.
    pub heartbeat_secs: u64,
    /// Staleness window for the reconciler's abandoned-duplicate rule,
    /// seconds.
    pub stale_secs: u64,
    /// Attempt budget shared by every write/transaction site.
    pub retry_max_attempts: u32,
    /// First backoff delay, milliseconds; doubles per attempt.
    pub retry_base_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 5,
            stale_secs: 45,
            retry_max_attempts: 4,
            retry_base_ms: 250,
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file; absent file means defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Offline threshold: three missed heartbeats.
    pub fn offline_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(3 * self.heartbeat_secs as i64)
    }

    pub fn stale_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat_secs, 5);
        assert_eq!(config.offline_after(), chrono::Duration::seconds(15));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(dir.path().join("deckroom.toml")).unwrap();
        assert_eq!(config.retry_max_attempts, 4);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deckroom.toml");
        std::fs::write(&path, "heartbeat_secs = 2\n").unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.heartbeat_secs, 2);
        assert_eq!(config.offline_after(), chrono::Duration::seconds(6));
        // Untouched fields keep their defaults
        assert_eq!(config.retry_base_ms, 250);
    }
}
