//! Configuration for the ledger store

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store name (used in log fields)
    pub store_name: String,

    /// How long a row-lock request may block before `LockWaitTimeout`
    pub lock_wait_timeout_ms: u64,

    /// Walk the wait-for graph before blocking on a row lock.
    /// When disabled, cycles are only broken by the lock-wait timeout.
    pub deadlock_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_name: "ledger-core".to_string(),
            lock_wait_timeout_ms: 1_000,
            deadlock_detection: true,
        }
    }
}

impl Config {
    /// Lock-wait timeout as a `Duration`
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_WAIT_TIMEOUT_MS") {
            config.lock_wait_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_LOCK_WAIT_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(flag) = std::env::var("LEDGER_DEADLOCK_DETECTION") {
            config.deadlock_detection = flag.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_DEADLOCK_DETECTION: {}", e))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store_name, "ledger-core");
        assert_eq!(config.lock_wait_timeout(), Duration::from_secs(1));
        assert!(config.deadlock_detection);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lock_wait_timeout_ms = 250").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.lock_wait_timeout_ms, 250);
        assert!(config.deadlock_detection);
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lock_wait_timeout_ms = \"soon\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
