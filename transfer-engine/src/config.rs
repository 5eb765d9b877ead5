//! Configuration for the transfer engine

use crate::retry::RetryPolicy;
use ledger_core::IsolationLevel;
use serde::{Deserialize, Serialize};

/// Transfer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Isolation level used when a caller does not pick one
    pub default_isolation: IsolationLevel,

    /// Retry/backoff policy for mutating operations
    pub retry: RetryPolicy,

    /// Ledger store configuration
    pub store: ledger_core::Config,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Workload used by the demo binary
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "transfer-engine".to_string(),
            default_isolation: IsolationLevel::ReadCommitted,
            retry: RetryPolicy::default(),
            store: ledger_core::Config::default(),
            logging: LoggingConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Demo workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Accounts to seed
    pub accounts: u64,

    /// Opening balance of every seeded account (minor units)
    pub initial_balance: i64,

    /// Random transfers to fire
    pub transfers: usize,

    /// Worker threads
    pub threads: usize,

    /// Upper bound for a random transfer amount
    pub max_amount: i64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            accounts: 8,
            initial_balance: 100_000,
            transfers: 400,
            threads: 8,
            max_amount: 5_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(name) = std::env::var("TRANSFER_ENGINE_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(isolation) = std::env::var("TRANSFER_ENGINE_ISOLATION") {
            config.default_isolation = isolation
                .parse()
                .map_err(|e| crate::Error::Config(format!("TRANSFER_ENGINE_ISOLATION: {}", e)))?;
        }

        if let Ok(attempts) = std::env::var("TRANSFER_ENGINE_MAX_ATTEMPTS") {
            config.retry.max_attempts = parse_var("TRANSFER_ENGINE_MAX_ATTEMPTS", &attempts)?;
        }

        if let Ok(delay) = std::env::var("TRANSFER_ENGINE_INITIAL_DELAY_MS") {
            config.retry.initial_delay_ms = parse_var("TRANSFER_ENGINE_INITIAL_DELAY_MS", &delay)?;
        }

        if let Ok(timeout) = std::env::var("TRANSFER_ENGINE_OVERALL_TIMEOUT_MS") {
            config.retry.overall_timeout_ms =
                parse_var("TRANSFER_ENGINE_OVERALL_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(timeout) = std::env::var("TRANSFER_ENGINE_LOCK_WAIT_TIMEOUT_MS") {
            config.store.lock_wait_timeout_ms =
                parse_var("TRANSFER_ENGINE_LOCK_WAIT_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(level) = std::env::var("TRANSFER_ENGINE_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(json) = std::env::var("TRANSFER_ENGINE_LOG_JSON") {
            config.logging.json = parse_var("TRANSFER_ENGINE_LOG_JSON", &json)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> crate::Result<()> {
        self.retry.validate()?;
        if self.demo.threads == 0 {
            return Err(crate::Error::Config("demo.threads must be at least 1".to_string()));
        }
        if self.demo.accounts < 2 {
            return Err(crate::Error::Config(
                "demo.accounts must be at least 2".to_string(),
            ));
        }
        if self.demo.initial_balance < 0 || self.demo.max_amount <= 0 {
            return Err(crate::Error::Config(
                "demo balances and amounts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> crate::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "transfer-engine");
        assert_eq!(config.default_isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_isolation = "serializable"

[retry]
max_attempts = 8
initial_delay_ms = 2

[store]
lock_wait_timeout_ms = 250

[logging]
json = true
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.default_isolation, IsolationLevel::Serializable);
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.initial_delay_ms, 2);
        assert_eq!(config.retry.multiplier, 2.0);
        assert_eq!(config.store.lock_wait_timeout_ms, 250);
        assert!(config.logging.json);
        assert_eq!(config.demo.accounts, 8);
    }

    #[test]
    fn test_from_file_rejects_invalid_policy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 0").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            Config::from_file("/nonexistent/transfer-engine.toml"),
            Err(crate::Error::Io(_))
        ));
    }
}
