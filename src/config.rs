//! Engine Configuration
//!
//! Tunables for the orchestration engine. Every field has a default so
//! a configuration file only needs to name what it changes.
//!
//! ```yaml
//! worker_threads: 8
//! default_timeout_secs: 3600
//! poll_interval_ms: 50
//! state_dir: .planrunner
//! transaction_retry:
//!   max_attempts: 5
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::store::RetryPolicy;

/// Default node timeout when a plan node declares none: one day.
pub const DEFAULT_TIMEOUT_SECS: u64 = 86_400;

/// Default interval used by completion polling.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Runtime configuration for the engine and service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of transitions that may run at the same time
    pub worker_threads: usize,

    /// Timeout applied to nodes without their own timeout obtainments
    pub default_timeout_secs: u64,

    /// Backoff policy for store transactions
    pub transaction_retry: RetryPolicy,

    /// How often `wait_for_completion` re-reads the plan execution
    pub poll_interval_ms: u64,

    /// Directory for durable snapshots; in-memory only when unset
    pub state_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get().max(2),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            transaction_retry: RetryPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            state_dir: None,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration file and validates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;

        let config: EngineConfig = serde_yaml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse '{}': {}", path.display(), e))
        })?;

        config.validate()?;
        debug!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Checks that every tunable is usable.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(EngineError::Config("worker_threads must be at least 1".into()));
        }
        if self.default_timeout_secs == 0 {
            return Err(EngineError::Config(
                "default_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.transaction_retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "transaction_retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Default node timeout in milliseconds.
    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_secs.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads >= 2);
        assert_eq!(config.default_timeout_ms(), 86_400_000);
    }

    #[test]
    fn test_load_partial_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "worker_threads: 3").unwrap();
        writeln!(file, "transaction_retry:").unwrap();
        writeln!(file, "  max_attempts: 7").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.transaction_retry.max_attempts, 7);
        assert_eq!(config.default_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_load_rejects_zero_workers() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "worker_threads: 0").unwrap();

        let result = EngineConfig::load(file.path());
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = EngineConfig::load("/nonexistent/planrunner.yaml");
        assert!(result.is_err());
    }
}
