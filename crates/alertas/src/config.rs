//! Engine configuration.
//!
//! Defaults are overridable via environment variables; CLI flags take
//! precedence over both.

use std::path::PathBuf;
use std::time::Duration;

use crate::classifier::Thresholds;
use crate::orchestrator::BatchConfig;
use crate::store::retention::DEFAULT_RETENTION_DAYS;

const ENV_DB: &str = "ALERTAS_DB";
const ENV_ADDR: &str = "ALERTAS_ADDR";
const ENV_BATCH_SIZE: &str = "ALERTAS_BATCH_SIZE";
const ENV_BATCH_PAUSE_MS: &str = "ALERTAS_BATCH_PAUSE_MS";
const ENV_PROJECT_TIMEOUT_SECS: &str = "ALERTAS_PROJECT_TIMEOUT_SECS";
const ENV_RETENTION_DAYS: &str = "ALERTAS_RETENTION_DAYS";

/// Runtime configuration assembled from defaults and environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// HTTP bind address.
    pub bind_addr: String,
    /// Batch pacing.
    pub batch: BatchConfig,
    /// System-default thresholds for projects without a configuration.
    pub default_thresholds: Thresholds,
    /// Days a terminal alert is retained before pruning.
    pub retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("alertas.db"),
            bind_addr: "0.0.0.0:8080".to_string(),
            batch: BatchConfig::default(),
            default_thresholds: Thresholds::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(db) = std::env::var(ENV_DB) {
            config.db_path = PathBuf::from(db);
        }
        if let Ok(addr) = std::env::var(ENV_ADDR) {
            config.bind_addr = addr;
        }
        if let Some(size) = parse_env(ENV_BATCH_SIZE) {
            config.batch.batch_size = size;
        }
        if let Some(ms) = parse_env(ENV_BATCH_PAUSE_MS) {
            config.batch.batch_pause = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_env(ENV_PROJECT_TIMEOUT_SECS) {
            config.batch.project_timeout = Duration::from_secs(secs);
        }
        if let Some(days) = parse_env(ENV_RETENTION_DAYS) {
            config.retention_days = days;
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch.batch_size, 5);
        assert_eq!(config.batch.batch_pause, Duration::from_secs(1));
        assert_eq!(config.retention_days, 90);
        assert!((config.default_thresholds.threshold_baixo - 5.0).abs() < f64::EPSILON);
    }
}
