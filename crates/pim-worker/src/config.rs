//! Worker configuration
//!
//! Reads the fixed set of recognized environment options, applying defaults
//! for the tunables. Missing required values and malformed numbers are
//! startup errors: the process logs a descriptive message and exits non-zero
//! rather than running with a half-applied configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::storage::StorageConfig;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default sleep between idle poll iterations, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default missed-heartbeat age before a `parsing` batch is considered stale.
pub const DEFAULT_HEARTBEAT_STALE_SECS: u64 = 300;

/// Default number of claims before a batch is permanently failed.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Default number of processed rows accumulated before a flush.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default per-statement database timeout, in seconds.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;

/// Default lifetime of presigned download URLs, in seconds.
pub const DEFAULT_SIGNED_URL_EXPIRY_SECS: u64 = 600;

/// Default port for the health endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 8210;

/// Default hard per-batch row cap.
pub const DEFAULT_MAX_ROWS: u64 = 10_001;

/// Default maximum database connections. The worker runs one batch at a
/// time, so the pool stays small.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
}

/// Worker loop and pipeline tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identifier stamped on claims, heartbeats and every log record.
    pub worker_id: String,
    pub poll_interval_secs: u64,
    pub heartbeat_stale_secs: u64,
    pub max_attempts: i32,
    pub chunk_size: usize,
    pub signed_url_expiry_secs: u64,
    pub health_port: u16,
    pub max_rows: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub statement_timeout_secs: u64,
}

impl Config {
    /// Load configuration from the environment (after a `.env` pre-load).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            worker: WorkerConfig {
                worker_id: std::env::var("WORKER_ID")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .unwrap_or_else(generate_worker_id),
                poll_interval_secs: env_parse(
                    "IMPORT_POLL_INTERVAL_SECS",
                    DEFAULT_POLL_INTERVAL_SECS,
                )?,
                heartbeat_stale_secs: env_parse(
                    "IMPORT_HEARTBEAT_STALE_SECS",
                    DEFAULT_HEARTBEAT_STALE_SECS,
                )?,
                max_attempts: env_parse("IMPORT_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                chunk_size: env_parse("IMPORT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
                signed_url_expiry_secs: env_parse(
                    "IMPORT_SIGNED_URL_EXPIRY_SECS",
                    DEFAULT_SIGNED_URL_EXPIRY_SECS,
                )?,
                health_port: env_parse("IMPORT_HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
                max_rows: env_parse("IMPORT_MAX_ROWS", DEFAULT_MAX_ROWS)?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .context("DATABASE_URL must be set")?,
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                statement_timeout_secs: env_parse(
                    "IMPORT_STATEMENT_TIMEOUT_SECS",
                    DEFAULT_STATEMENT_TIMEOUT_SECS,
                )?,
            },
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.database.statement_timeout_secs == 0 {
            anyhow::bail!("IMPORT_STATEMENT_TIMEOUT_SECS must be greater than 0");
        }
        if self.worker.worker_id.trim().is_empty() {
            anyhow::bail!("WORKER_ID cannot be empty");
        }
        if self.worker.poll_interval_secs == 0 {
            anyhow::bail!("IMPORT_POLL_INTERVAL_SECS must be greater than 0");
        }
        if self.worker.heartbeat_stale_secs == 0 {
            anyhow::bail!("IMPORT_HEARTBEAT_STALE_SECS must be greater than 0");
        }
        if self.worker.max_attempts <= 0 {
            anyhow::bail!("IMPORT_MAX_ATTEMPTS must be greater than 0");
        }
        if self.worker.chunk_size == 0 {
            anyhow::bail!("IMPORT_CHUNK_SIZE must be greater than 0");
        }
        if self.worker.signed_url_expiry_secs == 0 {
            anyhow::bail!("IMPORT_SIGNED_URL_EXPIRY_SECS must be greater than 0");
        }
        if self.worker.health_port == 0 {
            anyhow::bail!("IMPORT_HEALTH_PORT must be greater than 0");
        }
        if self.worker.max_rows == 0 {
            anyhow::bail!("IMPORT_MAX_ROWS must be greater than 0");
        }
        self.storage.validate()?;
        Ok(())
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_stale(&self) -> Duration {
        Duration::from_secs(self.heartbeat_stale_secs)
    }

    pub fn signed_url_expiry(&self) -> Duration {
        Duration::from_secs(self.signed_url_expiry_secs)
    }
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            heartbeat_stale_secs: DEFAULT_HEARTBEAT_STALE_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            signed_url_expiry_secs: DEFAULT_SIGNED_URL_EXPIRY_SECS,
            health_port: DEFAULT_HEALTH_PORT,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

/// Auto-generate a worker identifier from the hostname and a random suffix.
fn generate_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}

/// Parse an environment variable, treating a malformed value as an error
/// rather than silently falling back to the default.
fn env_parse<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has invalid value '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            worker: WorkerConfig::default(),
            database: DatabaseConfig {
                url: "postgresql://localhost/pim".to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
            },
            storage: StorageConfig::for_minio("http://localhost:9000", "player-imports"),
        }
    }

    #[test]
    fn test_valid_config_passes_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = test_config();
        config.worker.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let mut config = test_config();
        config.worker.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_database_url_rejected() {
        let mut config = test_config();
        config.database.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_row_cap_rejected() {
        let mut config = test_config();
        config.worker.max_rows = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_worker_id_is_nonempty_and_unique() {
        let a = generate_worker_id();
        let b = generate_worker_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn test_duration_helpers() {
        let config = test_config();
        assert_eq!(
            config.worker.poll_interval(),
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
        assert_eq!(
            config.worker.heartbeat_stale(),
            Duration::from_secs(DEFAULT_HEARTBEAT_STALE_SECS)
        );
        assert_eq!(
            config.database.statement_timeout(),
            Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS)
        );
    }
}
