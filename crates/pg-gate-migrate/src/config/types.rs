//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database the rows are read from.
    pub source: ConnectionConfig,

    /// Database the rows are written to.
    pub destination: ConnectionConfig,

    /// Advisory service endpoint. Without it the planning phases run degraded.
    #[serde(default)]
    pub advisory: Option<AdvisoryConfig>,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// PostgreSQL connection parameters for one side of the migration.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl ConnectionConfig {
    /// `host:port/database`, used in logs and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Advisory service endpoint configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    /// Base URL, e.g. `https://advisor.internal`.
    pub api_url: String,

    /// Bearer token.
    pub api_key: String,

    /// Model identifier forwarded with every session.
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Attempts per message (default: 3).
    #[serde(default = "default_advisory_attempts")]
    pub max_attempts: u32,

    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_advisory_timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for AdvisoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisoryConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("model_id", &self.model_id)
            .field("max_attempts", &self.max_attempts)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Schemas migrated during execution (default: ["public"]).
    #[serde(default = "default_schemas")]
    pub schemas: Vec<String>,

    /// Rows fetched per batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Transfer attempts per table, including the first (default: 2).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed backoff between attempts in seconds (default: 2).
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Rows covered by the checksum check (default: 1000).
    /// Set to null to checksum the whole table.
    #[serde(default = "default_checksum_sample_size")]
    pub checksum_sample_size: Option<usize>,

    /// Rows compared by the sample equality check (default: 5).
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Row cap for the validation phase test migration (default: 100).
    #[serde(default = "default_test_max_rows")]
    pub test_max_rows: usize,

    /// Batch size for the validation phase test migration (default: 100).
    #[serde(default = "default_test_batch_size")]
    pub test_batch_size: usize,

    /// Tables captured by the pre-migration sample backup (default: 5).
    #[serde(default = "default_backup_tables")]
    pub backup_tables: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            schemas: default_schemas(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            checksum_sample_size: default_checksum_sample_size(),
            sample_rows: default_sample_rows(),
            test_max_rows: default_test_max_rows(),
            test_batch_size: default_test_batch_size(),
            backup_tables: default_backup_tables(),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_model_id() -> String {
    "default".to_string()
}

fn default_advisory_attempts() -> u32 {
    3
}

fn default_advisory_timeout() -> u64 {
    120
}

fn default_schemas() -> Vec<String> {
    vec!["public".to_string()]
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_backoff_secs() -> u64 {
    2
}

/// Default row bound for the checksum check.
pub const DEFAULT_CHECKSUM_SAMPLE: usize = 1000;

fn default_checksum_sample_size() -> Option<usize> {
    Some(DEFAULT_CHECKSUM_SAMPLE)
}

fn default_sample_rows() -> usize {
    5
}

fn default_test_max_rows() -> usize {
    100
}

fn default_test_batch_size() -> usize {
    100
}

fn default_backup_tables() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_defaults() {
        let m = MigrationConfig::default();
        assert_eq!(m.schemas, vec!["public".to_string()]);
        assert_eq!(m.batch_size, 1000);
        assert_eq!(m.max_attempts, 2);
        assert_eq!(m.retry_backoff_secs, 2);
        assert_eq!(m.checksum_sample_size, Some(1000));
        assert_eq!(m.sample_rows, 5);
    }

    #[test]
    fn test_debug_redacts_password() {
        let cfg = ConnectionConfig {
            host: "db".into(),
            port: 5432,
            database: "app".into(),
            user: "migrator".into(),
            password: "hunter2".into(),
            ssl_mode: "prefer".into(),
        };
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
        assert_eq!(cfg.endpoint(), "db:5432/app");
    }
}
