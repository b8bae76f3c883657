//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::connection::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_connection("source", &config.source)?;
    validate_connection("destination", &config.destination)?;

    // Cannot migrate to the same database
    if config.source.host == config.destination.host
        && config.source.port == config.destination.port
        && config.source.database == config.destination.database
    {
        return Err(MigrateError::Config(
            "source and destination cannot be the same database".into(),
        ));
    }

    if let Some(advisory) = &config.advisory {
        if advisory.api_url.is_empty() {
            return Err(MigrateError::Config("advisory.api_url is required".into()));
        }
        if advisory.max_attempts == 0 {
            return Err(MigrateError::Config(
                "advisory.max_attempts must be at least 1".into(),
            ));
        }
    }

    let m = &config.migration;
    if m.schemas.is_empty() {
        return Err(MigrateError::Config(
            "migration.schemas must list at least one schema".into(),
        ));
    }
    if m.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if m.max_attempts == 0 {
        return Err(MigrateError::Config(
            "migration.max_attempts must be at least 1".into(),
        ));
    }
    if let Some(0) = m.checksum_sample_size {
        return Err(MigrateError::Config(
            "migration.checksum_sample_size must be at least 1 (or null for the full table)".into(),
        ));
    }
    if m.test_batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.test_batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_connection(side: &str, conn: &ConnectionConfig) -> Result<()> {
    if conn.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", side)));
    }
    if conn.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", side)));
    }
    if conn.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", side)));
    }
    SslMode::parse(&conn.ssl_mode)
        .map_err(|e| MigrateError::Config(format!("{}.ssl_mode: {}", side, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    fn conn(host: &str, database: &str) -> ConnectionConfig {
        ConnectionConfig {
            host: host.to_string(),
            port: 5432,
            database: database.to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            ssl_mode: "prefer".to_string(),
        }
    }

    fn valid_config() -> Config {
        Config {
            source: conn("source-host", "app"),
            destination: conn("dest-host", "app"),
            advisory: None,
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_source_host() {
        let mut config = valid_config();
        config.source.host = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("source.host"));
    }

    #[test]
    fn test_empty_destination_user() {
        let mut config = valid_config();
        config.destination.user = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("destination.user"));
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.destination = config.source.clone();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("same database"));
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.source.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_attempts() {
        let mut config = valid_config();
        config.migration.max_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_checksum_sample() {
        let mut config = valid_config();
        config.migration.checksum_sample_size = Some(0);
        assert!(validate(&config).is_err());
        config.migration.checksum_sample_size = None;
        assert!(validate(&config).is_ok());
    }
}
