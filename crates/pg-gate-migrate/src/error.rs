//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handshake failure: bad credentials, unreachable host or timeout
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// Statement failure on an established session
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// A validation check could not be executed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Advisory service call failed
    #[error("Advisory service error: {0}")]
    Advisory(String),

    /// Operation not allowed in the current workflow state
    #[error("Invalid workflow state: {0}")]
    WorkflowState(String),

    /// Start requested while a workflow is already in progress
    #[error("A migration workflow is already running")]
    AlreadyRunning,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Connection error for the given endpoint.
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Connection { .. } => 2,
            MigrateError::Query(_) => 3,
            MigrateError::Transfer { .. } => 4,
            MigrateError::Validation(_) => 5,
            MigrateError::WorkflowState(_) | MigrateError::AlreadyRunning => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Advisory(_) | MigrateError::Json(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::connection("db:5432/app", "refused").exit_code(), 2);
        assert_eq!(MigrateError::transfer("public.t", "boom").exit_code(), 4);
        assert_eq!(MigrateError::AlreadyRunning.exit_code(), 6);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::Io(io).exit_code(), 7);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::transfer("public.orders", "insert failed");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: Transfer failed for table public.orders"));
    }
}
