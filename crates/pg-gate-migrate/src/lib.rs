//! # pg-gate-migrate
//!
//! Gated PostgreSQL to PostgreSQL table migration library.
//!
//! Data is moved table by table behind a phased workflow:
//!
//! - **Discovery** of both databases through the catalog
//! - **Validation** with sample backups and a bounded test migration
//! - **Plan generation** with an external advisory service
//! - A mandatory **approval gate** before anything is executed
//! - **Execution** with per-table retry and integrity checks
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_gate_migrate::{Config, OfflineAdvisor, WorkflowController, WorkflowStatus};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pg_gate_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let controller = WorkflowController::new(Arc::new(OfflineAdvisor), config.migration.clone());
//!     controller.configure(&config.source, &config.destination).await?;
//!     controller.start()?;
//!
//!     let mut status = controller.subscribe();
//!     let _ = status.wait_for(|s| *s != WorkflowStatus::Running).await;
//!     if controller.status().status == WorkflowStatus::AwaitingApproval {
//!         controller.approve(Some("reviewed".to_string()))?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod advisory;
pub mod config;
pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod schema;
pub mod transfer;
pub mod verify;
pub mod workflow;

// Re-exports for convenient access
pub use advisory::{
    AdvisoryRequest, AdvisoryResponse, AdvisoryService, Analysis, HttpAdvisor, OfflineAdvisor,
    SharedAdvisor,
};
pub use config::{AdvisoryConfig, Config, ConnectionConfig, MigrationConfig};
pub use connection::{Connector, PgConnector, SharedConnector, SqlValue, SslMode};
pub use error::{MigrateError, Result};
pub use orchestrator::{ExecutionReport, MigrationOrchestrator, RunStatus};
pub use progress::{LogBuffer, ProgressLogEntry, ProgressSink, Severity};
pub use retry::RetryPolicy;
pub use schema::{Introspector, TableDescriptor, TableStructure};
pub use transfer::{MigrationResult, TransferEngine};
pub use verify::{IntegrityValidator, ValidationResult};
pub use workflow::{Phase, PhaseResult, WorkflowController, WorkflowState, WorkflowStatus};
