//! Migration orchestrator: runs transfer and validation over whole schemas.

use crate::config::MigrationConfig;
use crate::connection::SharedConnector;
use crate::error::{MigrateError, Result};
use crate::progress::ProgressSink;
use crate::retry::RetryPolicy;
use crate::schema::Introspector;
use crate::transfer::{MigrationResult, TransferEngine};
use crate::verify::{IntegrityValidator, ValidationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Overall outcome of an execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table transferred.
    CompletedSuccess,
    /// At least one table exhausted its attempts.
    CompletedWithErrors,
    /// An error outside per-table handling stopped the run.
    Failed,
}

/// A table that transferred successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratedTable {
    pub schema: String,
    pub table: String,
    pub attempts: u32,
    pub result: MigrationResult,
}

/// A table that exhausted its attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFailure {
    pub schema: String,
    pub table: String,
    pub attempts: u32,
    pub error: String,
}

/// Per-schema statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub schema: String,
    pub total_tables: usize,
    pub successful_tables: usize,
    pub failed_tables: usize,
    pub rows_migrated: u64,
}

/// Run-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_tables: usize,
    pub successful_tables: usize,
    pub failed_tables: usize,
    pub total_rows_migrated: u64,
}

impl RunStatistics {
    /// Percentage of tables that transferred, 0 when there were none.
    pub fn success_rate(&self) -> f64 {
        if self.total_tables == 0 {
            0.0
        } else {
            self.successful_tables as f64 * 100.0 / self.total_tables as f64
        }
    }
}

/// Result of an execution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique run identifier.
    pub run_id: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_seconds: f64,

    pub schemas: Vec<SchemaReport>,

    pub migrated_tables: Vec<MigratedTable>,

    pub failed_tables: Vec<TableFailure>,

    /// One entry per migrated table, whatever the outcome.
    pub validation_results: Vec<ValidationResult>,

    pub statistics: RunStatistics,

    /// Set when the run status is `Failed`.
    pub error: Option<String>,
}

impl ExecutionReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            status: RunStatus::CompletedSuccess,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            schemas: Vec::new(),
            migrated_tables: Vec::new(),
            failed_tables: Vec::new(),
            validation_results: Vec::new(),
            statistics: RunStatistics::default(),
            error: None,
        }
    }

    /// Convert result to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs the transfer engine and validator over every table of the configured schemas.
pub struct MigrationOrchestrator {
    introspector: Introspector,
    engine: TransferEngine,
    validator: IntegrityValidator,
    retry: RetryPolicy,
    schemas: Vec<String>,
    batch_size: usize,
}

impl MigrationOrchestrator {
    pub fn new(
        source: SharedConnector,
        destination: SharedConnector,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            introspector: Introspector::new(source.clone()),
            engine: TransferEngine::new(source.clone(), destination.clone()),
            validator: IntegrityValidator::new(
                source,
                destination,
                config.checksum_sample_size,
                config.sample_rows,
            ),
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_secs(config.retry_backoff_secs),
            ),
            schemas: config.schemas.clone(),
            batch_size: config.batch_size,
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Migrate all tables. Tables run one at a time in listing order.
    pub async fn run(&self, sink: &dyn ProgressSink) -> ExecutionReport {
        let mut report = ExecutionReport::new();
        let clock = std::time::Instant::now();
        info!("Starting migration run: {}", report.run_id);

        if let Err(e) = self.run_schemas(sink, &mut report).await {
            sink.error(format!("Migration run failed: {}", e));
            report.status = RunStatus::Failed;
            report.error = Some(e.to_string());
        } else if report.statistics.failed_tables > 0 {
            report.status = RunStatus::CompletedWithErrors;
        }

        report.completed_at = Utc::now();
        report.duration_seconds = clock.elapsed().as_secs_f64();

        let stats = &report.statistics;
        sink.info(format!(
            "Migration finished: {}/{} tables, {} rows, {} failed",
            stats.successful_tables, stats.total_tables, stats.total_rows_migrated, stats.failed_tables
        ));
        report
    }

    async fn run_schemas(&self, sink: &dyn ProgressSink, report: &mut ExecutionReport) -> Result<()> {
        for schema in &self.schemas {
            sink.info(format!("Processing schema: {}", schema));
            let tables = self.introspector.list_tables(schema).await?;
            let mut schema_report = SchemaReport {
                schema: schema.clone(),
                total_tables: tables.len(),
                ..Default::default()
            };

            for table in &tables {
                sink.info(format!(
                    "Migrating {} ({})",
                    table.full_name(),
                    table.size_pretty
                ));

                match self.transfer_with_retry(schema, &table.name, sink).await {
                    Ok((result, attempts)) => {
                        sink.info(format!(
                            "Migrated {}: {} rows",
                            table.full_name(),
                            result.rows_migrated
                        ));
                        schema_report.successful_tables += 1;
                        schema_report.rows_migrated += result.rows_migrated;

                        let validation = self.validator.validate_migration(schema, &table.name).await;
                        if validation.validation_passed {
                            sink.info(format!("Validation passed for {}", table.full_name()));
                        } else {
                            sink.warn(format!(
                                "Validation failed for {}: {}",
                                table.full_name(),
                                validation.failed_checks().join(", ")
                            ));
                        }
                        report.validation_results.push(validation);
                        report.migrated_tables.push(MigratedTable {
                            schema: schema.clone(),
                            table: table.name.clone(),
                            attempts,
                            result,
                        });
                    }
                    Err((e, attempts)) => {
                        sink.error(format!("Failed to migrate {}: {}", table.full_name(), e));
                        schema_report.failed_tables += 1;
                        report.failed_tables.push(TableFailure {
                            schema: schema.clone(),
                            table: table.name.clone(),
                            attempts,
                            error: e.to_string(),
                        });
                    }
                }
            }

            report.statistics.total_tables += schema_report.total_tables;
            report.statistics.successful_tables += schema_report.successful_tables;
            report.statistics.failed_tables += schema_report.failed_tables;
            report.statistics.total_rows_migrated += schema_report.rows_migrated;
            report.schemas.push(schema_report);
        }
        Ok(())
    }

    /// Transfer one table under the retry policy, returning the attempts used.
    async fn transfer_with_retry(
        &self,
        schema: &str,
        table: &str,
        sink: &dyn ProgressSink,
    ) -> std::result::Result<(MigrationResult, u32), (MigrateError, u32)> {
        let mut attempts = 0;
        let retries_allowed = self.retry.max_attempts() - 1;
        let engine = &self.engine;
        let batch_size = self.batch_size;

        let outcome = self
            .retry
            .run(
                |attempt| {
                    attempts = attempt;
                    async move {
                        let result = engine.migrate_table(schema, table, batch_size, None).await;
                        if result.success {
                            Ok(result)
                        } else {
                            Err(MigrateError::transfer(
                                format!("{}.{}", schema, table),
                                result.error.unwrap_or_else(|| "unknown error".to_string()),
                            ))
                        }
                    }
                },
                |attempt, e| {
                    sink.warn(format!(
                        "Retry {}/{} for {}.{}: {}",
                        attempt, retries_allowed, schema, table, e
                    ));
                },
            )
            .await;

        match outcome {
            Ok(result) => Ok((result, attempts)),
            Err(e) => Err((e, attempts)),
        }
    }
}
