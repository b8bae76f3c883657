//! Phase bodies run by the workflow worker.

use crate::advisory::{Analysis, AdvisoryRequest, AdvisoryResponse, SharedAdvisor};
use crate::config::MigrationConfig;
use crate::connection::{Row, SharedConnector};
use crate::error::{MigrateError, Result};
use crate::orchestrator::{ExecutionReport, MigrationOrchestrator};
use crate::progress::{ProgressLogEntry, ProgressSink};
use crate::schema::{ConnectionProbe, DatabaseSize, Introspector, ServerSetting, TableDescriptor};
use crate::transfer::{MigrationResult, TransferEngine};
use crate::verify::{IntegrityValidator, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Upper bound for a table to be picked for the test migration.
const TEST_TABLE_MAX_BYTES: i64 = 100 * 1024 * 1024;

/// Rows captured per table by the sample backup.
const BACKUP_SAMPLE_ROWS: usize = 3;

/// Rows covered by the backup checksum.
const BACKUP_CHECKSUM_ROWS: usize = 100;

/// Log entries handed to the final report.
pub(crate) const FINAL_REPORT_LOG_ENTRIES: usize = 50;

/// Everything the phases need, fixed at configure time.
#[derive(Clone)]
pub(crate) struct PhaseContext {
    pub source: SharedConnector,
    pub destination: SharedConnector,
    pub advisor: SharedAdvisor,
    pub migration: MigrationConfig,
}

/// Advisory output attached to a phase result. A failed call leaves
/// `analysis` empty and records the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryAnalysis {
    pub analysis: Option<Analysis>,
    pub error: Option<String>,
}

impl From<AdvisoryResponse> for AdvisoryAnalysis {
    fn from(response: AdvisoryResponse) -> Self {
        match response.analysis() {
            Ok(analysis) => Self {
                analysis: Some(analysis),
                error: None,
            },
            Err(error) => Self {
                analysis: None,
                error: Some(error),
            },
        }
    }
}

/// Submit a request and log a warning when the advisory call fails.
async fn submit_logged(
    ctx: &PhaseContext,
    sink: &dyn ProgressSink,
    request: &AdvisoryRequest,
) -> AdvisoryResponse {
    let response = ctx.advisor.submit(request).await;
    if let AdvisoryResponse::Failure { error } = &response {
        sink.warn(format!(
            "Advisory analysis for {} unavailable: {}",
            request.agent, error
        ));
    }
    response
}

async fn consult(ctx: &PhaseContext, sink: &dyn ProgressSink, request: AdvisoryRequest) -> AdvisoryAnalysis {
    AdvisoryAnalysis::from(submit_logged(ctx, sink, &request).await)
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaTables {
    pub schema: String,
    pub tables: Vec<TableDescriptor>,
}

/// Catalog snapshot of one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseDiscovery {
    pub endpoint: String,
    pub connection: ConnectionProbe,
    pub version: Option<String>,
    pub size: Option<DatabaseSize>,
    pub settings: Vec<ServerSetting>,
    pub schemas: Vec<SchemaTables>,
    /// First error hit while reading the catalog.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub source: DatabaseDiscovery,
    pub destination: DatabaseDiscovery,
    pub comparison: AdvisoryAnalysis,
}

async fn discover_database(introspector: &Introspector, sink: &dyn ProgressSink) -> DatabaseDiscovery {
    let endpoint = introspector.endpoint();
    let connection = introspector.test_connection().await;
    let mut discovery = DatabaseDiscovery {
        endpoint: endpoint.clone(),
        connection,
        version: None,
        size: None,
        settings: Vec::new(),
        schemas: Vec::new(),
        error: None,
    };

    if !discovery.connection.connected {
        sink.error(format!(
            "Cannot connect to {}: {}",
            endpoint, discovery.connection.message
        ));
        discovery.error = Some(discovery.connection.message.clone());
        return discovery;
    }

    let result: Result<()> = async {
        discovery.version = Some(introspector.version().await?);
        discovery.size = Some(introspector.database_size().await?);
        discovery.settings = introspector.settings().await?;
        for schema in introspector.list_schemas().await? {
            let tables = introspector.list_tables(&schema).await?;
            discovery.schemas.push(SchemaTables { schema, tables });
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        sink.error(format!("Discovery of {} incomplete: {}", endpoint, e));
        discovery.error = Some(e.to_string());
    } else {
        let tables: usize = discovery.schemas.iter().map(|s| s.tables.len()).sum();
        sink.info(format!(
            "Discovered {}: {} schemas, {} tables",
            endpoint,
            discovery.schemas.len(),
            tables
        ));
    }
    discovery
}

pub(crate) async fn run_discovery(ctx: &PhaseContext, sink: &dyn ProgressSink) -> Result<DiscoveryReport> {
    let source = discover_database(&Introspector::new(ctx.source.clone()), sink).await;
    let destination = discover_database(&Introspector::new(ctx.destination.clone()), sink).await;

    let request = AdvisoryRequest::new(
        "discovery",
        "Compare a source and a destination PostgreSQL database ahead of a table migration. \
         Identify compatibility issues, size differences and schema mismatches.",
        &[
            "Compare server versions and flag compatibility concerns",
            "Compare database sizes and estimate storage needs",
            "List schemas and tables present in the source but not the destination",
            "Assess overall migration feasibility and complexity",
            "Recommend a migration approach",
        ],
        json!({ "source": source, "destination": destination }),
    );
    let comparison = consult(ctx, sink, request).await;

    Ok(DiscoveryReport {
        source,
        destination,
        comparison,
    })
}

// ============================================================================
// Validation
// ============================================================================

/// Which database a backup was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupSide {
    Source,
    Destination,
}

impl BackupSide {
    fn label(self) -> &'static str {
        match self {
            BackupSide::Source => "source",
            BackupSide::Destination => "destination",
        }
    }
}

/// Pre-migration snapshot of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBackup {
    pub side: BackupSide,
    pub schema: String,
    pub table: String,
    pub row_count: Option<i64>,
    pub sample_rows: Vec<Row>,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMigration {
    pub table: TableDescriptor,
    pub result: MigrationResult,
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema: String,
    pub backups: Vec<TableBackup>,
    pub destination_backups: Vec<TableBackup>,
    /// Set when the destination tables could not be listed.
    pub destination_error: Option<String>,
    pub test_migration: Option<TestMigration>,
    pub recommendations: AdvisoryAnalysis,
}

/// Smallest table with a size strictly between zero and 100 MiB, else the
/// smallest table overall.
pub fn select_test_table(tables: &[TableDescriptor]) -> Option<&TableDescriptor> {
    tables
        .iter()
        .filter(|t| t.size_bytes > 0 && t.size_bytes < TEST_TABLE_MAX_BYTES)
        .min_by_key(|t| t.size_bytes)
        .or_else(|| tables.iter().min_by_key(|t| t.size_bytes))
}

async fn backup_table(
    introspector: &Introspector,
    validator: &IntegrityValidator,
    side: BackupSide,
    table: &TableDescriptor,
) -> TableBackup {
    let mut backup = TableBackup {
        side,
        schema: table.schema.clone(),
        table: table.name.clone(),
        row_count: None,
        sample_rows: Vec::new(),
        checksum: None,
        error: None,
    };
    let result: Result<()> = async {
        backup.row_count = Some(introspector.row_count(&table.schema, &table.name).await?);
        backup.sample_rows = introspector
            .sample_rows(&table.schema, &table.name, BACKUP_SAMPLE_ROWS)
            .await?;
        let checksum = match side {
            BackupSide::Source => {
                validator
                    .source_checksum(&table.schema, &table.name, Some(BACKUP_CHECKSUM_ROWS))
                    .await?
            }
            BackupSide::Destination => {
                validator
                    .destination_checksum(&table.schema, &table.name, Some(BACKUP_CHECKSUM_ROWS))
                    .await?
            }
        };
        backup.checksum = Some(checksum);
        Ok(())
    }
    .await;
    if let Err(e) = result {
        backup.error = Some(e.to_string());
    }
    backup
}

async fn backup_tables(
    introspector: &Introspector,
    validator: &IntegrityValidator,
    side: BackupSide,
    tables: &[TableDescriptor],
    limit: usize,
    sink: &dyn ProgressSink,
) -> Vec<TableBackup> {
    let mut backups = Vec::new();
    for table in tables.iter().take(limit) {
        let backup = backup_table(introspector, validator, side, table).await;
        match &backup.error {
            Some(e) => sink.warn(format!(
                "Sample backup of {} {} failed: {}",
                side.label(),
                table.full_name(),
                e
            )),
            None => sink.info(format!(
                "Captured sample backup of {} {}",
                side.label(),
                table.full_name()
            )),
        }
        backups.push(backup);
    }
    backups
}

pub(crate) async fn run_validation(
    ctx: &PhaseContext,
    sink: &dyn ProgressSink,
    discovery: Option<&DiscoveryReport>,
) -> Result<ValidationReport> {
    let schema = ctx
        .migration
        .schemas
        .first()
        .cloned()
        .ok_or_else(|| MigrateError::Config("no schemas configured".to_string()))?;

    let introspector = Introspector::new(ctx.source.clone());
    let destination_introspector = Introspector::new(ctx.destination.clone());
    let validator = IntegrityValidator::new(
        ctx.source.clone(),
        ctx.destination.clone(),
        ctx.migration.checksum_sample_size,
        ctx.migration.sample_rows,
    );

    let tables = introspector.list_tables(&schema).await?;

    let backups = backup_tables(
        &introspector,
        &validator,
        BackupSide::Source,
        &tables,
        ctx.migration.backup_tables,
        sink,
    )
    .await;

    // Taken before the test migration writes to the destination.
    let listed = destination_introspector.list_tables(&schema).await;
    let (destination_backups, destination_error) = match listed {
        Ok(existing) => {
            let backups = backup_tables(
                &destination_introspector,
                &validator,
                BackupSide::Destination,
                &existing,
                ctx.migration.backup_tables,
                sink,
            )
            .await;
            (backups, None)
        }
        Err(e) => {
            sink.warn(format!(
                "Cannot list destination tables in schema {}: {}",
                schema, e
            ));
            (Vec::new(), Some(e.to_string()))
        }
    };

    let test_migration = match select_test_table(&tables) {
        Some(table) => {
            sink.info(format!(
                "Running test migration on {} ({})",
                table.full_name(),
                table.size_pretty
            ));
            let engine = TransferEngine::new(ctx.source.clone(), ctx.destination.clone());
            let result = engine
                .migrate_table(
                    &table.schema,
                    &table.name,
                    ctx.migration.test_batch_size,
                    Some(ctx.migration.test_max_rows as u64),
                )
                .await;
            let validation = if result.success {
                Some(validator.validate_migration(&table.schema, &table.name).await)
            } else {
                sink.warn(format!(
                    "Test migration of {} failed: {}",
                    table.full_name(),
                    result.error.as_deref().unwrap_or("unknown error")
                ));
                None
            };
            Some(TestMigration {
                table: table.clone(),
                result,
                validation,
            })
        }
        None => {
            sink.warn(format!("No tables in schema {} to test migrate", schema));
            None
        }
    };

    let request = AdvisoryRequest::new(
        "validation",
        "Review the sample backups and the test migration of a PostgreSQL table migration \
         and judge whether the full migration is safe to plan.",
        &[
            "Assess the outcome of the test migration",
            "Interpret the row count, checksum and sample checks",
            "Identify data loss or corruption",
            "Recommend whether to proceed to plan generation",
        ],
        json!({
            "schema": schema,
            "backups": backups,
            "destination_backups": destination_backups,
            "destination_error": destination_error,
            "test_migration": test_migration,
            "discovery": discovery,
        }),
    );
    let recommendations = consult(ctx, sink, request).await;

    Ok(ValidationReport {
        schema,
        backups,
        destination_backups,
        destination_error,
        test_migration,
        recommendations,
    })
}

// ============================================================================
// Generation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Approve,
    Deny,
}

/// Advisory APPROVE/DENY recommendation. Informational only: the workflow
/// never acts on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub decision: Verdict,
    pub confidence: String,
    pub reasoning: String,
    pub conditions: Vec<String>,
    pub blockers: Vec<String>,
    pub note: Option<String>,
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

impl Recommendation {
    /// Normalise an advisory reply into a recommendation.
    pub fn from_response(response: &AdvisoryResponse) -> Self {
        let text = match response {
            AdvisoryResponse::Failure { error } => {
                return Self {
                    decision: Verdict::Deny,
                    confidence: "LOW".to_string(),
                    reasoning: "Failed to generate recommendation due to advisory error".to_string(),
                    conditions: Vec::new(),
                    blockers: Vec::new(),
                    note: Some(error.clone()),
                };
            }
            AdvisoryResponse::Success { response } => response,
        };

        if let Analysis::Structured(value) = Analysis::parse(text) {
            if let Some(decision) = value.get("decision").and_then(Value::as_str) {
                return Self::from_structured(decision, &value);
            }
        }

        let upper = text.to_uppercase();
        let decision = if upper.contains("APPROVE") && !upper.contains("DENY") {
            Verdict::Approve
        } else {
            Verdict::Deny
        };
        Self {
            decision,
            confidence: "MEDIUM".to_string(),
            reasoning: text.clone(),
            conditions: Vec::new(),
            blockers: Vec::new(),
            note: Some("Decision extracted from unstructured response".to_string()),
        }
    }

    fn from_structured(decision: &str, value: &Value) -> Self {
        let mut reasoning = value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut note = None;
        let decision = match decision.to_uppercase().as_str() {
            "APPROVE" => Verdict::Approve,
            "DENY" => Verdict::Deny,
            other => {
                reasoning.push_str(" [Decision normalized to DENY due to invalid response]");
                note = Some(format!("invalid decision '{}'", other));
                Verdict::Deny
            }
        };
        Self {
            decision,
            confidence: value
                .get("confidence")
                .and_then(Value::as_str)
                .map(str::to_uppercase)
                .unwrap_or_else(|| "LOW".to_string()),
            reasoning,
            conditions: string_list(value.get("conditions")),
            blockers: string_list(value.get("blockers")),
            note,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub migration_plan: AdvisoryAnalysis,
    pub risk_assessment: AdvisoryAnalysis,
    pub recommendation: Recommendation,
}

pub(crate) async fn run_generation(
    ctx: &PhaseContext,
    sink: &dyn ProgressSink,
    discovery: Option<&DiscoveryReport>,
    validation: Option<&ValidationReport>,
) -> Result<GenerationReport> {
    sink.info("Generating migration plan".to_string());
    let plan_request = AdvisoryRequest::new(
        "generation",
        "Create an actionable plan for moving table data from a source PostgreSQL database \
         to a destination PostgreSQL database, based on the discovery and validation results.",
        &[
            "Choose the migration approach and table order",
            "Estimate total migration time from the data sizes",
            "Specify batch sizes and checkpoints",
            "List preparation and post-migration verification steps",
        ],
        json!({ "discovery": discovery, "validation": validation }),
    );
    let migration_plan = consult(ctx, sink, plan_request).await;

    sink.info("Assessing migration risks".to_string());
    let risk_request = AdvisoryRequest::new(
        "generation",
        "Assess the risks of the proposed migration: data loss, downtime and incompatibilities.",
        &[
            "Classify risk factors as HIGH, MEDIUM or LOW",
            "Assess the potential for data loss or corruption",
            "Evaluate downtime and rollback complexity",
            "Propose a mitigation for each risk",
        ],
        json!({
            "discovery": discovery,
            "validation": validation,
            "migration_plan": migration_plan,
        }),
    );
    let risk_assessment = consult(ctx, sink, risk_request).await;

    sink.info("Generating recommendation".to_string());
    let recommendation_request = AdvisoryRequest::new(
        "generation",
        "Recommend either APPROVE or DENY for running the full migration.",
        &[
            "Review discovery and validation findings",
            "Judge whether the plan is sound and the risks acceptable",
            "Make a clear decision: APPROVE or DENY",
            "List conditions if approving and blockers if denying",
            "State a confidence level: HIGH, MEDIUM or LOW",
        ],
        json!({
            "discovery": discovery,
            "validation": validation,
            "migration_plan": migration_plan,
            "risk_assessment": risk_assessment,
            "instructions": "Respond with JSON containing decision (APPROVE or DENY), \
                             confidence, reasoning, conditions and blockers.",
        }),
    );
    let response = submit_logged(ctx, sink, &recommendation_request).await;
    let recommendation = Recommendation::from_response(&response);
    sink.info(format!(
        "Advisory recommendation: {:?} (confidence {}). Awaiting human decision.",
        recommendation.decision, recommendation.confidence
    ));

    Ok(GenerationReport {
        migration_plan,
        risk_assessment,
        recommendation,
    })
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub report: ExecutionReport,
    pub success_rate: f64,
    pub final_report: AdvisoryAnalysis,
}

pub(crate) async fn run_execution(ctx: &PhaseContext, sink: &dyn ProgressSink) -> ExecutionReport {
    MigrationOrchestrator::new(ctx.source.clone(), ctx.destination.clone(), &ctx.migration)
        .run(sink)
        .await
}

pub(crate) async fn final_report(
    ctx: &PhaseContext,
    sink: &dyn ProgressSink,
    report: ExecutionReport,
    recent_logs: Vec<ProgressLogEntry>,
) -> ExecutionOutcome {
    let request = AdvisoryRequest::new(
        "execution",
        "Summarize a completed PostgreSQL table migration for stakeholders.",
        &[
            "State the overall outcome: success, partial success or failure",
            "Report migrated and failed tables",
            "Interpret the validation results",
            "List tables that need attention and next steps",
        ],
        json!({ "execution_results": report, "migration_log": recent_logs }),
    );
    let final_report = consult(ctx, sink, request).await;
    ExecutionOutcome {
        success_rate: report.statistics.success_rate(),
        report,
        final_report,
    }
}
