//! pg-gate-migrate CLI - gated PostgreSQL to PostgreSQL table migration.

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use pg_gate_migrate::workflow::{GenerationReport, Recommendation};
use pg_gate_migrate::{
    Config, HttpAdvisor, Introspector, IntegrityValidator, MigrateError, OfflineAdvisor, Phase,
    PhaseResult, PgConnector, SharedAdvisor, SharedConnector, TransferEngine, WorkflowController,
    WorkflowStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "pg-gate-migrate")]
#[command(about = "Gated PostgreSQL to PostgreSQL table migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test database connections
    HealthCheck,

    /// List schemas and tables of the source database
    Discover,

    /// Compare one table between source and destination
    Validate {
        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long)]
        table: String,
    },

    /// Copy one table without the approval workflow
    MigrateTable {
        #[arg(long, default_value = "public")]
        schema: String,

        #[arg(long)]
        table: String,

        /// Copy at most this many rows
        #[arg(long)]
        max_rows: Option<u64>,
    },

    /// Run the full workflow: discovery, validation, plan, approval, execution
    Run {
        /// Approve at the gate without prompting
        #[arg(long, conflicts_with = "deny")]
        approve: bool,

        /// Deny at the gate with the given reason
        #[arg(long, value_name = "REASON")]
        deny: Option<String>,

        /// Reason recorded with an approval
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::HealthCheck => {
            let source = Introspector::new(connector(&config.source)?);
            let destination = Introspector::new(connector(&config.destination)?);
            let source_probe = source.test_connection().await;
            let destination_probe = destination.test_connection().await;
            let healthy = source_probe.connected && destination_probe.connected;

            if cli.output_json {
                let result = serde_json::json!({
                    "source": source_probe,
                    "destination": destination_probe,
                    "healthy": healthy,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for (label, endpoint, probe) in [
                    ("Source", source.endpoint(), &source_probe),
                    ("Destination", destination.endpoint(), &destination_probe),
                ] {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        label,
                        endpoint,
                        if probe.connected { "OK" } else { "FAILED" },
                        probe.latency_ms
                    );
                    if !probe.connected {
                        println!("    Error: {}", probe.message);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                let (endpoint, probe) = if source_probe.connected {
                    (destination.endpoint(), destination_probe)
                } else {
                    (source.endpoint(), source_probe)
                };
                return Err(MigrateError::connection(endpoint, probe.message));
            }
        }

        Commands::Discover => {
            let introspector = Introspector::new(connector(&config.source)?);
            let mut discovered = Vec::new();
            for schema in &config.migration.schemas {
                let tables = introspector.list_tables(schema).await?;
                discovered.push((schema.clone(), tables));
            }

            if cli.output_json {
                let mut result = serde_json::Map::new();
                for (schema, tables) in &discovered {
                    result.insert(schema.clone(), serde_json::to_value(tables)?);
                }
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for (schema, tables) in &discovered {
                    println!("Schema {} ({} tables):", schema, tables.len());
                    for table in tables {
                        println!(
                            "  {:<40} {:>12} {:>4} columns",
                            table.name, table.size_pretty, table.column_count
                        );
                    }
                }
            }
        }

        Commands::Validate { schema, table } => {
            let validator = IntegrityValidator::new(
                connector(&config.source)?,
                connector(&config.destination)?,
                config.migration.checksum_sample_size,
                config.migration.sample_rows,
            );
            let result = validator.validate_migration(&schema, &table).await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Validation of {}.{}:", schema, table);
                println!(
                    "  Row count: {:?} / {:?} {}",
                    result.row_count.source,
                    result.row_count.destination,
                    mark(result.row_count.matched)
                );
                println!("  Checksum: {}", mark(result.checksum.matched));
                println!("  Sample: {}", mark(result.sample.matched));
                for error in [
                    &result.row_count.error,
                    &result.checksum.error,
                    &result.sample.error,
                ]
                .into_iter()
                .flatten()
                {
                    println!("    Error: {}", error);
                }
            }

            if !result.validation_passed {
                return Err(MigrateError::Validation(format!(
                    "{}.{} failed checks: {}",
                    schema,
                    table,
                    result.failed_checks().join(", ")
                )));
            }
        }

        Commands::MigrateTable {
            schema,
            table,
            max_rows,
        } => {
            let engine =
                TransferEngine::new(connector(&config.source)?, connector(&config.destination)?);
            let result = engine
                .migrate_table(&schema, &table, config.migration.batch_size, max_rows)
                .await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Migration of {}.{}:", schema, table);
                println!("  Rows: {}/{}", result.rows_migrated, result.total_rows);
                println!("  Batches: {}", result.batches);
                println!("  Duration: {:.2}s", result.duration_seconds);
            }

            if let Some(error) = result.error {
                return Err(MigrateError::transfer(format!("{}.{}", schema, table), error));
            }
        }

        Commands::Run {
            approve,
            deny,
            reason,
        } => {
            let advisor: SharedAdvisor = match &config.advisory {
                Some(advisory) => Arc::new(HttpAdvisor::new(advisory)?),
                None => {
                    info!("No advisory endpoint configured, running without advisory analysis");
                    Arc::new(OfflineAdvisor)
                }
            };
            let controller = WorkflowController::new(advisor, config.migration.clone());
            controller
                .configure(&config.source, &config.destination)
                .await?;

            let cancel_token = setup_signal_handler();
            controller.start()?;
            let mut status = controller.subscribe();

            let gate = wait_while_running(&mut status, &cancel_token).await;
            if gate == Some(WorkflowStatus::AwaitingApproval) {
                if let Some(PhaseResult::Generation(report)) = controller.report(Phase::Generation) {
                    print_recommendation(&report);
                }
                match decide(approve, deny)? {
                    GateDecision::Approve => controller.approve(reason)?,
                    GateDecision::Deny(why) => controller.deny(Some(why))?,
                }
                wait_while_running(&mut status, &cancel_token).await;
            }

            if cancel_token.is_cancelled() {
                controller.reset();
                controller.shutdown().await;
                return Err(MigrateError::WorkflowState("workflow interrupted".to_string()));
            }
            controller.shutdown().await;

            let state = controller.status();
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if let Some(PhaseResult::Execution(outcome)) = controller.report(Phase::Execution) {
                let report = &outcome.report;
                println!("\nMigration {}!", state.status);
                println!("  Run ID: {}", report.run_id);
                println!("  Duration: {:.2}s", report.duration_seconds);
                println!(
                    "  Tables: {}/{}",
                    report.statistics.successful_tables, report.statistics.total_tables
                );
                println!("  Rows: {}", report.statistics.total_rows_migrated);
                for failure in &report.failed_tables {
                    println!(
                        "  Failed: {}.{} ({})",
                        failure.schema, failure.table, failure.error
                    );
                }
                for validation in report.validation_results.iter().filter(|v| !v.validation_passed) {
                    println!(
                        "  Validation mismatch: {}.{} ({})",
                        validation.schema,
                        validation.table,
                        validation.failed_checks().join(", ")
                    );
                }
            } else {
                println!("\nWorkflow {}", state.status);
            }

            match state.status {
                WorkflowStatus::Completed | WorkflowStatus::CompletedWithErrors => {}
                WorkflowStatus::Denied => {
                    return Err(MigrateError::WorkflowState(format!(
                        "migration denied: {}",
                        state.approval.reason.unwrap_or_default()
                    )));
                }
                other => {
                    return Err(MigrateError::WorkflowState(
                        state
                            .failure_reason
                            .unwrap_or_else(|| format!("workflow ended {}", other)),
                    ));
                }
            }
        }
    }

    Ok(())
}

fn connector(config: &pg_gate_migrate::ConnectionConfig) -> Result<SharedConnector, MigrateError> {
    Ok(Arc::new(PgConnector::new(config)?))
}

fn mark(matched: bool) -> &'static str {
    if matched {
        "✓ match"
    } else {
        "✗ mismatch"
    }
}

/// Wait until the workflow leaves `running`, or the token fires.
async fn wait_while_running(
    status: &mut watch::Receiver<WorkflowStatus>,
    cancel_token: &CancellationToken,
) -> Option<WorkflowStatus> {
    tokio::select! {
        _ = cancel_token.cancelled() => None,
        changed = status.wait_for(|s| *s != WorkflowStatus::Running) => changed.ok().map(|s| *s),
    }
}

fn print_recommendation(report: &GenerationReport) {
    let Recommendation {
        decision,
        confidence,
        reasoning,
        conditions,
        blockers,
        ..
    } = &report.recommendation;
    println!("\nAdvisory recommendation: {:?} (confidence {})", decision, confidence);
    if !reasoning.is_empty() {
        println!("  {}", reasoning);
    }
    for condition in conditions {
        println!("  Condition: {}", condition);
    }
    for blocker in blockers {
        println!("  Blocker: {}", blocker);
    }
}

enum GateDecision {
    Approve,
    Deny(String),
}

/// Flags win; otherwise ask on the terminal.
fn decide(approve: bool, deny: Option<String>) -> Result<GateDecision, MigrateError> {
    if approve {
        return Ok(GateDecision::Approve);
    }
    if let Some(reason) = deny {
        return Ok(GateDecision::Deny(reason));
    }
    let proceed = Confirm::new()
        .with_prompt("Approve the migration plan and run the full migration?")
        .default(false)
        .interact()
        .map_err(|e| MigrateError::WorkflowState(format!("approval prompt failed: {}", e)))?;
    Ok(if proceed {
        GateDecision::Approve
    } else {
        GateDecision::Deny("denied at interactive prompt".to_string())
    })
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Cancel the returned token on Ctrl-C.
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping workflow...");
            token.cancel();
        }
    });

    cancel_token
}
