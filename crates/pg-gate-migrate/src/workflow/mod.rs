//! Phased workflow with a human approval gate.
//!
//! [`WorkflowController`] owns the workflow record behind one mutex and a
//! single background worker that runs phase tasks from a queue. Discovery,
//! validation and generation run back to back; the worker then parks the
//! workflow in `awaiting_approval` until [`WorkflowController::approve`] or
//! [`WorkflowController::deny`] is called. Triggering operations only update
//! the record and enqueue work, so they return immediately.
//!
//! Every start and reset bumps an epoch. A worker task carries the epoch it
//! was queued under and drops its writes once the epoch has moved on, so a
//! reset cannot be overwritten by work that was already in flight.

mod phases;
mod state;

pub use phases::{
    select_test_table, AdvisoryAnalysis, BackupSide, DatabaseDiscovery, DiscoveryReport, ExecutionOutcome,
    GenerationReport, Recommendation, SchemaTables, TableBackup, TestMigration, ValidationReport,
    Verdict,
};
pub use state::{
    ApprovalDecision, Decision, Phase, PhaseResult, PhaseState, PhaseStatus, WorkflowState,
    WorkflowStatus,
};

use crate::advisory::SharedAdvisor;
use crate::config::{ConnectionConfig, MigrationConfig};
use crate::connection::{PgConnector, SharedConnector};
use crate::error::{MigrateError, Result};
use crate::orchestrator::RunStatus;
use crate::progress::{trace_entry, ProgressLogEntry, ProgressSink, Severity};
use crate::schema::{ConnectionProbe, Introspector};
use chrono::Utc;
use phases::{PhaseContext, FINAL_REPORT_LOG_ENTRIES};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single shared record guarded by the controller's lock.
struct Shared {
    state: WorkflowState,
    logs: Vec<ProgressLogEntry>,
    epoch: u64,
    context: Option<PhaseContext>,
    cancel: CancellationToken,
}

struct Job {
    epoch: u64,
    context: PhaseContext,
    cancel: CancellationToken,
}

enum PhaseTask {
    /// Discovery, validation and generation.
    Plan(Job),
    Execute(Job),
}

/// Drives the four-phase pipeline. Must be created inside a Tokio runtime.
pub struct WorkflowController {
    shared: Arc<Mutex<Shared>>,
    status_tx: Arc<watch::Sender<WorkflowStatus>>,
    queue: Mutex<Option<mpsc::UnboundedSender<PhaseTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    advisor: SharedAdvisor,
    migration: MigrationConfig,
}

impl WorkflowController {
    pub fn new(advisor: SharedAdvisor, migration: MigrationConfig) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            state: WorkflowState::new(false),
            logs: Vec::new(),
            epoch: 0,
            context: None,
            cancel: CancellationToken::new(),
        }));
        let (status_tx, _) = watch::channel(WorkflowStatus::Idle);
        let status_tx = Arc::new(status_tx);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(queue_rx, shared.clone(), status_tx.clone()));

        Self {
            shared,
            status_tx,
            queue: Mutex::new(Some(queue_tx)),
            worker: Mutex::new(Some(worker)),
            advisor,
            migration,
        }
    }

    /// Accept connection settings for both databases after probing them.
    pub async fn configure(
        &self,
        source: &ConnectionConfig,
        destination: &ConnectionConfig,
    ) -> Result<(ConnectionProbe, ConnectionProbe)> {
        let source: SharedConnector = Arc::new(PgConnector::new(source)?);
        let destination: SharedConnector = Arc::new(PgConnector::new(destination)?);
        self.configure_with(source, destination).await
    }

    /// Accept prepared connectors after probing them.
    pub async fn configure_with(
        &self,
        source: SharedConnector,
        destination: SharedConnector,
    ) -> Result<(ConnectionProbe, ConnectionProbe)> {
        self.ensure_inactive("configure")?;

        let (source_probe, destination_probe) = futures::future::join(
            Introspector::new(source.clone()).test_connection(),
            Introspector::new(destination.clone()).test_connection(),
        )
        .await;
        for (probe, connector) in [(&source_probe, &source), (&destination_probe, &destination)] {
            if !probe.connected {
                return Err(MigrateError::connection(connector.endpoint(), &probe.message));
            }
        }

        let mut shared = lock(&self.shared);
        if shared.state.status.is_active() {
            return Err(MigrateError::WorkflowState(
                "cannot configure while a workflow is in progress".to_string(),
            ));
        }
        info!(
            "Workflow configured: {} -> {}",
            source.endpoint(),
            destination.endpoint()
        );
        shared.context = Some(PhaseContext {
            source,
            destination,
            advisor: self.advisor.clone(),
            migration: self.migration.clone(),
        });
        shared.state.configured = true;
        Ok((source_probe, destination_probe))
    }

    /// Begin discovery. Returns once the plan task is queued.
    pub fn start(&self) -> Result<()> {
        let queue = self.queue_sender()?;
        let mut shared = lock(&self.shared);
        if shared.state.status.is_active() {
            return Err(MigrateError::AlreadyRunning);
        }
        let context = shared.context.clone().ok_or_else(|| {
            MigrateError::WorkflowState("workflow is not configured".to_string())
        })?;

        let job = Self::next_job(&mut shared, context);
        shared.logs.clear();
        shared.state = WorkflowState::new(true);
        shared.state.status = WorkflowStatus::Running;
        shared.state.current_phase = Some(Phase::Discovery);
        shared.state.started_at = Some(Utc::now());
        self.status_tx.send_replace(WorkflowStatus::Running);

        queue
            .send(PhaseTask::Plan(job))
            .map_err(|_| worker_gone())?;
        info!("Workflow started");
        Ok(())
    }

    /// Pass the approval gate and queue execution.
    pub fn approve(&self, reason: Option<String>) -> Result<()> {
        let queue = self.queue_sender()?;
        let mut shared = lock(&self.shared);
        Self::ensure_awaiting(&shared.state, "approve")?;
        let context = shared.context.clone().ok_or_else(|| {
            MigrateError::WorkflowState("workflow is not configured".to_string())
        })?;

        let job = Job {
            epoch: shared.epoch,
            context,
            cancel: shared.cancel.clone(),
        };
        let message = match &reason {
            Some(r) => format!("Migration approved: {}", r),
            None => "Migration approved".to_string(),
        };
        shared.state.approval = ApprovalDecision {
            decision: Decision::Approved,
            reason,
            decided_at: Some(Utc::now()),
        };
        shared.state.status = WorkflowStatus::Running;
        shared.state.current_phase = Some(Phase::Execution);
        Self::push_log(&mut shared, ProgressLogEntry::new(Severity::Info, message));
        self.status_tx.send_replace(WorkflowStatus::Running);

        queue
            .send(PhaseTask::Execute(job))
            .map_err(|_| worker_gone())?;
        Ok(())
    }

    /// Close the gate. The workflow ends in `denied` without executing.
    pub fn deny(&self, reason: Option<String>) -> Result<()> {
        let mut shared = lock(&self.shared);
        Self::ensure_awaiting(&shared.state, "deny")?;

        let message = match &reason {
            Some(r) => format!("Migration denied: {}", r),
            None => "Migration denied".to_string(),
        };
        shared.state.approval = ApprovalDecision {
            decision: Decision::Denied,
            reason,
            decided_at: Some(Utc::now()),
        };
        shared.state.status = WorkflowStatus::Denied;
        shared.state.completed_at = Some(Utc::now());
        Self::push_log(&mut shared, ProgressLogEntry::new(Severity::Warning, message));
        self.status_tx.send_replace(WorkflowStatus::Denied);
        Ok(())
    }

    pub fn status(&self) -> WorkflowState {
        lock(&self.shared).state.clone()
    }

    pub fn logs(&self) -> Vec<ProgressLogEntry> {
        lock(&self.shared).logs.clone()
    }

    /// Last result recorded for `phase`.
    pub fn report(&self, phase: Phase) -> Option<PhaseResult> {
        lock(&self.shared).state.phase(phase).result.clone()
    }

    /// [`report`](Self::report) keyed by phase name.
    pub fn report_by_name(&self, phase: &str) -> Result<Option<PhaseResult>> {
        Ok(self.report(phase.parse()?))
    }

    /// Return to `idle` from any state, clearing results, logs and the
    /// approval decision. The configuration is kept.
    pub fn reset(&self) {
        let mut shared = lock(&self.shared);
        shared.epoch += 1;
        shared.cancel.cancel();
        shared.cancel = CancellationToken::new();
        let configured = shared.context.is_some();
        shared.state = WorkflowState::new(configured);
        shared.logs.clear();
        self.status_tx.send_replace(WorkflowStatus::Idle);
        info!("Workflow reset");
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatus> {
        self.status_tx.subscribe()
    }

    /// Close the task queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        lock(&self.queue).take();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                debug!("Workflow worker ended abnormally: {}", e);
            }
        }
    }

    fn queue_sender(&self) -> Result<mpsc::UnboundedSender<PhaseTask>> {
        lock(&self.queue).clone().ok_or_else(worker_gone)
    }

    fn next_job(shared: &mut Shared, context: PhaseContext) -> Job {
        shared.epoch += 1;
        shared.cancel = CancellationToken::new();
        Job {
            epoch: shared.epoch,
            context,
            cancel: shared.cancel.clone(),
        }
    }

    fn ensure_inactive(&self, action: &str) -> Result<()> {
        let status = lock(&self.shared).state.status;
        if status.is_active() {
            return Err(MigrateError::WorkflowState(format!(
                "cannot {} while workflow is {}",
                action, status
            )));
        }
        Ok(())
    }

    fn ensure_awaiting(state: &WorkflowState, action: &str) -> Result<()> {
        if state.status != WorkflowStatus::AwaitingApproval {
            return Err(MigrateError::WorkflowState(format!(
                "cannot {}: workflow is {}, not awaiting approval",
                action, state.status
            )));
        }
        Ok(())
    }

    fn push_log(shared: &mut Shared, entry: ProgressLogEntry) {
        trace_entry(&entry);
        shared.logs.push(entry);
    }
}

fn worker_gone() -> MigrateError {
    MigrateError::WorkflowState("workflow worker has shut down".to_string())
}

// ============================================================================
// Worker
// ============================================================================

/// Worker-side view of the shared record, bound to one epoch.
struct WorkerHandle {
    shared: Arc<Mutex<Shared>>,
    status_tx: Arc<watch::Sender<WorkflowStatus>>,
    epoch: u64,
}

impl WorkerHandle {
    /// Apply `f` if the epoch is still current.
    fn update(&self, f: impl FnOnce(&mut WorkflowState)) -> bool {
        let mut shared = lock(&self.shared);
        if shared.epoch != self.epoch {
            return false;
        }
        f(&mut shared.state);
        self.status_tx.send_replace(shared.state.status);
        true
    }

    fn begin(&self, phase: Phase) -> bool {
        self.update(|state| {
            state.status = WorkflowStatus::Running;
            state.current_phase = Some(phase);
            let entry = state.phase_mut(phase);
            entry.status = PhaseStatus::Running;
            entry.started_at = Some(Utc::now());
            entry.completed_at = None;
            entry.error = None;
        })
    }

    fn complete(&self, phase: Phase, result: PhaseResult) -> bool {
        self.update(|state| {
            let entry = state.phase_mut(phase);
            entry.status = PhaseStatus::Completed;
            entry.completed_at = Some(Utc::now());
            entry.result = Some(result);
        })
    }

    fn fail(&self, phase: Phase, error: &MigrateError) {
        let reason = format!("{} phase failed: {}", phase, error);
        self.error(reason.clone());
        self.update(|state| {
            let entry = state.phase_mut(phase);
            entry.status = PhaseStatus::Failed;
            entry.completed_at = Some(Utc::now());
            entry.error = Some(error.to_string());
            state.status = WorkflowStatus::Failed;
            state.failure_reason = Some(reason);
            state.completed_at = Some(Utc::now());
        });
    }

    fn recent_logs(&self, count: usize) -> Vec<ProgressLogEntry> {
        let shared = lock(&self.shared);
        let skip = shared.logs.len().saturating_sub(count);
        shared.logs[skip..].to_vec()
    }

    /// Settle a phase outcome, returning the report while the epoch is current.
    fn settle<T: Clone>(
        &self,
        phase: Phase,
        outcome: Result<T>,
        wrap: impl FnOnce(T) -> PhaseResult,
    ) -> Option<T> {
        match outcome {
            Ok(report) => self.complete(phase, wrap(report.clone())).then_some(report),
            Err(e) => {
                self.fail(phase, &e);
                None
            }
        }
    }
}

impl ProgressSink for WorkerHandle {
    fn record(&self, entry: ProgressLogEntry) {
        trace_entry(&entry);
        let mut shared = lock(&self.shared);
        if shared.epoch == self.epoch {
            shared.logs.push(entry);
        }
    }
}

async fn run_worker(
    mut queue: mpsc::UnboundedReceiver<PhaseTask>,
    shared: Arc<Mutex<Shared>>,
    status_tx: Arc<watch::Sender<WorkflowStatus>>,
) {
    while let Some(task) = queue.recv().await {
        let (job, plan) = match task {
            PhaseTask::Plan(job) => (job, true),
            PhaseTask::Execute(job) => (job, false),
        };
        let handle = WorkerHandle {
            shared: shared.clone(),
            status_tx: status_tx.clone(),
            epoch: job.epoch,
        };
        if plan {
            run_plan(&handle, &job).await;
        } else {
            run_execute(&handle, &job).await;
        }
    }
    debug!("Workflow worker stopped");
}

fn proceed(handle: &WorkerHandle, job: &Job, phase: Phase) -> bool {
    if job.cancel.is_cancelled() {
        debug!("Workflow cancelled before {} phase", phase);
        return false;
    }
    handle.begin(phase)
}

async fn run_plan(handle: &WorkerHandle, job: &Job) {
    let ctx = &job.context;

    if !proceed(handle, job, Phase::Discovery) {
        return;
    }
    handle.info("Starting discovery phase".to_string());
    let outcome = phases::run_discovery(ctx, handle).await;
    let Some(discovery) = handle.settle(Phase::Discovery, outcome, PhaseResult::Discovery) else {
        return;
    };

    if !proceed(handle, job, Phase::Validation) {
        return;
    }
    handle.info("Starting validation phase".to_string());
    let outcome = phases::run_validation(ctx, handle, Some(&discovery)).await;
    let Some(validation) = handle.settle(Phase::Validation, outcome, PhaseResult::Validation) else {
        return;
    };

    if !proceed(handle, job, Phase::Generation) {
        return;
    }
    handle.info("Starting generation phase".to_string());
    let outcome = phases::run_generation(ctx, handle, Some(&discovery), Some(&validation)).await;
    if handle
        .settle(Phase::Generation, outcome, PhaseResult::Generation)
        .is_none()
    {
        return;
    }

    if handle.update(|state| state.status = WorkflowStatus::AwaitingApproval) {
        handle.info("Plan ready. Awaiting approval".to_string());
    }
}

async fn run_execute(handle: &WorkerHandle, job: &Job) {
    let ctx = &job.context;
    if !proceed(handle, job, Phase::Execution) {
        return;
    }
    handle.info("Starting execution phase".to_string());

    let report = phases::run_execution(ctx, handle).await;
    let status = report.status;
    let run_error = report.error.clone();
    let logs = handle.recent_logs(FINAL_REPORT_LOG_ENTRIES);
    let outcome = phases::final_report(ctx, handle, report, logs).await;

    let summary = format!(
        "Execution finished: {} migrated, {} failed, {} rows",
        outcome.report.statistics.successful_tables,
        outcome.report.statistics.failed_tables,
        outcome.report.statistics.total_rows_migrated
    );
    if !handle.complete(Phase::Execution, PhaseResult::Execution(outcome)) {
        return;
    }
    handle.info(summary);

    handle.update(|state| {
        state.completed_at = Some(Utc::now());
        state.status = match status {
            RunStatus::CompletedSuccess => WorkflowStatus::Completed,
            RunStatus::CompletedWithErrors => WorkflowStatus::CompletedWithErrors,
            RunStatus::Failed => {
                state.failure_reason = run_error;
                WorkflowStatus::Failed
            }
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisory::testing::ScriptedAdvisor;
    use crate::advisory::{AdvisoryResponse, AdvisoryService};
    use crate::connection::memory::{id_name_columns, numbered_rows, MemoryDatabase};
    use std::time::Duration;

    const RECOMMEND_APPROVE: &str =
        r#"{"decision": "APPROVE", "confidence": "HIGH", "reasoning": "small and clean"}"#;

    fn migration() -> MigrationConfig {
        MigrationConfig {
            schemas: vec!["public".to_string()],
            ..MigrationConfig::default()
        }
    }

    fn databases() -> (MemoryDatabase, MemoryDatabase) {
        let source = MemoryDatabase::new("source");
        source.add_table("public", "users", id_name_columns(), numbered_rows(20));
        (source, MemoryDatabase::new("destination"))
    }

    fn scripted(replies: Vec<AdvisoryResponse>) -> Arc<ScriptedAdvisor> {
        Arc::new(ScriptedAdvisor::new(replies))
    }

    async fn configured(advisor: Arc<ScriptedAdvisor>) -> (WorkflowController, MemoryDatabase) {
        let (source, destination) = databases();
        let controller = WorkflowController::new(advisor as Arc<dyn AdvisoryService>, migration());
        controller
            .configure_with(source.connector(), destination.connector())
            .await
            .unwrap();
        (controller, destination)
    }

    async fn wait_for(controller: &WorkflowController, status: WorkflowStatus) {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == status))
            .await
            .expect("timed out waiting for workflow status")
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let controller = WorkflowController::new(scripted(vec![]), migration());
        assert!(matches!(
            controller.start(),
            Err(MigrateError::WorkflowState(_))
        ));
        assert_eq!(controller.status().status, WorkflowStatus::Idle);
    }

    #[tokio::test]
    async fn test_configure_rejects_unreachable_database() {
        let (source, destination) = databases();
        destination.fail_next("acquire", "", 1);
        let controller = WorkflowController::new(scripted(vec![]), migration());
        let err = controller
            .configure_with(source.connector(), destination.connector())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Connection { .. }));
        assert!(!controller.status().configured);
    }

    #[tokio::test]
    async fn test_approve_before_gate_is_rejected() {
        let (controller, _) = configured(scripted(vec![])).await;
        assert!(matches!(
            controller.approve(None),
            Err(MigrateError::WorkflowState(_))
        ));
        assert!(matches!(
            controller.deny(Some("no".into())),
            Err(MigrateError::WorkflowState(_))
        ));
        assert_eq!(controller.status().approval.decision, Decision::Pending);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected() {
        let (controller, _) = configured(scripted(vec![])).await;
        controller.start().unwrap();
        assert!(matches!(
            controller.start(),
            Err(MigrateError::AlreadyRunning)
        ));

        wait_for(&controller, WorkflowStatus::AwaitingApproval).await;
        assert!(matches!(
            controller.start(),
            Err(MigrateError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_plan_stops_at_gate_with_failed_advisory() {
        let (controller, destination) = configured(scripted(vec![])).await;
        controller.start().unwrap();
        wait_for(&controller, WorkflowStatus::AwaitingApproval).await;

        let state = controller.status();
        assert_eq!(state.current_phase, Some(Phase::Generation));
        for phase in [Phase::Discovery, Phase::Validation, Phase::Generation] {
            assert_eq!(state.phase(phase).status, PhaseStatus::Completed);
        }
        assert_eq!(state.phase(Phase::Execution).status, PhaseStatus::Pending);

        match controller.report(Phase::Generation) {
            Some(PhaseResult::Generation(report)) => {
                assert_eq!(report.recommendation.decision, Verdict::Deny);
                assert!(report.migration_plan.error.is_some());
            }
            other => panic!("unexpected generation report: {:?}", other),
        }

        match controller.report(Phase::Validation) {
            Some(PhaseResult::Validation(report)) => {
                assert_eq!(report.backups.len(), 1);
                assert_eq!(report.backups[0].row_count, Some(20));
                assert!(report.destination_backups.is_empty());
                assert!(report.destination_error.is_none());
                let test = report.test_migration.unwrap();
                assert_eq!(test.table.name, "users");
                assert!(test.result.success);
                assert!(test.validation.unwrap().validation_passed);
            }
            other => panic!("unexpected validation report: {:?}", other),
        }
        assert_eq!(destination.table("public", "users").unwrap().rows.len(), 20);
    }

    #[tokio::test]
    async fn test_deny_then_reset_returns_to_idle() {
        let (controller, _) = configured(scripted(vec![])).await;
        controller.start().unwrap();
        wait_for(&controller, WorkflowStatus::AwaitingApproval).await;

        controller.deny(Some("maintenance window closed".into())).unwrap();
        let state = controller.status();
        assert_eq!(state.status, WorkflowStatus::Denied);
        assert_eq!(state.approval.decision, Decision::Denied);
        assert_eq!(
            state.approval.reason.as_deref(),
            Some("maintenance window closed")
        );
        assert!(controller.approve(None).is_err());

        controller.reset();
        let state = controller.status();
        assert_eq!(state.status, WorkflowStatus::Idle);
        assert!(state.configured);
        assert_eq!(state.approval.decision, Decision::Pending);
        assert!(state.phases.iter().all(|p| p.result.is_none()));
        assert!(controller.logs().is_empty());
        for phase in Phase::ALL {
            assert!(controller.report(phase).is_none());
        }
    }

    #[tokio::test]
    async fn test_reset_discards_in_flight_work() {
        let (controller, _) = configured(scripted(vec![])).await;
        controller.start().unwrap();
        controller.reset();
        controller.shutdown().await;

        let state = controller.status();
        assert_eq!(state.status, WorkflowStatus::Idle);
        assert!(state.phases.iter().all(|p| p.status == PhaseStatus::Pending));
        assert!(controller.logs().is_empty());
    }

    #[tokio::test]
    async fn test_full_run_after_approval() {
        let advisor = scripted(vec![
            ScriptedAdvisor::ok("Both servers run PostgreSQL 16."),
            ScriptedAdvisor::ok("```json\n{\"proceed\": true}\n```"),
            ScriptedAdvisor::ok("{\"steps\": [\"migrate users\"]}"),
            ScriptedAdvisor::ok("Risk is LOW."),
            ScriptedAdvisor::ok(RECOMMEND_APPROVE),
            ScriptedAdvisor::ok("All tables migrated."),
        ]);
        let (controller, destination) = configured(advisor.clone()).await;
        controller.start().unwrap();
        wait_for(&controller, WorkflowStatus::AwaitingApproval).await;

        match controller.report_by_name("generation").unwrap() {
            Some(PhaseResult::Generation(report)) => {
                assert_eq!(report.recommendation.decision, Verdict::Approve);
                assert_eq!(report.recommendation.confidence, "HIGH");
            }
            other => panic!("unexpected generation report: {:?}", other),
        }
        // The recommendation alone never passes the gate.
        assert_eq!(controller.status().status, WorkflowStatus::AwaitingApproval);

        controller.approve(Some("looks good".into())).unwrap();
        wait_for(&controller, WorkflowStatus::Completed).await;

        let state = controller.status();
        assert_eq!(state.approval.decision, Decision::Approved);
        assert_eq!(state.phase(Phase::Execution).status, PhaseStatus::Completed);
        assert!(state.completed_at.is_some());
        match controller.report(Phase::Execution) {
            Some(PhaseResult::Execution(outcome)) => {
                assert_eq!(outcome.report.statistics.successful_tables, 1);
                assert_eq!(outcome.success_rate, 100.0);
                assert!(outcome.final_report.analysis.is_some());
            }
            other => panic!("unexpected execution report: {:?}", other),
        }
        // Test migration rows plus the full run.
        assert_eq!(destination.table("public", "users").unwrap().rows.len(), 40);

        let requests = advisor.requests();
        let agents: Vec<&str> = requests.iter().map(|r| r.agent.as_str()).collect();
        assert_eq!(
            agents,
            vec!["discovery", "validation", "generation", "generation", "generation", "execution"]
        );
        let log = &requests[5].context["migration_log"];
        assert!(log.as_array().unwrap().len() <= FINAL_REPORT_LOG_ENTRIES);
        assert!(controller
            .logs()
            .iter()
            .any(|e| e.message.contains("Awaiting approval")));
    }

    #[tokio::test]
    async fn test_validation_failure_fails_workflow() {
        let (source, destination) = databases();
        // Discovery records the first failure, validation hits the second.
        source.fail_next("list_tables", "public", 2);
        let controller = WorkflowController::new(scripted(vec![]), migration());
        controller
            .configure_with(source.connector(), destination.connector())
            .await
            .unwrap();
        controller.start().unwrap();
        wait_for(&controller, WorkflowStatus::Failed).await;

        let state = controller.status();
        assert_eq!(state.phase(Phase::Validation).status, PhaseStatus::Failed);
        assert!(state
            .failure_reason
            .as_deref()
            .unwrap()
            .starts_with("validation phase failed"));
        assert_eq!(state.phase(Phase::Generation).status, PhaseStatus::Pending);
    }
}
