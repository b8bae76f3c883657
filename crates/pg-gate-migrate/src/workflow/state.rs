//! Workflow state record.

use super::phases::{DiscoveryReport, ExecutionOutcome, GenerationReport, ValidationReport};
use crate::error::MigrateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Validation,
    Generation,
    Execution,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Discovery,
        Phase::Validation,
        Phase::Generation,
        Phase::Execution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Validation => "validation",
            Phase::Generation => "generation",
            Phase::Execution => "execution",
        }
    }

    fn index(&self) -> usize {
        match self {
            Phase::Discovery => 0,
            Phase::Validation => 1,
            Phase::Generation => 2,
            Phase::Execution => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                MigrateError::WorkflowState(format!(
                    "unknown phase '{}'. Valid phases: discovery, validation, generation, execution",
                    s
                ))
            })
    }
}

/// Top-level workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    AwaitingApproval,
    Completed,
    CompletedWithErrors,
    Denied,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Idle => "idle",
            WorkflowStatus::Running => "running",
            WorkflowStatus::AwaitingApproval => "awaiting_approval",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::CompletedWithErrors => "completed_with_errors",
            WorkflowStatus::Denied => "denied",
            WorkflowStatus::Failed => "failed",
        }
    }

    /// Start may not be requested in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Running | WorkflowStatus::AwaitingApproval)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::CompletedWithErrors
                | WorkflowStatus::Denied
                | WorkflowStatus::Failed
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-status of one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Last result of a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseResult {
    Discovery(DiscoveryReport),
    Validation(ValidationReport),
    Generation(GenerationReport),
    Execution(ExecutionOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<PhaseResult>,
    pub error: Option<String>,
}

impl PhaseState {
    fn pending(phase: Phase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Human decision at the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub decision: Decision,
    pub reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Default for ApprovalDecision {
    fn default() -> Self {
        Self {
            decision: Decision::Pending,
            reason: None,
            decided_at: None,
        }
    }
}

/// Snapshot of the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub status: WorkflowStatus,
    /// Phase currently running, or the last phase that ran.
    pub current_phase: Option<Phase>,
    pub configured: bool,
    pub phases: Vec<PhaseState>,
    pub approval: ApprovalDecision,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(configured: bool) -> Self {
        Self {
            status: WorkflowStatus::Idle,
            current_phase: None,
            configured,
            phases: Phase::ALL.into_iter().map(PhaseState::pending).collect(),
            approval: ApprovalDecision::default(),
            failure_reason: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn phase(&self, phase: Phase) -> &PhaseState {
        &self.phases[phase.index()]
    }

    pub(crate) fn phase_mut(&mut self, phase: Phase) -> &mut PhaseState {
        &mut self.phases[phase.index()]
    }
}
