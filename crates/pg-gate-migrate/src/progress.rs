//! Progress log entries shared by the orchestrator and the workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Severity of a progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One line of user-visible progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

impl ProgressLogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            severity,
        }
    }
}

/// Receives progress entries.
pub trait ProgressSink: Send + Sync {
    fn record(&self, entry: ProgressLogEntry);

    fn info(&self, message: String) {
        self.record(ProgressLogEntry::new(Severity::Info, message));
    }

    fn warn(&self, message: String) {
        self.record(ProgressLogEntry::new(Severity::Warning, message));
    }

    fn error(&self, message: String) {
        self.record(ProgressLogEntry::new(Severity::Error, message));
    }
}

/// Emit an entry through `tracing` at the matching level.
pub fn trace_entry(entry: &ProgressLogEntry) {
    match entry.severity {
        Severity::Info => info!("{}", entry.message),
        Severity::Warning => warn!("{}", entry.message),
        Severity::Error => error!("{}", entry.message),
    }
}

/// Collects entries in memory.
#[derive(Debug, Default)]
pub struct LogBuffer {
    entries: Mutex<Vec<ProgressLogEntry>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ProgressLogEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for LogBuffer {
    fn record(&self, entry: ProgressLogEntry) {
        trace_entry(&entry);
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
