//! Advisory service contract.
//!
//! The workflow sends structured context to an external analyst and gets
//! back text that may contain JSON. Nothing in the core depends on the reply
//! being well formed; a failed call degrades the phase result only.

mod extract;
mod http;

pub use extract::{parse_braced, parse_direct, parse_fenced, Analysis};
pub use http::HttpAdvisor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A structured prompt for one analysis step.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryRequest {
    /// Short name of the requesting phase, e.g. `generation`.
    pub agent: String,
    pub role: String,
    /// Tasks in the order they should be addressed.
    pub tasks: Vec<String>,
    pub context: Value,
}

impl AdvisoryRequest {
    pub fn new(agent: &str, role: &str, tasks: &[&str], context: Value) -> Self {
        Self {
            agent: agent.to_string(),
            role: role.to_string(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            context,
        }
    }

    /// Render the prompt text: role, numbered tasks and the context as a
    /// fenced JSON block.
    pub fn render(&self) -> String {
        let mut prompt = format!(
            "You are the {} agent for a PostgreSQL database migration system.\n\nRole: {}\n\nTasks to perform:\n",
            self.agent, self.role
        );
        for (i, task) in self.tasks.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, task));
        }
        prompt.push_str(
            "\nPlease analyze the provided context and complete all tasks.\n\
             Return your findings in a clear, structured format using JSON where appropriate.\n",
        );
        if !self.context.is_null() {
            let context = serde_json::to_string_pretty(&self.context).unwrap_or_default();
            prompt.push_str(&format!("\nContext:\n```json\n{}\n```", context));
        }
        prompt
    }
}

/// Reply from the advisory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvisoryResponse {
    Success { response: String },
    Failure { error: String },
}

impl AdvisoryResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, AdvisoryResponse::Success { .. })
    }

    /// Parsed reply, or the error message for failed calls.
    pub fn analysis(&self) -> std::result::Result<Analysis, String> {
        match self {
            AdvisoryResponse::Success { response } => Ok(Analysis::parse(response)),
            AdvisoryResponse::Failure { error } => Err(error.clone()),
        }
    }
}

/// External analyst consulted by the planning phases.
#[async_trait]
pub trait AdvisoryService: Send + Sync {
    async fn submit(&self, request: &AdvisoryRequest) -> AdvisoryResponse;
}

/// Shared advisory handle.
pub type SharedAdvisor = Arc<dyn AdvisoryService>;

/// Stand-in used when no advisory endpoint is configured. Every call fails,
/// so phases record a degraded analysis and carry on.
#[derive(Debug, Default)]
pub struct OfflineAdvisor;

#[async_trait]
impl AdvisoryService for OfflineAdvisor {
    async fn submit(&self, request: &AdvisoryRequest) -> AdvisoryResponse {
        tracing::debug!("Advisory offline, skipping {} request", request.agent);
        AdvisoryResponse::Failure {
            error: "advisory service not configured".to_string(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_numbers_tasks_and_fences_context() {
        let req = AdvisoryRequest::new(
            "generation",
            "Plan the migration",
            &["Outline steps", "Estimate downtime"],
            json!({"tables": 3}),
        );
        let prompt = req.render();
        assert!(prompt.starts_with("You are the generation agent"));
        assert!(prompt.contains("Role: Plan the migration"));
        assert!(prompt.contains("1. Outline steps\n2. Estimate downtime\n"));
        assert!(prompt.contains("```json\n{\n  \"tables\": 3\n}\n```"));
    }

    #[test]
    fn test_response_analysis() {
        let ok = AdvisoryResponse::Success {
            response: "{\"risk\": \"LOW\"}".into(),
        };
        assert_eq!(
            ok.analysis().unwrap().as_structured().unwrap()["risk"],
            "LOW"
        );
        let failed = AdvisoryResponse::Failure {
            error: "timeout".into(),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.analysis().unwrap_err(), "timeout");
    }

    #[tokio::test]
    async fn test_offline_advisor_fails() {
        let req = AdvisoryRequest::new("discovery", "r", &[], Value::Null);
        assert!(!OfflineAdvisor.submit(&req).await.is_success());
    }
}
