//! HTTP advisory client.
//!
//! Talks to a session-based chat API: one session is created lazily and
//! every request is posted as a message on it.

use super::{AdvisoryRequest, AdvisoryResponse, AdvisoryService};
use crate::config::AdvisoryConfig;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(2);
const SYSTEM_PROMPT: &str = "You are an expert database migration assistant.";

/// Advisory service reached over HTTP.
pub struct HttpAdvisor {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model_id: String,
    max_attempts: u32,
    timeout: Duration,
    session_id: Mutex<Option<String>>,
}

impl HttpAdvisor {
    pub fn new(config: &AdvisoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| MigrateError::Advisory(format!("building HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model_id: config.model_id.clone(),
            max_attempts: config.max_attempts.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            session_id: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<String> {
        let mut guard = self.session_id.lock().await;
        if let Some(id) = guard.as_ref() {
            return Ok(id.clone());
        }

        let url = format!("{}/v1/sessions", self.api_url);
        let body: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(SESSION_TIMEOUT)
            .json(&json!({ "model": self.model_id, "system_prompt": SYSTEM_PROMPT }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MigrateError::Advisory(format!("creating session: {}", e)))?
            .json()
            .await
            .map_err(|e| MigrateError::Advisory(format!("decoding session: {}", e)))?;

        let id = session_id_from(&body).ok_or_else(|| {
            MigrateError::Advisory("session response carried no session id".to_string())
        })?;
        info!("Created advisory session: {}", id);
        *guard = Some(id.clone());
        Ok(id)
    }

    async fn post_message(&self, session: &str, message: &str) -> Result<String> {
        let url = format!("{}/v1/sessions/{}/messages", self.api_url, session);
        let body: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!({ "message": message, "model": self.model_id }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MigrateError::Advisory(e.to_string()))?
            .json()
            .await
            .map_err(|e| MigrateError::Advisory(format!("decoding reply: {}", e)))?;
        Ok(response_text(&body))
    }
}

#[async_trait]
impl AdvisoryService for HttpAdvisor {
    async fn submit(&self, request: &AdvisoryRequest) -> AdvisoryResponse {
        let session = match self.session().await {
            Ok(id) => id,
            Err(e) => return AdvisoryResponse::Failure { error: e.to_string() },
        };
        let prompt = request.render();

        let mut last_error = String::from("no attempts made");
        for attempt in 1..=self.max_attempts {
            match self.post_message(&session, &prompt).await {
                Ok(response) => return AdvisoryResponse::Success { response },
                Err(e) => {
                    warn!(
                        "Advisory request for {} failed (attempt {}/{}): {}",
                        request.agent, attempt, self.max_attempts, e
                    );
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        AdvisoryResponse::Failure { error: last_error }
    }
}

fn session_id_from(body: &Value) -> Option<String> {
    body.get("session_id")
        .or_else(|| body.get("id"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reply text from the first known field, else the whole body.
fn response_text(body: &Value) -> String {
    for field in ["response", "message", "content", "text"] {
        if let Some(v) = body.get(field) {
            return value_text(v);
        }
    }
    if let Some(choice) = body.get("choices").and_then(|c| c.get(0)) {
        if let Some(message) = choice.get("message") {
            return message.get("content").map(value_text).unwrap_or_default();
        }
        if let Some(text) = choice.get("text") {
            return value_text(text);
        }
    }
    body.to_string()
}
