//! OpenCode server client.
//!
//! Every call carries the task's working directory as the `directory` query
//! parameter so the server scopes the session to that checkout.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::agent::{AgentClient, ModelChoice, SessionId, SessionStatus};
use crate::config::AgentConfig;
use crate::error::AgentError;

const MAX_ERROR_BODY: usize = 500;

pub struct OpenCodeClient {
    base_url: Url,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SessionInfo {
    id: String,
}

#[derive(Deserialize)]
struct StatusEntry {
    #[serde(rename = "type")]
    kind: String,
}

impl OpenCodeClient {
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AgentError::Precondition(format!("invalid agent URL {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AgentError::Precondition(format!(
                "invalid agent URL {}",
                config.base_url
            )));
        }
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
        dir: &Path,
    ) -> Result<String, AgentError> {
        let dir_str = dir.to_string_lossy();
        if dir_str.trim().is_empty() {
            return Err(AgentError::Precondition(
                "working directory is empty".to_string(),
            ));
        }

        let resp = request
            .query(&[("directory", &*dir_str)])
            .send()
            .await
            .map_err(|e| AgentError::Transport {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| AgentError::Transport {
            operation: operation.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(AgentError::Http {
                operation: operation.to_string(),
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
        dir: &Path,
    ) -> Result<T, AgentError> {
        let body = self.send(operation, request, dir).await?;
        serde_json::from_str(&body).map_err(|e| AgentError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Request body for a text prompt with optional model override.
fn prompt_body(text: &str, model: &ModelChoice) -> serde_json::Value {
    let mut body = json!({ "parts": [{ "type": "text", "text": text }] });
    if let (Some(model_id), Some(provider_id)) = (&model.model, &model.provider) {
        body["model"] = json!({ "providerID": provider_id, "modelID": model_id });
    }
    body
}

#[async_trait]
impl AgentClient for OpenCodeClient {
    async fn create_session(&self, dir: &Path) -> Result<SessionId, AgentError> {
        let info: SessionInfo = self
            .send_json(
                "create_session",
                self.client.post(self.endpoint(&["session"])).json(&json!({})),
                dir,
            )
            .await?;
        if info.id.is_empty() {
            return Err(AgentError::Decode {
                operation: "create_session".to_string(),
                reason: "empty session id".to_string(),
            });
        }
        debug!(session = %info.id, dir = %dir.display(), "Agent session created");
        Ok(SessionId(info.id))
    }

    async fn send_prompt(
        &self,
        session: &SessionId,
        dir: &Path,
        text: &str,
        model: &ModelChoice,
    ) -> Result<(), AgentError> {
        if text.trim().is_empty() {
            return Err(AgentError::Precondition("prompt is empty".to_string()));
        }
        self.send(
            "send_prompt",
            self.client
                .post(self.endpoint(&["session", session.0.as_str(), "prompt_async"]))
                .json(&prompt_body(text, model)),
            dir,
        )
        .await?;
        debug!(session = %session, chars = text.len(), "Prompt submitted");
        Ok(())
    }

    async fn session_status(
        &self,
        session: &SessionId,
        dir: &Path,
    ) -> Result<SessionStatus, AgentError> {
        let statuses: HashMap<String, StatusEntry> = self
            .send_json(
                "session_status",
                self.client.get(self.endpoint(&["session", "status"])),
                dir,
            )
            .await?;

        // Sessions drop out of the map once they settle.
        let status = match statuses.get(&session.0).map(|entry| entry.kind.as_str()) {
            None | Some("idle") => SessionStatus::Idle,
            Some("busy") => SessionStatus::Busy,
            Some(other) => SessionStatus::Other(other.to_string()),
        };
        Ok(status)
    }
}
