//! Jira Cloud REST client.
//!
//! Uses API-token Basic auth against `/rest/api/3`. Search uses the
//! token-paginated `search/jql` endpoint; comments use offset pagination.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::tracker::{Comment, Issue, IssueTracker, adf};

/// Maximum number of characters of an error body kept in errors.
const MAX_ERROR_BODY: usize = 500;

pub struct JiraClient {
    base_url: Url,
    email: String,
    api_token: SecretString,
    status_filter: String,
    page_size: u32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    is_last: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentPage {
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct TransitionList {
    #[serde(default)]
    transitions: Vec<Transition>,
}

#[derive(Deserialize)]
struct Transition {
    id: String,
    name: String,
    #[serde(default)]
    to: Option<TransitionTarget>,
}

#[derive(Deserialize)]
struct TransitionTarget {
    name: String,
}

impl JiraClient {
    pub fn new(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            TrackerError::Precondition(format!("invalid Jira URL {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TrackerError::Precondition(format!(
                "invalid Jira URL {}",
                config.base_url
            )));
        }
        if config.email.trim().is_empty() {
            return Err(TrackerError::Precondition("Jira email is empty".to_string()));
        }
        if config.status_filter.trim().is_empty() {
            return Err(TrackerError::Precondition(
                "status filter is empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            status_filter: config.status_filter.clone(),
            page_size: config.page_size.max(1),
            client: reqwest::Client::new(),
        })
    }

    /// JQL selecting the issues this runner works on.
    pub fn search_jql(&self) -> String {
        assigned_issues_jql(&self.status_filter)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(["rest", "api", "3"])
                .extend(segments);
        }
        url
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.email, Some(self.api_token.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json")
    }

    /// Send a request and return the body of a successful response.
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<String, TrackerError> {
        let resp = self
            .authed(request)
            .send()
            .await
            .map_err(|e| TrackerError::Transport {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| TrackerError::Transport {
            operation: operation.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            return Err(http_error(operation, status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, TrackerError> {
        let body = self.send(operation, request).await?;
        serde_json::from_str(&body).map_err(|e| TrackerError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        })
    }
}

fn http_error(operation: &str, status: StatusCode, body: &str) -> TrackerError {
    TrackerError::Http {
        operation: operation.to_string(),
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

fn require_key(key: &str) -> Result<(), TrackerError> {
    if key.trim().is_empty() {
        return Err(TrackerError::Precondition("issue key is empty".to_string()));
    }
    Ok(())
}

/// Build the assigned-issues JQL for a status, escaping quotes.
pub fn assigned_issues_jql(status: &str) -> String {
    let escaped = status.replace('\\', "\\\\").replace('"', "\\\"");
    format!("assignee = currentUser() AND status = \"{escaped}\" ORDER BY created ASC")
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn search_assigned_issues(&self) -> Result<Vec<Issue>, TrackerError> {
        let jql = self.search_jql();
        let mut issues = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("jql", jql.clone()),
                ("maxResults", self.page_size.to_string()),
                ("fields", "*navigable".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("nextPageToken", token.clone()));
            }

            let page: SearchPage = self
                .send_json(
                    "search",
                    self.client.get(self.endpoint(&["search", "jql"])).query(&query),
                )
                .await?;

            debug!(count = page.issues.len(), "Fetched search page");
            issues.extend(page.issues);

            match page.next_page_token {
                Some(next) if page.is_last != Some(true) && page_token.as_ref() != Some(&next) => {
                    page_token = Some(next);
                }
                _ => break,
            }
        }

        Ok(issues)
    }

    async fn get_comments(&self, key: &str) -> Result<Vec<Comment>, TrackerError> {
        require_key(key)?;
        let mut comments = Vec::new();

        loop {
            let start_at = comments.len();
            let page: CommentPage = self
                .send_json(
                    "get_comments",
                    self.client
                        .get(self.endpoint(&["issue", key, "comment"]))
                        .query(&[
                            ("startAt", start_at.to_string()),
                            ("maxResults", self.page_size.to_string()),
                            ("orderBy", "created".to_string()),
                        ]),
                )
                .await?;

            let fetched = page.comments.len();
            comments.extend(page.comments);
            if fetched == 0 || comments.len() as u64 >= page.total {
                break;
            }
        }

        Ok(comments)
    }

    async fn transition_status(&self, key: &str, status_name: &str) -> Result<(), TrackerError> {
        require_key(key)?;
        if status_name.trim().is_empty() {
            return Err(TrackerError::Precondition(
                "target status is empty".to_string(),
            ));
        }

        let url = self.endpoint(&["issue", key, "transitions"]);
        let list: TransitionList = self
            .send_json("list_transitions", self.client.get(url.clone()))
            .await?;

        let Some(transition) = list.transitions.iter().find(|t| {
            t.name.eq_ignore_ascii_case(status_name)
                || t
                    .to
                    .as_ref()
                    .is_some_and(|to| to.name.eq_ignore_ascii_case(status_name))
        }) else {
            let available: Vec<&str> = list.transitions.iter().map(|t| t.name.as_str()).collect();
            return Err(TrackerError::Precondition(format!(
                "no transition to '{status_name}' for {key} (available: {})",
                available.join(", ")
            )));
        };

        self.send(
            "transition",
            self.client
                .post(url)
                .json(&json!({ "transition": { "id": transition.id } })),
        )
        .await?;

        debug!(key = key, transition = %transition.name, "Issue transitioned");
        Ok(())
    }

    async fn add_comment(&self, key: &str, text: &str) -> Result<(), TrackerError> {
        require_key(key)?;
        if text.trim().is_empty() {
            return Err(TrackerError::Precondition("comment is empty".to_string()));
        }

        self.send(
            "add_comment",
            self.client
                .post(self.endpoint(&["issue", key, "comment"]))
                .json(&json!({ "body": adf::text_document(text) })),
        )
        .await?;

        debug!(key = key, "Comment added");
        Ok(())
    }
}
