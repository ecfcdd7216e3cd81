//! Issue tracker abstraction.
//!
//! The orchestration core only sees the `IssueTracker` trait; `jira` holds the
//! Jira Cloud implementation.

pub mod adf;
pub mod jira;

pub use jira::JiraClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrackerError;

/// A tracker work item.
///
/// Unknown fields are kept in `extra` so the stored snapshot is the full item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub fields: IssueFields,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
    #[serde(default)]
    pub summary: String,
    /// ADF document, plain string, or null.
    #[serde(default)]
    pub description: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NamedField>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any `{ "name": … }` shaped field (status, issue type, priority).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedField {
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Issue {
    pub fn status_name(&self) -> &str {
        self.fields
            .status
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or_default()
    }

    /// Plain-text rendering of the description.
    pub fn description_text(&self) -> String {
        adf::to_plain_text(&self.fields.description)
    }

    /// Serialize the whole item for storage.
    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_snapshot(snapshot: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(snapshot)
    }
}

/// A comment on a tracker item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author: Option<CommentAuthor>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentAuthor {
    #[serde(default)]
    pub display_name: String,
}

impl Comment {
    pub fn author_name(&self) -> &str {
        match &self.author {
            Some(author) if !author.display_name.is_empty() => &author.display_name,
            _ => "Unknown",
        }
    }

    pub fn body_text(&self) -> String {
        adf::to_plain_text(&self.body)
    }
}

/// Operations the orchestrator needs from the issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Every item assigned to the configured account in the configured
    /// status, across all pages, in tracker order.
    async fn search_assigned_issues(&self) -> Result<Vec<Issue>, TrackerError>;

    /// All comments on an item, oldest first.
    async fn get_comments(&self, key: &str) -> Result<Vec<Comment>, TrackerError>;

    /// Apply the transition leading to `status_name`.
    ///
    /// Fails with `TrackerError::Precondition` if no such transition exists.
    async fn transition_status(&self, key: &str, status_name: &str) -> Result<(), TrackerError>;

    async fn add_comment(&self, key: &str, text: &str) -> Result<(), TrackerError>;
}
