//! `TaskStore` trait and the task record it persists.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Orchestration status of a task.
///
/// `WaitingToWork → InProgress → {Done | Failed}`; the last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    WaitingToWork,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        Self::WaitingToWork,
        Self::InProgress,
        Self::Done,
        Self::Failed,
    ];

    /// Statuses that count towards the one-active-task-per-item rule.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::WaitingToWork | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// The only status a task may hold immediately before `self`.
    ///
    /// `WaitingToWork` has none: tasks are born in it and never return to it.
    pub fn predecessor(&self) -> Option<TaskStatus> {
        match self {
            Self::WaitingToWork => None,
            Self::InProgress => Some(Self::WaitingToWork),
            Self::Done | Self::Failed => Some(Self::InProgress),
        }
    }

    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        target.predecessor() == Some(*self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingToWork => "WAITING_TO_WORK",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

/// A persisted task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    pub external_id: String,
    pub external_key: String,
    pub external_status: String,
    pub status: TaskStatus,
    /// JSON copy of the tracker item as it looked when the task was created.
    pub snapshot: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the caller when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub external_id: String,
    pub external_key: String,
    pub external_status: String,
    pub snapshot: String,
}

/// Result of the atomic dedup-and-insert path.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// No active task existed; this one was created in `WAITING_TO_WORK`.
    Inserted(Task),
    /// An active task for the same external id already exists.
    AlreadyActive,
}

/// Backend-agnostic task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Most recently created active task for `external_id`, if any.
    async fn find_active(&self, external_id: &str) -> Result<Option<Task>, DatabaseError>;

    /// Create a task in `WAITING_TO_WORK`.
    ///
    /// Fails with a constraint error if an active task already exists for the
    /// same external id.
    async fn insert(&self, draft: &NewTask) -> Result<Task, DatabaseError>;

    /// Create a task unless an active one exists, as a single atomic write.
    async fn insert_if_inactive(&self, draft: &NewTask) -> Result<Admission, DatabaseError>;

    /// Move a task to `status` and refresh `updated_at`.
    ///
    /// Only forward transitions are accepted; anything else yields
    /// `DatabaseError::InvalidTransition` and leaves the row untouched.
    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), DatabaseError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Task>, DatabaseError>;

    /// Tasks with `status`, oldest first.
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError>;

    /// Every task, oldest first.
    async fn find_all(&self) -> Result<Vec<Task>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        use TaskStatus::*;
        assert!(WaitingToWork.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Done));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!WaitingToWork.can_transition_to(Done));
        assert!(!WaitingToWork.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(WaitingToWork));
    }

    #[test]
    fn display_honours_width() {
        assert_eq!(format!("{:<12}|", TaskStatus::Done), "DONE        |");
        assert_eq!(format!("{}", TaskStatus::InProgress), "IN_PROGRESS");
    }

    #[test]
    fn active_set() {
        assert!(TaskStatus::WaitingToWork.is_active());
        assert!(TaskStatus::InProgress.is_active());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn parse_accepts_cli_spellings() {
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert_eq!(
            "in-progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert_eq!(
            "WAITING_TO_WORK".parse::<TaskStatus>().unwrap(),
            TaskStatus::WaitingToWork
        );
        assert!("archived".parse::<TaskStatus>().is_err());
    }
}
