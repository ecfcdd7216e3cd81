//! Error types for the issue runner.

use std::time::Duration;

use crate::store::TaskStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Source control error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Coarse classification of every failure the runner can report.
///
/// Callers use this to tell "service unreachable" apart from "service
/// answered with something unexpected" without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or HTTP failure talking to the tracker or the agent.
    Transport,
    /// The remote service responded with an unexpected shape.
    Decode,
    /// A local precondition failed before any side effect.
    Precondition,
    /// The task store rejected or failed an operation.
    Store,
    /// Local filesystem or subprocess failure.
    Local,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Precondition,
            Self::Database(_) => ErrorKind::Store,
            Self::Tracker(e) => e.kind(),
            Self::Vcs(e) => e.kind(),
            Self::Agent(e) => e.kind(),
            Self::Workspace(_) => ErrorKind::Local,
            Self::Queue(_) => ErrorKind::Local,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Issue tracker errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Tracker request {operation} failed: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Tracker request {operation} returned HTTP {status}: {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected tracker response for {operation}: {reason}")]
    Decode { operation: String, reason: String },

    #[error("Invalid tracker request: {0}")]
    Precondition(String),
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Http { .. } => ErrorKind::Transport,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Precondition(_) => ErrorKind::Precondition,
        }
    }
}

/// Source control errors.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Unrecognized remote URL: {0}")]
    UnsupportedRemote(String),

    #[error("Invalid source control request: {0}")]
    Precondition(String),
}

impl VcsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } | Self::CommandFailed { .. } => ErrorKind::Local,
            Self::UnsupportedRemote(_) | Self::Precondition(_) => ErrorKind::Precondition,
        }
    }
}

/// Coding agent errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent request {operation} failed: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Agent request {operation} returned HTTP {status}: {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected agent response for {operation}: {reason}")]
    Decode { operation: String, reason: String },

    #[error("Agent session {session_id} still {last_status} after {waited:?}")]
    Timeout {
        session_id: String,
        last_status: String,
        waited: Duration,
    },

    #[error("Invalid agent request: {0}")]
    Precondition(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Http { .. } | Self::Timeout { .. } => {
                ErrorKind::Transport
            }
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Precondition(_) => ErrorKind::Precondition,
        }
    }
}

/// Working directory errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Work queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Work queue closed, task {task_id} was not enqueued")]
    Closed { task_id: i64 },
}

/// Result type alias for the runner.
pub type Result<T> = std::result::Result<T, Error>;
