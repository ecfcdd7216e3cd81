//! Saga state machine.
//!
//! Tracks where a single saga run is. This is separate from the persisted
//! `TaskStatus`: the store only knows waiting/in-progress/done/failed, while
//! the saga reports finer progress in logs and in its run report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of one saga run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    Started,
    Preparing,
    ContextGathering,
    AgentRunning,
    Finalizing,
    Succeeded,
    CompensatedFailed,
}

impl SagaState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SagaState) -> bool {
        use SagaState::*;

        if target == CompensatedFailed {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Started, Preparing)
                | (Preparing, ContextGathering)
                | (ContextGathering, AgentRunning)
                | (AgentRunning, Finalizing)
                | (Finalizing, Succeeded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::CompensatedFailed)
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Preparing => "preparing",
            Self::ContextGathering => "context_gathering",
            Self::AgentRunning => "agent_running",
            Self::Finalizing => "finalizing",
            Self::Succeeded => "succeeded",
            Self::CompensatedFailed => "compensated_failed",
        };
        write!(f, "{s}")
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SagaState,
    pub to: SagaState,
    pub timestamp: DateTime<Utc>,
}

/// The named steps of a saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStep {
    MarkInProgress,
    PrepareWorkspace,
    GatherContext,
    BuildPrompt,
    InvokeAgent,
    Finalize,
}

impl SagaStep {
    pub const ORDER: [SagaStep; 6] = [
        Self::MarkInProgress,
        Self::PrepareWorkspace,
        Self::GatherContext,
        Self::BuildPrompt,
        Self::InvokeAgent,
        Self::Finalize,
    ];

    /// Saga state while this step runs.
    pub fn state(&self) -> SagaState {
        match self {
            Self::MarkInProgress => SagaState::Started,
            Self::PrepareWorkspace => SagaState::Preparing,
            Self::GatherContext | Self::BuildPrompt => SagaState::ContextGathering,
            Self::InvokeAgent => SagaState::AgentRunning,
            Self::Finalize => SagaState::Finalizing,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MarkInProgress => "mark_in_progress",
            Self::PrepareWorkspace => "prepare_workspace",
            Self::GatherContext => "gather_context",
            Self::BuildPrompt => "build_prompt",
            Self::InvokeAgent => "invoke_agent",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
