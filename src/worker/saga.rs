//! The task saga: the ordered, compensable steps that turn one task into a
//! pushed branch and a pull-request link.
//!
//! The driver runs `SagaStep::ORDER` in sequence inside the owning worker and
//! stops at the first failing step. Steps register compensations as they
//! acquire resources; on failure every registered compensation runs once, in
//! reverse order, and the task is marked `FAILED`.
//!
//! Every step can be re-run after a crash: the working directory and the
//! branch name are derived from the task id, and the directory is wiped
//! before each clone.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentClient, ModelChoice, wait_until_idle};
use crate::config::{AgentConfig, RunnerConfig};
use crate::error::Error;
use crate::store::{Task, TaskStatus, TaskStore};
use crate::tracker::{Comment, Issue, IssueFields, IssueTracker};
use crate::vcs::{SourceControl, build_pull_request_url};
use crate::worker::prompt::build_prompt;
use crate::worker::state::{SagaState, SagaStep, StateTransition};
use crate::workspace::Workspaces;

/// Collaborators a saga talks to.
#[derive(Clone)]
pub struct SagaDeps {
    pub store: Arc<dyn TaskStore>,
    pub tracker: Arc<dyn IssueTracker>,
    pub vcs: Arc<dyn SourceControl>,
    pub agent: Arc<dyn AgentClient>,
    pub workspaces: Workspaces,
}

/// Per-process settings shared by every saga run.
#[derive(Debug, Clone)]
pub struct SagaSettings {
    pub repository_url: String,
    pub base_branch: String,
    pub branch_prefix: String,
    pub review_status: String,
    pub model: ModelChoice,
    pub agent_poll_interval: Duration,
    pub agent_max_wait: Duration,
}

impl SagaSettings {
    pub fn from_config(runner: &RunnerConfig, agent: &AgentConfig) -> Self {
        Self {
            repository_url: runner.repository_url.clone(),
            base_branch: runner.base_branch.clone(),
            branch_prefix: runner.branch_prefix.clone(),
            review_status: runner.review_status.clone(),
            model: ModelChoice {
                model: agent.model.clone(),
                provider: agent.provider.clone(),
            },
            agent_poll_interval: agent.poll_interval,
            agent_max_wait: agent.max_wait,
        }
    }
}

/// Cleanup registered by a step that acquired a resource.
#[derive(Debug, Clone, PartialEq)]
enum Compensation {
    RemoveWorkspace(PathBuf),
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct SagaReport {
    pub task_id: i64,
    pub key: String,
    pub branch: String,
    pub final_state: SagaState,
    pub transitions: Vec<StateTransition>,
    /// Set when the pull-request comment was posted.
    pub pull_request_url: Option<String>,
    /// Whether the tracker item reached the review status.
    pub review_transitioned: bool,
}

/// A run that stopped at `step`. Compensations have already run.
#[derive(Debug, thiserror::Error)]
#[error("task {task_id} ({key}) failed at {step}: {source}")]
pub struct SagaError {
    pub task_id: i64,
    pub key: String,
    pub step: SagaStep,
    pub final_state: SagaState,
    #[source]
    pub source: Error,
}

/// Mutable state of one run.
struct SagaContext {
    task: Task,
    state: SagaState,
    transitions: Vec<StateTransition>,
    compensations: Vec<Compensation>,
    comments: Vec<Comment>,
    prompt: String,
    pull_request_url: Option<String>,
    review_transitioned: bool,
}

impl SagaContext {
    fn new(task: Task) -> Self {
        Self {
            task,
            state: SagaState::Started,
            transitions: Vec::new(),
            compensations: Vec::new(),
            comments: Vec::new(),
            prompt: String::new(),
            pull_request_url: None,
            review_transitioned: false,
        }
    }

    fn advance(&mut self, target: SagaState) {
        if self.state == target {
            return;
        }
        if !self.state.can_transition_to(target) {
            warn!(
                task_id = self.task.id,
                from = %self.state,
                to = %target,
                "Unexpected saga state transition"
            );
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to: target,
            timestamp: Utc::now(),
        });
        self.state = target;
    }
}

/// Branch name for a task: `<prefix>/<key-slug>-<task id>`.
pub fn branch_name(prefix: &str, external_key: &str, task_id: i64) -> String {
    let slug: String = external_key
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let leaf = if slug.is_empty() {
        format!("task-{task_id}")
    } else {
        format!("{slug}-{task_id}")
    };

    let prefix = prefix.trim().trim_matches('/');
    if prefix.is_empty() {
        leaf
    } else {
        format!("{prefix}/{leaf}")
    }
}

/// Drives tasks through the saga steps.
pub struct TaskSaga {
    deps: SagaDeps,
    settings: SagaSettings,
}

impl TaskSaga {
    pub fn new(deps: SagaDeps, settings: SagaSettings) -> Self {
        Self { deps, settings }
    }

    /// Deterministic working directory of a task.
    pub fn work_dir(&self, task_id: i64) -> PathBuf {
        self.deps.workspaces.task_dir(task_id)
    }

    fn branch_for(&self, task: &Task) -> String {
        branch_name(&self.settings.branch_prefix, &task.external_key, task.id)
    }

    /// Run every step for `task`.
    ///
    /// Any step failure runs the registered compensations, marks the task
    /// `FAILED` (best effort) and is returned to the caller.
    pub async fn run(&self, task: Task) -> Result<SagaReport, SagaError> {
        let mut ctx = SagaContext::new(task);
        info!(
            task_id = ctx.task.id,
            key = %ctx.task.external_key,
            "Saga started"
        );

        for step in SagaStep::ORDER {
            ctx.advance(step.state());
            debug!(task_id = ctx.task.id, step = %step, "Running saga step");

            if let Err(source) = self.run_step(step, &mut ctx).await {
                error!(
                    task_id = ctx.task.id,
                    key = %ctx.task.external_key,
                    step = %step,
                    error = %source,
                    "Saga step failed"
                );
                self.compensate(&mut ctx).await;
                self.mark_failed(ctx.task.id).await;
                ctx.advance(SagaState::CompensatedFailed);
                return Err(SagaError {
                    task_id: ctx.task.id,
                    key: ctx.task.external_key.clone(),
                    step,
                    final_state: ctx.state,
                    source,
                });
            }
        }

        ctx.advance(SagaState::Succeeded);
        info!(
            task_id = ctx.task.id,
            key = %ctx.task.external_key,
            pull_request = ctx.pull_request_url.as_deref().unwrap_or("-"),
            "Saga succeeded"
        );

        Ok(SagaReport {
            task_id: ctx.task.id,
            key: ctx.task.external_key.clone(),
            branch: self.branch_for(&ctx.task),
            final_state: ctx.state,
            transitions: ctx.transitions,
            pull_request_url: ctx.pull_request_url,
            review_transitioned: ctx.review_transitioned,
        })
    }

    async fn run_step(&self, step: SagaStep, ctx: &mut SagaContext) -> Result<(), Error> {
        match step {
            SagaStep::MarkInProgress => self.mark_in_progress(ctx).await,
            SagaStep::PrepareWorkspace => self.prepare_workspace(ctx).await,
            SagaStep::GatherContext => self.gather_context(ctx).await,
            SagaStep::BuildPrompt => {
                self.build_prompt(ctx);
                Ok(())
            }
            SagaStep::InvokeAgent => self.invoke_agent(ctx).await,
            SagaStep::Finalize => self.finalize(ctx).await,
        }
    }

    async fn mark_in_progress(&self, ctx: &mut SagaContext) -> Result<(), Error> {
        self.deps
            .store
            .update_status(ctx.task.id, TaskStatus::InProgress)
            .await?;
        ctx.task.status = TaskStatus::InProgress;
        Ok(())
    }

    async fn prepare_workspace(&self, ctx: &mut SagaContext) -> Result<(), Error> {
        let dir = self.work_dir(ctx.task.id);
        // Registered first so a half-finished clone is cleaned up too.
        ctx.compensations
            .push(Compensation::RemoveWorkspace(dir.clone()));

        self.deps.workspaces.reset(&dir).await?;
        self.deps
            .vcs
            .clone_repo(&self.settings.repository_url, &dir)
            .await?;

        let branch = self.branch_for(&ctx.task);
        self.deps.vcs.create_branch(&dir, &branch).await?;
        info!(task_id = ctx.task.id, dir = %dir.display(), branch = %branch, "Workspace ready");
        Ok(())
    }

    async fn gather_context(&self, ctx: &mut SagaContext) -> Result<(), Error> {
        ctx.comments = self
            .deps
            .tracker
            .get_comments(&ctx.task.external_key)
            .await?;
        debug!(
            task_id = ctx.task.id,
            comments = ctx.comments.len(),
            "Fetched issue comments"
        );
        Ok(())
    }

    fn build_prompt(&self, ctx: &mut SagaContext) {
        let issue = Issue::from_snapshot(&ctx.task.snapshot).unwrap_or_else(|e| {
            warn!(task_id = ctx.task.id, error = %e, "Unreadable snapshot, prompting from key only");
            Issue {
                id: ctx.task.external_id.clone(),
                key: ctx.task.external_key.clone(),
                fields: IssueFields::default(),
                extra: Default::default(),
            }
        });
        ctx.prompt = build_prompt(&issue, &ctx.comments);
    }

    async fn invoke_agent(&self, ctx: &mut SagaContext) -> Result<(), Error> {
        let dir = self.work_dir(ctx.task.id);
        let agent = self.deps.agent.as_ref();

        let session = agent.create_session(&dir).await?;
        agent
            .send_prompt(&session, &dir, &ctx.prompt, &self.settings.model)
            .await?;
        info!(task_id = ctx.task.id, session = %session, "Prompt sent to agent");

        let took = wait_until_idle(
            agent,
            &session,
            &dir,
            self.settings.agent_poll_interval,
            self.settings.agent_max_wait,
        )
        .await?;
        info!(task_id = ctx.task.id, session = %session, took = ?took, "Agent finished");
        Ok(())
    }

    async fn finalize(&self, ctx: &mut SagaContext) -> Result<(), Error> {
        let key = ctx.task.external_key.clone();
        let dir = self.work_dir(ctx.task.id);

        match self
            .deps
            .tracker
            .transition_status(&key, &self.settings.review_status)
            .await
        {
            Ok(()) => ctx.review_transitioned = true,
            Err(e) => warn!(
                task_id = ctx.task.id,
                key = %key,
                status = %self.settings.review_status,
                error = %e,
                "Could not move issue to review"
            ),
        }

        match self.post_pull_request_link(&ctx.task, &dir).await {
            Ok(url) => ctx.pull_request_url = Some(url),
            Err(e) => warn!(
                task_id = ctx.task.id,
                key = %key,
                error = %e,
                "Could not post pull request link"
            ),
        }

        self.deps
            .store
            .update_status(ctx.task.id, TaskStatus::Done)
            .await?;
        ctx.task.status = TaskStatus::Done;
        ctx.compensations.clear();

        if let Err(e) = self.deps.workspaces.remove(&dir).await {
            warn!(task_id = ctx.task.id, error = %e, "Could not remove working directory");
        }
        Ok(())
    }

    async fn post_pull_request_link(&self, task: &Task, dir: &Path) -> Result<String, Error> {
        let remote = self.deps.vcs.remote_url(dir).await?;
        let url = build_pull_request_url(&remote, &self.branch_for(task), &self.settings.base_branch)?;
        self.deps
            .tracker
            .add_comment(
                &task.external_key,
                &format!("The agent finished work on {}.\nOpen a pull request: {url}", task.external_key),
            )
            .await?;
        Ok(url)
    }

    async fn compensate(&self, ctx: &mut SagaContext) {
        while let Some(compensation) = ctx.compensations.pop() {
            match compensation {
                Compensation::RemoveWorkspace(dir) => {
                    if let Err(e) = self.deps.workspaces.remove(&dir).await {
                        error!(
                            task_id = ctx.task.id,
                            dir = %dir.display(),
                            error = %e,
                            "Compensation failed to remove working directory"
                        );
                    }
                }
            }
        }
    }

    /// Best-effort `FAILED` write; errors are logged, never retried.
    async fn mark_failed(&self, task_id: i64) {
        if let Err(e) = self
            .deps
            .store
            .update_status(task_id, TaskStatus::Failed)
            .await
        {
            error!(task_id, error = %e, "Could not mark task FAILED");
        }
    }

    /// Clean up after a run that never returned (the saga task panicked).
    pub async fn abandon(&self, task_id: i64) {
        if let Err(e) = self.deps.workspaces.remove(&self.work_dir(task_id)).await {
            error!(task_id, error = %e, "Could not remove working directory");
        }
        self.mark_failed(task_id).await;
    }
}
