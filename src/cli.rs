//! Command line interface.
//!
//! Every `start` option falls back to an environment variable, so a `.env`
//! file is enough to run the engine.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;

use crate::config::{
    AgentConfig, DEFAULT_REVIEW_STATUS, DEFAULT_STATUS_FILTER, RunnerConfig, TrackerConfig,
};
use crate::queue::DEFAULT_CAPACITY;
use crate::store::{Task, TaskStatus};

#[derive(Debug, Parser)]
#[command(name = "issue-runner", version, about = "Turns assigned tracker issues into agent-made branches")]
pub struct Cli {
    /// Path of the task database
    #[arg(long, global = true, env = "ISSUE_RUNNER_DB_PATH", default_value = "./data/issue-runner.db")]
    pub db_path: PathBuf,

    /// Log filter, e.g. "info" or "issue_runner=debug". Overrides RUST_LOG.
    #[arg(long, global = true, env = "ISSUE_RUNNER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Also write logs to a daily-rolling file with this path prefix
    #[arg(long, global = true, env = "ISSUE_RUNNER_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the poller and the worker pool until interrupted
    Start(StartArgs),
    /// Print stored tasks
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Jira site: `acme`, `acme.atlassian.net` or a full URL
    #[arg(long, env = "JIRA_DOMAIN")]
    pub jira_domain: String,

    #[arg(long, env = "JIRA_EMAIL")]
    pub jira_email: String,

    #[arg(long, env = "JIRA_API_TOKEN", hide_env_values = true)]
    pub jira_api_token: String,

    /// Issue status picked up by the poller
    #[arg(long, env = "JIRA_STATUS", default_value = DEFAULT_STATUS_FILTER)]
    pub status: String,

    /// Seconds between poll cycles
    #[arg(long = "poll-interval", env = "ISSUE_RUNNER_POLL_INTERVAL", default_value_t = 60)]
    pub poll_interval_secs: u64,

    /// Number of tasks worked on at once
    #[arg(long, env = "ISSUE_RUNNER_CONCURRENCY", default_value_t = 2)]
    pub concurrency: usize,

    #[arg(long, env = "ISSUE_RUNNER_QUEUE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub queue_capacity: usize,

    /// Repository cloned for every task
    #[arg(long, env = "ISSUE_RUNNER_REPO_URL")]
    pub repo_url: String,

    #[arg(long, env = "ISSUE_RUNNER_BASE_BRANCH", default_value = "main")]
    pub base_branch: String,

    /// Parent directory of per-task checkouts [default: <tmp>/issue-runner]
    #[arg(long, env = "ISSUE_RUNNER_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    #[arg(long, env = "ISSUE_RUNNER_BRANCH_PREFIX", default_value = "agent")]
    pub branch_prefix: String,

    /// Tracker status an issue moves to once the agent is done
    #[arg(long, env = "ISSUE_RUNNER_REVIEW_STATUS", default_value = DEFAULT_REVIEW_STATUS)]
    pub review_status: String,

    /// Base URL of the OpenCode server
    #[arg(long, env = "OPENCODE_URL", default_value = "http://127.0.0.1:4096")]
    pub agent_url: String,

    #[arg(long, env = "OPENCODE_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "OPENCODE_PROVIDER")]
    pub provider: Option<String>,

    /// Seconds between agent status checks
    #[arg(long = "agent-poll-interval", env = "ISSUE_RUNNER_AGENT_POLL_INTERVAL", default_value_t = 5)]
    pub agent_poll_interval_secs: u64,

    /// Seconds a single agent run may take
    #[arg(long = "agent-max-wait", env = "ISSUE_RUNNER_AGENT_MAX_WAIT", default_value_t = 1800)]
    pub agent_max_wait_secs: u64,
}

impl StartArgs {
    pub fn tracker_config(&self) -> TrackerConfig {
        let mut config = TrackerConfig::new(
            &self.jira_domain,
            self.jira_email.clone(),
            SecretString::from(self.jira_api_token.clone()),
        );
        config.status_filter = self.status.clone();
        config
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            base_url: self.agent_url.clone(),
            model: self.model.clone(),
            provider: self.provider.clone(),
            poll_interval: Duration::from_secs(self.agent_poll_interval_secs),
            max_wait: Duration::from_secs(self.agent_max_wait_secs),
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let defaults = RunnerConfig::default();
        RunnerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            concurrency: self.concurrency,
            queue_capacity: self.queue_capacity,
            repository_url: self.repo_url.clone(),
            base_branch: self.base_branch.clone(),
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or(defaults.workspace_root),
            branch_prefix: self.branch_prefix.clone(),
            review_status: self.review_status.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only show tasks in this status (waiting_to_work, in_progress, done, failed)
    #[arg(long)]
    pub status: Option<TaskStatus>,

    /// Show at most this many tasks, newest first
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Column header for `list`, aligned with [`task_row`].
pub const TASK_TABLE_HEADER: &str = "ID     STATUS           KEY            UPDATED              TRACKER STATUS";

/// One `list` line for `task`.
pub fn task_row(task: &Task) -> String {
    format!(
        "{:<6} {:<16} {:<14} {:<20} {}",
        task.id,
        task.status,
        task.external_key,
        task.updated_at.format("%Y-%m-%d %H:%M:%S"),
        task.external_status
    )
}
