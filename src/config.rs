//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default status the poller looks for on assigned issues.
pub const DEFAULT_STATUS_FILTER: &str = "To Do";

/// Default tracker status an issue is moved to once the agent is done.
pub const DEFAULT_REVIEW_STATUS: &str = "In Review";

/// Issue tracker connection settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the Jira site, e.g. `https://acme.atlassian.net`.
    pub base_url: String,
    pub email: String,
    pub api_token: SecretString,
    /// Status name matched by the assigned-issues query.
    pub status_filter: String,
    /// Page size used for search and comment pagination.
    pub page_size: u32,
}

impl TrackerConfig {
    pub fn new(domain: &str, email: impl Into<String>, api_token: SecretString) -> Self {
        Self {
            base_url: jira_base_url(domain),
            email: email.into(),
            api_token,
            status_filter: DEFAULT_STATUS_FILTER.to_string(),
            page_size: 50,
        }
    }
}

/// Turn `acme`, `acme.atlassian.net` or a full URL into a base URL.
pub fn jira_base_url(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else if domain.contains('.') {
        format!("https://{domain}")
    } else {
        format!("https://{domain}.atlassian.net")
    }
}

/// Coding agent server settings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the agent HTTP server.
    pub base_url: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    /// Delay between session status checks.
    pub poll_interval: Duration,
    /// Upper bound on how long a single prompt may run.
    pub max_wait: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            model: None,
            provider: None,
            poll_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(30 * 60),
        }
    }
}

/// Orchestration settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Delay between the start of two poll cycles.
    pub poll_interval: Duration,
    /// Number of workers.
    pub concurrency: usize,
    /// Capacity of the work queue between poller and workers.
    pub queue_capacity: usize,
    /// Repository cloned for every task.
    pub repository_url: String,
    /// Branch pull requests target.
    pub base_branch: String,
    /// Parent directory of the per-task working directories.
    pub workspace_root: PathBuf,
    /// First path component of generated branch names.
    pub branch_prefix: String,
    /// Tracker status issues move to after the agent finishes.
    pub review_status: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            concurrency: 2,
            queue_capacity: 100,
            repository_url: String::new(),
            base_branch: "main".to_string(),
            workspace_root: std::env::temp_dir().join("issue-runner"),
            branch_prefix: "agent".to_string(),
            review_status: DEFAULT_REVIEW_STATUS.to_string(),
        }
    }
}

impl RunnerConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.repository_url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "repository_url".to_string(),
                hint: "Pass --repo-url or set ISSUE_RUNNER_REPO_URL.".to_string(),
            });
        }
        if self.base_branch.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "base_branch".to_string(),
                hint: "Pass --base-branch.".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_from_short_domain() {
        assert_eq!(jira_base_url("acme"), "https://acme.atlassian.net");
        assert_eq!(jira_base_url("acme.atlassian.net"), "https://acme.atlassian.net");
        assert_eq!(
            jira_base_url("http://localhost:8080/"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn default_runner_config_needs_repository() {
        let err = RunnerConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { key, .. } if key == "repository_url"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = RunnerConfig {
            repository_url: "git@github.com:acme/widgets.git".to_string(),
            concurrency: 0,
            ..RunnerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "concurrency"
        ));
    }

    #[test]
    fn valid_config_passes() {
        let config = RunnerConfig {
            repository_url: "git@github.com:acme/widgets.git".to_string(),
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
