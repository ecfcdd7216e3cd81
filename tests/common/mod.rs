//! Shared fakes for the integration tests.
//!
//! Each fake records what the engine asked of it and can be told to fail.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use issue_runner::agent::{AgentClient, ModelChoice, SessionId, SessionStatus};
use issue_runner::error::{AgentError, TrackerError, VcsError};
use issue_runner::poller::Poller;
use issue_runner::queue::{WorkQueue, WorkReceiver, work_queue};
use issue_runner::store::{LibSqlBackend, TaskStore};
use issue_runner::tracker::{Comment, Issue, IssueTracker};
use issue_runner::vcs::SourceControl;
use issue_runner::worker::{SagaDeps, SagaSettings, TaskSaga};
use issue_runner::workspace::Workspaces;

pub const REMOTE: &str = "git@github.com:acme/app.git";

pub fn issue(id: &str, key: &str, summary: &str) -> Issue {
    serde_json::from_value(json!({
        "id": id,
        "key": key,
        "fields": {
            "summary": summary,
            "status": { "name": "To Do" },
            "description": {
                "type": "doc",
                "content": [{ "type": "paragraph", "content": [{ "type": "text", "text": "Please fix" }] }]
            }
        }
    }))
    .unwrap()
}

pub fn comment(author: &str, text: &str) -> Comment {
    serde_json::from_value(json!({
        "id": "1",
        "author": { "displayName": author },
        "created": "2024-05-01T10:00:00.000+0000",
        "body": text
    }))
    .unwrap()
}

fn transport(operation: &str) -> TrackerError {
    TrackerError::Transport {
        operation: operation.to_string(),
        reason: "connection reset".to_string(),
    }
}

#[derive(Default)]
pub struct FakeTracker {
    pub issues: Mutex<Vec<Issue>>,
    pub comments: Mutex<Vec<Comment>>,
    pub fail_get_comments: AtomicBool,
    pub fail_transition: AtomicBool,
    pub fail_add_comment: AtomicBool,
    pub transitions: Mutex<Vec<(String, String)>>,
    pub posted: Mutex<Vec<(String, String)>>,
}

impl FakeTracker {
    pub fn with_issues(issues: Vec<Issue>) -> Self {
        Self {
            issues: Mutex::new(issues),
            ..Default::default()
        }
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn search_assigned_issues(&self) -> Result<Vec<Issue>, TrackerError> {
        Ok(self.issues.lock().unwrap().clone())
    }

    async fn get_comments(&self, _key: &str) -> Result<Vec<Comment>, TrackerError> {
        if self.fail_get_comments.load(Ordering::SeqCst) {
            return Err(transport("get_comments"));
        }
        Ok(self.comments.lock().unwrap().clone())
    }

    async fn transition_status(&self, key: &str, status_name: &str) -> Result<(), TrackerError> {
        if self.fail_transition.load(Ordering::SeqCst) {
            return Err(TrackerError::Precondition(format!(
                "no transition to '{status_name}' for {key}"
            )));
        }
        self.transitions
            .lock()
            .unwrap()
            .push((key.to_string(), status_name.to_string()));
        Ok(())
    }

    async fn add_comment(&self, key: &str, text: &str) -> Result<(), TrackerError> {
        if self.fail_add_comment.load(Ordering::SeqCst) {
            return Err(transport("add_comment"));
        }
        self.posted
            .lock()
            .unwrap()
            .push((key.to_string(), text.to_string()));
        Ok(())
    }
}

/// Pretends to clone by creating the directory with a marker file.
#[derive(Default)]
pub struct FakeVcs {
    /// Number of upcoming clones that fail after creating the directory.
    pub failing_clones: AtomicUsize,
    /// Number of upcoming clones that panic after creating the directory.
    pub panicking_clones: AtomicUsize,
    pub branches: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl SourceControl for FakeVcs {
    async fn clone_repo(&self, _url: &str, dir: &Path) -> Result<(), VcsError> {
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        std::fs::write(dir.join("README.md"), "hello").unwrap();

        let panic = self
            .panicking_clones
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if panic {
            panic!("clone of {} blew up", dir.display());
        }

        let fail = self
            .failing_clones
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(VcsError::CommandFailed {
                command: "git clone".to_string(),
                status: "exit status: 128".to_string(),
                stderr: "fatal: early EOF".to_string(),
            });
        }
        Ok(())
    }

    async fn create_branch(&self, dir: &Path, name: &str) -> Result<(), VcsError> {
        self.branches
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), name.to_string()));
        Ok(())
    }

    async fn remote_url(&self, _dir: &Path) -> Result<String, VcsError> {
        Ok(REMOTE.to_string())
    }
}

/// Agent that reports `busy` for `busy_polls` checks, then idle.
#[derive(Default)]
pub struct FakeAgent {
    pub fail_create_session: AtomicBool,
    pub never_idle: AtomicBool,
    pub busy_polls: AtomicUsize,
    pub prompts: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn create_session(&self, dir: &Path) -> Result<SessionId, AgentError> {
        if self.fail_create_session.load(Ordering::SeqCst) {
            return Err(AgentError::Http {
                operation: "create_session".to_string(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        assert!(dir.exists(), "session requested for a missing directory");
        Ok(SessionId("ses_test".to_string()))
    }

    async fn send_prompt(
        &self,
        _session: &SessionId,
        dir: &Path,
        text: &str,
        _model: &ModelChoice,
    ) -> Result<(), AgentError> {
        self.prompts
            .lock()
            .unwrap()
            .push((dir.to_path_buf(), text.to_string()));
        Ok(())
    }

    async fn session_status(
        &self,
        _session: &SessionId,
        _dir: &Path,
    ) -> Result<SessionStatus, AgentError> {
        if self.never_idle.load(Ordering::SeqCst) {
            return Ok(SessionStatus::Busy);
        }
        let busy = self
            .busy_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(if busy {
            SessionStatus::Busy
        } else {
            SessionStatus::Idle
        })
    }
}

/// Engine wired to in-memory storage and fakes.
pub struct Harness {
    pub store: Arc<dyn TaskStore>,
    pub tracker: Arc<FakeTracker>,
    pub vcs: Arc<FakeVcs>,
    pub agent: Arc<FakeAgent>,
    pub workspaces: Workspaces,
    pub saga: Arc<TaskSaga>,
    _tmp: TempDir,
}

impl Harness {
    pub async fn new(issues: Vec<Issue>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store: Arc<dyn TaskStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let tracker = Arc::new(FakeTracker::with_issues(issues));
        let vcs = Arc::new(FakeVcs::default());
        let agent = Arc::new(FakeAgent::default());
        let workspaces = Workspaces::new(tmp.path().join("work"));

        let saga = Arc::new(TaskSaga::new(
            SagaDeps {
                store: Arc::clone(&store),
                tracker: tracker.clone(),
                vcs: vcs.clone(),
                agent: agent.clone(),
                workspaces: workspaces.clone(),
            },
            SagaSettings {
                repository_url: REMOTE.to_string(),
                base_branch: "main".to_string(),
                branch_prefix: "agent".to_string(),
                review_status: "In Review".to_string(),
                model: ModelChoice::default(),
                agent_poll_interval: Duration::from_millis(5),
                agent_max_wait: Duration::from_millis(200),
            },
        ));

        Self {
            store,
            tracker,
            vcs,
            agent,
            workspaces,
            saga,
            _tmp: tmp,
        }
    }

    pub fn queue(&self, capacity: usize) -> (WorkQueue, WorkReceiver) {
        work_queue(capacity)
    }

    pub fn poller(&self, queue: WorkQueue) -> Poller {
        Poller::new(self.tracker.clone(), Arc::clone(&self.store), queue)
    }
}
