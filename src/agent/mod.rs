//! Coding agent abstraction.
//!
//! The agent runs as a separate server. A session is created per task,
//! scoped to the task's working directory, and receives a single prompt. The
//! runner then polls until the session goes idle.

pub mod opencode;

pub use opencode::OpenCodeClient;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::error::AgentError;

/// Identifier of an agent session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse session state as reported by the agent server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Finished processing the last prompt.
    Idle,
    /// Still working.
    Busy,
    /// Anything else the server reports (e.g. `retry`).
    Other(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Busy => f.write_str("busy"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Prompt model selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelChoice {
    pub model: Option<String>,
    pub provider: Option<String>,
}

/// Operations the saga needs from the coding agent.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create_session(&self, dir: &Path) -> Result<SessionId, AgentError>;

    /// Submit a prompt. Returns once the server accepted it, not when the
    /// agent finished.
    async fn send_prompt(
        &self,
        session: &SessionId,
        dir: &Path,
        text: &str,
        model: &ModelChoice,
    ) -> Result<(), AgentError>;

    async fn session_status(
        &self,
        session: &SessionId,
        dir: &Path,
    ) -> Result<SessionStatus, AgentError>;
}

/// Poll `session` every `interval` until it is idle or `max_wait` elapses.
///
/// The first check happens one interval after the call. A session that was
/// just prompted may not be listed as busy yet, and an unlisted session
/// reads as idle. After the deadline one last status check is made before
/// giving up with `AgentError::Timeout`. Status errors abort the wait
/// immediately.
pub async fn wait_until_idle(
    agent: &dyn AgentClient,
    session: &SessionId,
    dir: &Path,
    interval: Duration,
    max_wait: Duration,
) -> Result<Duration, AgentError> {
    let started = Instant::now();
    let deadline = started + max_wait;
    tokio::time::sleep(interval.min(max_wait)).await;

    loop {
        let status = agent.session_status(session, dir).await?;
        if status == SessionStatus::Idle {
            return Ok(started.elapsed());
        }
        debug!(session = %session, status = %status, "Agent still working");

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }

    let last = agent.session_status(session, dir).await?;
    if last == SessionStatus::Idle {
        return Ok(started.elapsed());
    }
    Err(AgentError::Timeout {
        session_id: session.0.clone(),
        last_status: last.to_string(),
        waited: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays a fixed sequence of statuses, repeating the last one.
    struct Scripted {
        statuses: Mutex<Vec<SessionStatus>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(statuses: Vec<SessionStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl AgentClient for Scripted {
        async fn create_session(&self, _dir: &Path) -> Result<SessionId, AgentError> {
            Ok(SessionId("s".into()))
        }

        async fn send_prompt(
            &self,
            _session: &SessionId,
            _dir: &Path,
            _text: &str,
            _model: &ModelChoice,
        ) -> Result<(), AgentError> {
            Ok(())
        }

        async fn session_status(
            &self,
            _session: &SessionId,
            _dir: &Path,
        ) -> Result<SessionStatus, AgentError> {
            *self.calls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.remove(0))
            } else {
                Ok(statuses[0].clone())
            }
        }
    }

    fn session() -> SessionId {
        SessionId("ses_1".into())
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_idle() {
        let agent = Scripted::new(vec![
            SessionStatus::Busy,
            SessionStatus::Busy,
            SessionStatus::Idle,
        ]);
        wait_until_idle(
            &agent,
            &session(),
            Path::new("/tmp/w"),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_one_final_check() {
        let agent = Scripted::new(vec![SessionStatus::Busy]);
        let err = wait_until_idle(
            &agent,
            &session(),
            Path::new("/tmp/w"),
            Duration::from_secs(5),
            Duration::from_secs(12),
        )
        .await
        .unwrap_err();

        // t=5, 10, 12 inside the window, then the final check.
        assert_eq!(agent.calls(), 4);
        assert!(matches!(err, AgentError::Timeout { last_status, .. } if last_status == "busy"));
    }

    #[tokio::test(start_paused = true)]
    async fn final_check_can_still_succeed() {
        let agent = Scripted::new(vec![
            SessionStatus::Busy,
            SessionStatus::Other("retry".into()),
            SessionStatus::Idle,
        ]);
        wait_until_idle(
            &agent,
            &session(),
            Path::new("/tmp/w"),
            Duration::from_secs(10),
            Duration::from_secs(15),
        )
        .await
        .unwrap();
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_waits_one_interval() {
        let agent = Scripted::new(vec![SessionStatus::Idle]);
        let waited = wait_until_idle(
            &agent,
            &session(),
            Path::new("/tmp/w"),
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert!(waited >= Duration::from_secs(5), "{waited:?}");
        assert_eq!(agent.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_deadline_caps_the_first_wait() {
        let agent = Scripted::new(vec![SessionStatus::Busy]);
        let err = wait_until_idle(
            &agent,
            &session(),
            Path::new("/tmp/w"),
            Duration::from_secs(30),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();

        // t=2 inside the window, then the final check.
        assert_eq!(agent.calls(), 2);
        assert!(matches!(err, AgentError::Timeout { waited, .. } if waited < Duration::from_secs(30)));
    }
}
