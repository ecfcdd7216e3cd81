//! `git` command runner.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::VcsError;
use crate::vcs::SourceControl;

/// Runs the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, VcsError> {
        let command = format!("{} {}", self.program, args.join(" "));
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            // Never block on a credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!(command = %command, "Running git");
        let output = cmd.output().await.map_err(|source| VcsError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn require(value: &str, what: &str) -> Result<(), VcsError> {
    if value.trim().is_empty() {
        return Err(VcsError::Precondition(format!("{what} is empty")));
    }
    Ok(())
}

#[async_trait]
impl SourceControl for GitCli {
    async fn clone_repo(&self, url: &str, dir: &Path) -> Result<(), VcsError> {
        require(url, "repository URL")?;
        let dir_str = dir.to_string_lossy().into_owned();
        require(&dir_str, "clone directory")?;
        self.run(None, &["clone", "--quiet", url, dir_str.as_str()])
            .await?;
        Ok(())
    }

    async fn create_branch(&self, dir: &Path, name: &str) -> Result<(), VcsError> {
        require(name, "branch name")?;
        if name.chars().any(char::is_whitespace) {
            return Err(VcsError::Precondition(format!(
                "branch name contains whitespace: {name:?}"
            )));
        }
        self.run(Some(dir), &["checkout", "--quiet", "-b", name]).await?;
        Ok(())
    }

    async fn remote_url(&self, dir: &Path) -> Result<String, VcsError> {
        let url = self.run(Some(dir), &["remote", "get-url", "origin"]).await?;
        if url.is_empty() {
            return Err(VcsError::Precondition(
                "origin remote has no URL".to_string(),
            ));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn git_available() -> bool {
        Command::new("git").arg("--version").output().await.is_ok()
    }

    #[tokio::test]
    async fn empty_arguments_fail_before_spawning() {
        let git = GitCli::with_program("definitely-not-git");
        let tmp = tempfile::tempdir().unwrap();

        let err = git.clone_repo("", tmp.path()).await.unwrap_err();
        assert!(matches!(err, VcsError::Precondition(_)));
        let err = git.create_branch(tmp.path(), "has space").await.unwrap_err();
        assert!(matches!(err, VcsError::Precondition(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let git = GitCli::with_program("definitely-not-git");
        let tmp = tempfile::tempdir().unwrap();
        let err = git.remote_url(tmp.path()).await.unwrap_err();
        assert!(matches!(err, VcsError::Spawn { .. }));
    }

    #[tokio::test]
    async fn clone_branch_and_remote_against_local_repo() {
        if !git_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin.git");
        let git = GitCli::new();
        let origin_str = origin.to_string_lossy().into_owned();
        git.run(None, &["init", "--quiet", "--bare", origin_str.as_str()])
            .await
            .unwrap();

        let clone = tmp.path().join("task-1");
        git.clone_repo(&origin_str, &clone).await.unwrap();
        git.create_branch(&clone, "agent/proj-1-1").await.unwrap();

        let remote = git.remote_url(&clone).await.unwrap();
        assert!(remote.ends_with("origin.git"));
    }

    #[tokio::test]
    async fn clone_of_missing_repo_reports_stderr() {
        if !git_available().await {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let err = GitCli::new()
            .clone_repo(
                &tmp.path().join("nope.git").to_string_lossy(),
                &tmp.path().join("dest"),
            )
            .await
            .unwrap_err();
        match err {
            VcsError::CommandFailed { stderr, .. } => assert!(!stderr.is_empty()),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }
}
