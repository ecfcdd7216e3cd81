//! Per-task working directories.
//!
//! Every task gets `<root>/task-<id>`. The path is a pure function of the task
//! id, so re-running a task after a restart lands in the same directory and
//! two tasks never share one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::WorkspaceError;

/// Owner of the directory tree under which task checkouts live.
#[derive(Debug, Clone)]
pub struct Workspaces {
    root: PathBuf,
}

impl Workspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory for `task_id`.
    pub fn task_dir(&self, task_id: i64) -> PathBuf {
        self.root.join(format!("task-{task_id}"))
    }

    /// Make sure the root exists and `dir` does not, ready for a fresh clone.
    pub async fn reset(&self, dir: &Path) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| io_error("create", &self.root, source))?;
        self.remove(dir).await
    }

    /// Delete `dir` and everything below it. Missing directories are fine.
    pub async fn remove(&self, dir: &Path) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "Removed working directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error("remove", dir, source)),
        }
    }
}

fn io_error(action: &'static str, path: &Path, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        action,
        path: path.display().to_string(),
        source,
    }
}
