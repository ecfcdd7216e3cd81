//! Startup recovery.
//!
//! No saga survives a restart. Tasks a previous process left `IN_PROGRESS`
//! are failed and their working directories removed; tasks still
//! `WAITING_TO_WORK` go back on the queue because the queue lived in memory.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Error;
use crate::queue::WorkQueue;
use crate::store::{TaskStatus, TaskStore};
use crate::workspace::Workspaces;

/// What recovery did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed: usize,
    pub requeued: usize,
}

/// Run before the poller starts.
pub async fn recover_tasks(
    store: &Arc<dyn TaskStore>,
    workspaces: &Workspaces,
    queue: &WorkQueue,
) -> Result<RecoveryReport, Error> {
    let mut report = RecoveryReport::default();

    for task in store.find_by_status(TaskStatus::InProgress).await? {
        if let Err(e) = workspaces.remove(&workspaces.task_dir(task.id)).await {
            warn!(task_id = task.id, error = %e, "Could not remove orphaned working directory");
        }
        store.update_status(task.id, TaskStatus::Failed).await?;
        warn!(task_id = task.id, key = %task.external_key, "Failed task orphaned by previous run");
        report.failed += 1;
    }

    for task in store.find_by_status(TaskStatus::WaitingToWork).await? {
        info!(task_id = task.id, key = %task.external_key, "Re-enqueuing waiting task");
        queue.enqueue(task).await?;
        report.requeued += 1;
    }

    if report != RecoveryReport::default() {
        info!(
            failed = report.failed,
            requeued = report.requeued,
            "Startup recovery complete"
        );
    }
    Ok(report)
}
