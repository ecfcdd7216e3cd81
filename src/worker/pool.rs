//! Fixed-size pool of workers draining the work queue.
//!
//! Each worker takes one task at a time and runs its saga to completion
//! before taking the next, so at most `concurrency` sagas are in flight.

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::queue::WorkReceiver;
use crate::worker::saga::TaskSaga;

/// Handles of the spawned workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` workers sharing `receiver`. A concurrency of
    /// zero is raised to one so queued work is never stranded.
    pub fn spawn(concurrency: usize, receiver: WorkReceiver, saga: Arc<TaskSaga>) -> Self {
        let workers = if concurrency == 0 {
            warn!("Worker concurrency of 0 requested, starting 1 worker");
            1
        } else {
            concurrency
        };
        let handles = (1..=workers)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let saga = Arc::clone(&saga);
                tokio::spawn(worker_loop(worker_id, receiver, saga))
            })
            .collect();
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Workers exit once the queue is closed
    /// and drained.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    /// Stop workers without waiting for in-flight sagas.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn worker_loop(worker_id: usize, receiver: WorkReceiver, saga: Arc<TaskSaga>) {
    info!(worker_id, "Worker started");

    while let Some(task) = receiver.dequeue().await {
        let task_id = task.id;
        let key = task.external_key.clone();
        info!(worker_id, task_id, key = %key, "Worker picked up task");

        // Run in its own task so a panic inside the saga does not take the
        // worker down with it.
        let run = {
            let saga = Arc::clone(&saga);
            tokio::spawn(async move { saga.run(task).await })
        };

        match run.await {
            Ok(Ok(report)) => info!(
                worker_id,
                task_id,
                key = %key,
                branch = %report.branch,
                "Task done"
            ),
            Ok(Err(e)) => warn!(
                worker_id,
                task_id,
                key = %key,
                step = %e.step,
                kind = ?e.source.kind(),
                error = %e,
                "Task failed"
            ),
            Err(join_err) => {
                error!(worker_id, task_id, key = %key, error = %join_err, "Saga aborted");
                saga.abandon(task_id).await;
            }
        }
    }

    info!(worker_id, "Work queue closed, worker stopping");
}
