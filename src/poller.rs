//! Tracker poller: discovers assigned issues, admits new tasks and hands them
//! to the work queue.
//!
//! A cycle fails as a whole on the first tracker or store error. The spawned
//! loop logs the failure and waits for the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{DatabaseError, Error};
use crate::queue::WorkQueue;
use crate::store::{Admission, NewTask, TaskStore};
use crate::tracker::{Issue, IssueTracker};

/// Counts for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
}

pub struct Poller {
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn TaskStore>,
    queue: WorkQueue,
}

impl Poller {
    pub fn new(tracker: Arc<dyn IssueTracker>, store: Arc<dyn TaskStore>, queue: WorkQueue) -> Self {
        Self {
            tracker,
            store,
            queue,
        }
    }

    /// Run a single cycle: fetch, dedup, insert, enqueue.
    pub async fn poll_once(&self) -> Result<PollReport, Error> {
        let issues = self.tracker.search_assigned_issues().await?;
        let mut report = PollReport {
            fetched: issues.len(),
            ..Default::default()
        };

        for issue in &issues {
            if let Some(active) = self.store.find_active(&issue.id).await? {
                debug!(
                    key = %issue.key,
                    task_id = active.id,
                    status = %active.status,
                    "Issue already has an active task, skipping"
                );
                report.skipped += 1;
                continue;
            }

            match self.store.insert_if_inactive(&new_task(issue)?).await? {
                Admission::Inserted(task) => {
                    info!(task_id = task.id, key = %task.external_key, "New task admitted");
                    report.inserted += 1;
                    self.queue.enqueue(task).await?;
                }
                Admission::AlreadyActive => {
                    debug!(key = %issue.key, "Lost insert race, task already active");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }
}

fn new_task(issue: &Issue) -> Result<NewTask, DatabaseError> {
    let snapshot = issue
        .to_snapshot()
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    Ok(NewTask {
        external_id: issue.id.clone(),
        external_key: issue.key.clone(),
        external_status: issue.status_name().to_string(),
        snapshot,
    })
}

/// Spawn the polling loop. The first cycle runs immediately.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling;
/// the loop exits at the next tick and drops its queue handle.
pub fn spawn_poller(poller: Poller, interval: Duration) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval = ?interval, "Poller started");

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poller shutting down");
                return;
            }

            match poller.poll_once().await {
                Ok(report) => info!(
                    fetched = report.fetched,
                    inserted = report.inserted,
                    skipped = report.skipped,
                    "Poll cycle complete"
                ),
                Err(e) => error!(error = %e, kind = ?e.kind(), "Poll cycle failed"),
            }
        }
    });

    (handle, shutdown_flag)
}
