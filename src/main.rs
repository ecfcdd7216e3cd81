use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use issue_runner::agent::{AgentClient, OpenCodeClient};
use issue_runner::cli::{Cli, Command, ListArgs, StartArgs, TASK_TABLE_HEADER, task_row};
use issue_runner::logging;
use issue_runner::poller::{Poller, spawn_poller};
use issue_runner::queue::work_queue;
use issue_runner::recovery::recover_tasks;
use issue_runner::store::{LibSqlBackend, TaskStore};
use issue_runner::tracker::{IssueTracker, JiraClient};
use issue_runner::vcs::{GitCli, SourceControl};
use issue_runner::worker::{SagaDeps, SagaSettings, TaskSaga, WorkerPool};
use issue_runner::workspace::Workspaces;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loaded before parsing so `.env` values act as flag fallbacks.
    let _ = dotenvy::dotenv();

    let Cli {
        db_path,
        log_level,
        log_file,
        command,
    } = Cli::parse();

    let _log_guard = logging::init(log_level.as_deref(), log_file.as_deref());

    match command {
        Command::Start(args) => start(&db_path, args).await,
        Command::List(args) => list(&db_path, args).await,
    }
}

async fn start(db_path: &Path, args: StartArgs) -> anyhow::Result<()> {
    let tracker_config = args.tracker_config();
    let agent_config = args.agent_config();
    let runner = args.runner_config();
    runner.validate()?;

    eprintln!("🛠  Issue Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Jira: {} (status \"{}\")", tracker_config.base_url, tracker_config.status_filter);
    eprintln!("   Repository: {} -> {}", runner.repository_url, runner.base_branch);
    eprintln!("   Agent: {}", agent_config.base_url);
    eprintln!(
        "   Workers: {}, poll every {}s",
        runner.concurrency,
        runner.poll_interval.as_secs()
    );
    eprintln!("   Workspaces: {}", runner.workspace_root.display());
    eprintln!("   Database: {}\n", db_path.display());

    // ── Collaborators ───────────────────────────────────────────────────
    let store: Arc<dyn TaskStore> = Arc::new(
        LibSqlBackend::new_local(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );
    let tracker: Arc<dyn IssueTracker> =
        Arc::new(JiraClient::new(&tracker_config).context("Invalid Jira settings")?);
    let agent: Arc<dyn AgentClient> =
        Arc::new(OpenCodeClient::new(&agent_config).context("Invalid agent settings")?);
    let vcs: Arc<dyn SourceControl> = Arc::new(GitCli::new());
    let workspaces = Workspaces::new(runner.workspace_root.clone());

    // ── Workers ─────────────────────────────────────────────────────────
    let saga = Arc::new(TaskSaga::new(
        SagaDeps {
            store: Arc::clone(&store),
            tracker: Arc::clone(&tracker),
            vcs,
            agent,
            workspaces: workspaces.clone(),
        },
        SagaSettings::from_config(&runner, &agent_config),
    ));
    let (queue, receiver) = work_queue(runner.queue_capacity);
    let pool = WorkerPool::spawn(runner.concurrency, receiver, saga);

    // ── Startup Recovery ────────────────────────────────────────────────
    // Workers are already draining, so re-enqueuing cannot stall on a full queue.
    let recovered = recover_tasks(&store, &workspaces, &queue)
        .await
        .context("Startup recovery failed")?;
    if recovered.failed + recovered.requeued > 0 {
        eprintln!(
            "   Recovered: {} failed, {} re-queued",
            recovered.failed, recovered.requeued
        );
    }

    // ── Poller ──────────────────────────────────────────────────────────
    let poller = Poller::new(tracker, Arc::clone(&store), queue);
    let (poller_handle, shutdown) = spawn_poller(poller, runner.poll_interval);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutdown requested");
    shutdown.store(true, Ordering::Relaxed);
    poller_handle.abort();
    // Interrupted sagas are failed by the next start's recovery.
    pool.abort();
    Ok(())
}

async fn list(db_path: &Path, args: ListArgs) -> anyhow::Result<()> {
    let store = LibSqlBackend::new_local(db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let mut tasks = match args.status {
        Some(status) => store.find_by_status(status).await?,
        None => store.find_all().await?,
    };
    tasks.reverse();
    if let Some(limit) = args.limit {
        tasks.truncate(limit);
    }

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!("{TASK_TABLE_HEADER}");
    for task in &tasks {
        println!("{}", task_row(task));
    }
    Ok(())
}
