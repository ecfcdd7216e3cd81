//! Task store behaviour under concurrent use and across reopen.

use std::sync::Arc;

use futures::future::join_all;

use issue_runner::error::DatabaseError;
use issue_runner::store::{Admission, LibSqlBackend, NewTask, TaskStatus, TaskStore};

fn draft(external_id: &str) -> NewTask {
    NewTask {
        external_id: external_id.to_string(),
        external_key: format!("PROJ-{external_id}"),
        external_status: "To Do".to_string(),
        snapshot: "{}".to_string(),
    }
}

#[tokio::test]
async fn concurrent_admissions_create_one_active_task() {
    let store: Arc<dyn TaskStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let attempts = (0..16).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.insert_if_inactive(&draft("42")).await })
    });
    let results: Vec<Admission> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let inserted = results
        .iter()
        .filter(|a| matches!(a, Admission::Inserted(_)))
        .count();
    assert_eq!(inserted, 1);
    assert_eq!(store.find_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_plain_inserts_are_rejected_by_the_index() {
    let store: Arc<dyn TaskStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let attempts = (0..8).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.insert(&draft("7")).await })
    });
    let results = join_all(attempts).await;

    let ok = results
        .iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(DatabaseError::Constraint(_)))))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(rejected, 7);
}

#[tokio::test]
async fn tasks_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("runner.db");

    let id = {
        let store = LibSqlBackend::new_local(&path).await.unwrap();
        let task = store.insert(&draft("1")).await.unwrap();
        store
            .update_status(task.id, TaskStatus::InProgress)
            .await
            .unwrap();
        task.id
    };

    let reopened = LibSqlBackend::new_local(&path).await.unwrap();
    let task = reopened.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.external_key, "PROJ-1");

    // Still active after reopen, so the item cannot be admitted again.
    assert_eq!(
        reopened.insert_if_inactive(&draft("1")).await.unwrap(),
        Admission::AlreadyActive
    );
}
