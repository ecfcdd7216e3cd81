//! libSQL backend: async `TaskStore` implementation.
//!
//! Supports local file and in-memory databases. Every write is a single SQL
//! statement so the dedup check and the status guard are atomic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Admission, NewTask, Task, TaskStatus, TaskStore};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    _db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            _db: Arc::new(db),
            conn,
        })
    }

    async fn query_tasks(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const TASK_COLUMNS: &str =
    "id, external_id, external_key, external_status, status, snapshot, created_at, updated_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row (in `TASK_COLUMNS` order) to a Task.
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let status_str: String = row.get(4).map_err(parse)?;
    let created_str: String = row.get(6).map_err(parse)?;
    let updated_str: String = row.get(7).map_err(parse)?;

    Ok(Task {
        id: row.get(0).map_err(parse)?,
        external_id: row.get(1).map_err(parse)?,
        external_key: row.get(2).map_err(parse)?,
        external_status: row.get(3).map_err(parse)?,
        status: status_str
            .parse()
            .map_err(DatabaseError::Serialization)?,
        snapshot: row.get(5).map_err(parse)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn map_write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    async fn find_active(&self, external_id: &str) -> Result<Option<Task>, DatabaseError> {
        let mut tasks = self
            .query_tasks(
                "find_active",
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE external_id = ?1 AND status IN ('WAITING_TO_WORK', 'IN_PROGRESS')
                     ORDER BY id DESC LIMIT 1"
                ),
                params![external_id],
            )
            .await?;
        Ok(tasks.pop())
    }

    async fn insert(&self, draft: &NewTask) -> Result<Task, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO tasks (external_id, external_key, external_status, status,
                        snapshot, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 'WAITING_TO_WORK', ?4, ?5, ?5)
                     RETURNING {TASK_COLUMNS}"
                ),
                params![
                    draft.external_id.as_str(),
                    draft.external_key.as_str(),
                    draft.external_status.as_str(),
                    draft.snapshot.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| map_write_error("insert", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| map_write_error("insert", e))?
            .ok_or_else(|| DatabaseError::Query("insert: no row returned".to_string()))?;
        let task = row_to_task(&row)?;

        debug!(task_id = task.id, key = %task.external_key, "Task inserted");
        Ok(task)
    }

    async fn insert_if_inactive(&self, draft: &NewTask) -> Result<Admission, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "INSERT INTO tasks (external_id, external_key, external_status, status,
                        snapshot, created_at, updated_at)
                     SELECT ?1, ?2, ?3, 'WAITING_TO_WORK', ?4, ?5, ?5
                     WHERE NOT EXISTS (
                        SELECT 1 FROM tasks
                        WHERE external_id = ?1
                          AND status IN ('WAITING_TO_WORK', 'IN_PROGRESS')
                     )
                     RETURNING {TASK_COLUMNS}"
                ),
                params![
                    draft.external_id.as_str(),
                    draft.external_key.as_str(),
                    draft.external_status.as_str(),
                    draft.snapshot.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| map_write_error("insert_if_inactive", e))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)?;
                debug!(task_id = task.id, key = %task.external_key, "Task admitted");
                Ok(Admission::Inserted(task))
            }
            Ok(None) => Ok(Admission::AlreadyActive),
            Err(e) => Err(map_write_error("insert_if_inactive", e)),
        }
    }

    async fn update_status(&self, id: i64, status: TaskStatus) -> Result<(), DatabaseError> {
        let current = self.find_by_id(id).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "task".to_string(),
            id: id.to_string(),
        })?;

        let Some(expected) = status.predecessor() else {
            return Err(DatabaseError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        };

        // The guard on the previous status keeps the write atomic even if
        // another reader observed a stale row.
        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![status.as_str(), Utc::now().to_rfc3339(), id, expected.as_str()],
            )
            .await
            .map_err(|e| map_write_error("update_status", e))?;

        if changed == 0 {
            let from = self
                .find_by_id(id)
                .await?
                .map(|t| t.status)
                .unwrap_or(current.status);
            return Err(DatabaseError::InvalidTransition {
                id,
                from,
                to: status,
            });
        }

        debug!(task_id = id, status = %status, "Task status updated");
        Ok(())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        let mut tasks = self
            .query_tasks(
                "find_by_id",
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
            )
            .await?;
        Ok(tasks.pop())
    }

    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            "find_by_status",
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY id ASC"),
            params![status.as_str()],
        )
        .await
    }

    async fn find_all(&self) -> Result<Vec<Task>, DatabaseError> {
        self.query_tasks(
            "find_all",
            &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id ASC"),
            (),
        )
        .await
    }
}
