//! Persistence layer: libSQL-backed task table.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Admission, NewTask, Task, TaskStatus, TaskStore};
