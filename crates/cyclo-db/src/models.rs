//! Row shapes for the four task-proxy persistence tables. These mirror
//! `cyclo_core::delta`'s pending-row payloads one-for-one, plus the
//! database-owned identity columns (`id`, `task_id`) those payloads
//! don't carry themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Current state snapshot for one task proxy, keyed by its `name.point`
/// identity string. One row per task; `cyclo_core::delta::TaskStateRow`
/// updates are applied in place (`UPDATE ... WHERE task_id = $1`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskStateModel {
    pub task_id: String,
    pub time_created: Option<DateTime<Utc>>,
    pub time_updated: DateTime<Utc>,
    pub status: String,
    pub submit_num: Option<i32>,
    pub try_num: Option<i32>,
    pub submit_method: Option<String>,
    pub host: Option<String>,
}

/// One submission attempt for one task, keyed by `(task_id, submit_num)`.
/// The submit number is assigned server-side at insert time (one greater
/// than the current maximum for the task); later updates to the same
/// attempt target the row with the highest `submit_num` for the task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskJobModel {
    pub id: Uuid,
    pub task_id: String,
    pub submit_num: i32,
    pub time_submit: DateTime<Utc>,
    pub is_manual_submit: bool,
    pub try_num: i32,
    pub user_at_host: Option<String>,
    pub batch_sys_name: Option<String>,
    pub submit_status: Option<i32>,
    pub time_submit_exit: Option<DateTime<Utc>>,
    pub batch_sys_job_id: Option<String>,
    pub run_status: Option<i32>,
    pub time_run: Option<DateTime<Utc>>,
    pub time_run_exit: Option<DateTime<Utc>>,
    pub run_signal: Option<String>,
}

/// A registered/retrieved job log file, tracked for the job-logs-retrieve
/// handler family.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskJobLogModel {
    pub id: Uuid,
    pub task_id: String,
    pub submit_num: i32,
    pub filename: String,
    pub location: String,
    pub mtime: Option<DateTime<Utc>>,
    pub size: Option<i64>,
}

/// One lifecycle event recorded for audit and handler dispatch history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskEventModel {
    pub id: i64,
    pub task_id: String,
    pub time: DateTime<Utc>,
    pub event: String,
    pub message: String,
    pub misc: Option<String>,
}
