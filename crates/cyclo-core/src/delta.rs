//! Pending database deltas: the core never touches SQL. It accumulates
//! typed row payloads per proxy and drains them into a `DeltaSink` the
//! caller supplies, so the persistence layer stays swappable without
//! the core ever linking against a SQL driver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task_state::TaskStatus;

/// Row shape for `task_states`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateRow {
    pub time_created: Option<DateTime<Utc>>,
    pub time_updated: DateTime<Utc>,
    pub status: TaskStatus,
    pub submit_num: Option<u32>,
    pub try_num: Option<u32>,
    pub submit_method: Option<String>,
    pub host: Option<String>,
}

/// Row shape for `task_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskJobRow {
    pub time_submit: DateTime<Utc>,
    pub is_manual_submit: bool,
    pub try_num: u32,
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

/// Row shape for `task_job_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskJobLogRow {
    pub submit_num: u32,
    pub filename: String,
    pub location: String,
    pub mtime: Option<DateTime<Utc>>,
    pub size: Option<i64>,
}

/// Row shape for `task_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventRow {
    pub time: DateTime<Utc>,
    pub event: String,
    pub message: String,
    pub misc: Option<String>,
}

/// One pending write, tagged with the task identity it belongs to so a
/// sink draining many proxies at once can attribute rows correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PendingRow {
    TaskState { task: String, row: TaskStateRow },
    TaskJob { task: String, row: TaskJobRow },
    TaskJobLog { task: String, row: TaskJobLogRow },
    TaskEvent { task: String, row: TaskEventRow },
}

/// Two mappings (insert/update) of pending rows, drained by the DB writer.
/// Kept as flat vectors rather than `table -> rows` maps internally;
/// `PendingRow` already carries its table via its variant, so grouping by
/// table is a query the sink performs, not a shape the core needs to
/// maintain.
#[derive(Debug, Clone, Default)]
pub struct PendingDeltas {
    inserts: Vec<PendingRow>,
    updates: Vec<PendingRow>,
}

impl PendingDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_insert(&mut self, row: PendingRow) {
        self.inserts.push(row);
    }

    pub fn push_update(&mut self, row: PendingRow) {
        self.updates.push(row);
    }

    pub fn inserts(&self) -> &[PendingRow] {
        &self.inserts
    }

    pub fn updates(&self) -> &[PendingRow] {
        &self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }

    /// Drain both buffers, leaving this `PendingDeltas` empty.
    pub fn drain(&mut self) -> (Vec<PendingRow>, Vec<PendingRow>) {
        (
            std::mem::take(&mut self.inserts),
            std::mem::take(&mut self.updates),
        )
    }
}

/// The runtime-database-writer contract: an external collaborator with
/// a contract only. `cyclo-db` implements this against Postgres; the
/// core never depends on `sqlx` itself.
#[async_trait]
pub trait DeltaSink: Send + Sync {
    async fn apply_inserts(&self, rows: Vec<PendingRow>) -> anyhow::Result<()>;
    async fn apply_updates(&self, rows: Vec<PendingRow>) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn push_and_drain_round_trips() {
        let mut deltas = PendingDeltas::new();
        deltas.push_insert(PendingRow::TaskState {
            task: "foo.1".into(),
            row: TaskStateRow {
                time_created: Some(now()),
                time_updated: now(),
                status: TaskStatus::Ready,
                submit_num: None,
                try_num: None,
                submit_method: None,
                host: None,
            },
        });
        assert!(!deltas.is_empty());
        let (inserts, updates) = deltas.drain();
        assert_eq!(inserts.len(), 1);
        assert!(updates.is_empty());
        assert!(deltas.is_empty());
    }
}
