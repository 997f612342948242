//! Postgres implementation of `cyclo_core::delta::DeltaSink`. The core
//! never links against `sqlx` itself; this is the one place that does --
//! the core defines the trait and this crate implements it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use cyclo_core::delta::{DeltaSink, PendingRow};
use sqlx::PgPool;
use uuid::Uuid;

/// Drains `PendingRow` batches into the four task-proxy tables.
#[derive(Debug, Clone)]
pub struct PgDeltaSink {
    pool: PgPool,
}

impl PgDeltaSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeltaSink for PgDeltaSink {
    async fn apply_inserts(&self, rows: Vec<PendingRow>) -> Result<()> {
        for row in rows {
            match row {
                PendingRow::TaskState { task, row } => {
                    sqlx::query(
                        "INSERT INTO task_states \
                         (task_id, time_created, time_updated, status, submit_num, try_num, submit_method, host) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                         ON CONFLICT (task_id) DO UPDATE SET \
                         time_updated = EXCLUDED.time_updated, status = EXCLUDED.status, \
                         submit_num = EXCLUDED.submit_num, try_num = EXCLUDED.try_num, \
                         submit_method = EXCLUDED.submit_method, host = EXCLUDED.host",
                    )
                    .bind(&task)
                    .bind(row.time_created)
                    .bind(row.time_updated)
                    .bind(row.status.to_string())
                    .bind(row.submit_num.map(|n| n as i32))
                    .bind(row.try_num.map(|n| n as i32))
                    .bind(&row.submit_method)
                    .bind(&row.host)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("inserting task_states row for {task}"))?;
                }
                PendingRow::TaskJob { task, row } => {
                    sqlx::query(
                        "INSERT INTO task_jobs \
                         (id, task_id, submit_num, time_submit, is_manual_submit, try_num, \
                          user_at_host, batch_sys_name, submit_status, time_submit_exit, \
                          batch_sys_job_id, run_status, time_run, time_run_exit, run_signal) \
                         VALUES ($1, $2, COALESCE((SELECT MAX(submit_num) FROM task_jobs WHERE task_id = $2), 0) + 1, \
                         $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                    )
                    .bind(Uuid::new_v4())
                    .bind(&task)
                    .bind(row.time_submit)
                    .bind(row.is_manual_submit)
                    .bind(row.try_num as i32)
                    .bind(&row.user_at_host)
                    .bind(&row.batch_sys_name)
                    .bind(row.submit_status)
                    .bind(row.time_submit_exit)
                    .bind(&row.batch_sys_job_id)
                    .bind(row.run_status)
                    .bind(row.time_run)
                    .bind(row.time_run_exit)
                    .bind(&row.run_signal)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("inserting task_jobs row for {task}"))?;
                }
                PendingRow::TaskJobLog { task, row } => {
                    sqlx::query(
                        "INSERT INTO task_job_logs (id, task_id, submit_num, filename, location, mtime, size) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    )
                    .bind(Uuid::new_v4())
                    .bind(&task)
                    .bind(row.submit_num as i32)
                    .bind(&row.filename)
                    .bind(&row.location)
                    .bind(row.mtime)
                    .bind(row.size)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("inserting task_job_logs row for {task}"))?;
                }
                PendingRow::TaskEvent { task, row } => {
                    sqlx::query(
                        "INSERT INTO task_events (task_id, time, event, message, misc) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(&task)
                    .bind(row.time)
                    .bind(&row.event)
                    .bind(&row.message)
                    .bind(&row.misc)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("inserting task_events row for {task}"))?;
                }
            }
        }
        Ok(())
    }

    async fn apply_updates(&self, rows: Vec<PendingRow>) -> Result<()> {
        for row in rows {
            match row {
                PendingRow::TaskState { task, row } => {
                    sqlx::query(
                        "UPDATE task_states SET time_updated = $2, status = $3, submit_num = $4, \
                         try_num = $5, submit_method = $6, host = $7 WHERE task_id = $1",
                    )
                    .bind(&task)
                    .bind(row.time_updated)
                    .bind(row.status.to_string())
                    .bind(row.submit_num.map(|n| n as i32))
                    .bind(row.try_num.map(|n| n as i32))
                    .bind(&row.submit_method)
                    .bind(&row.host)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("updating task_states row for {task}"))?;
                }
                PendingRow::TaskJob { task, row } => {
                    sqlx::query(
                        "UPDATE task_jobs SET is_manual_submit = $2, try_num = $3, user_at_host = $4, \
                         batch_sys_name = $5, submit_status = $6, time_submit_exit = $7, \
                         batch_sys_job_id = $8, run_status = $9, time_run = $10, time_run_exit = $11, \
                         run_signal = $12 \
                         WHERE task_id = $1 AND submit_num = (SELECT MAX(submit_num) FROM task_jobs WHERE task_id = $1)",
                    )
                    .bind(&task)
                    .bind(row.is_manual_submit)
                    .bind(row.try_num as i32)
                    .bind(&row.user_at_host)
                    .bind(&row.batch_sys_name)
                    .bind(row.submit_status)
                    .bind(row.time_submit_exit)
                    .bind(&row.batch_sys_job_id)
                    .bind(row.run_status)
                    .bind(row.time_run)
                    .bind(row.time_run_exit)
                    .bind(&row.run_signal)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("updating task_jobs row for {task}"))?;
                }
                PendingRow::TaskJobLog { task, row } => {
                    sqlx::query(
                        "UPDATE task_job_logs SET mtime = $3, size = $4 \
                         WHERE task_id = $1 AND submit_num = $2 AND filename = $5",
                    )
                    .bind(&task)
                    .bind(row.submit_num as i32)
                    .bind(row.mtime)
                    .bind(row.size)
                    .bind(&row.filename)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("updating task_job_logs row for {task}"))?;
                }
                PendingRow::TaskEvent { task, row } => {
                    // Events are append-only; an "update" payload for an
                    // event is recorded as a fresh row rather than mutating
                    // history, matching its role as an audit trail.
                    sqlx::query(
                        "INSERT INTO task_events (task_id, time, event, message, misc) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(&task)
                    .bind(row.time)
                    .bind(&row.event)
                    .bind(&row.message)
                    .bind(&row.misc)
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("appending task_events row for {task}"))?;
                }
            }
        }
        Ok(())
    }
}
