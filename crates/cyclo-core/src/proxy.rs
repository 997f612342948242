//! The task proxy core: the per-task state-machine driver.
//!
//! Binds the retry ledger, task status, message ingress, and event
//! handler registry together, and receives callbacks from the
//! (out-of-scope) process pool. Every mutating entry point takes the
//! caller's [`EventFlags`] so the control loop learns when the state
//! summary goes stale or a replan is due, without the proxy holding a
//! back-reference to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch_system::{self, PollOutcome};
use crate::delta::{PendingDeltas, PendingRow, TaskEventRow, TaskJobRow, TaskStateRow};
use crate::event_handler::{EventHandlerRegistry, HandlerFamily, HandlerKey, TemplateFields, expand_template};
use crate::identity::TaskId;
use crate::message::{self, IncomingMessage, MessageKind, MessagePriority};
use crate::outputs::{Prerequisite, TaskOutputs, all_satisfied};
use crate::pool::EventFlags;
use crate::task_def::TaskDefinition;
use crate::task_state::{TaskStateMachine, TaskStatus};
use crate::try_state::TryState;

/// The flat mapping consumed by clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSummary {
    pub latest_message: String,
    pub submitted_time: Option<DateTime<Utc>>,
    pub started_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    pub submit_method_id: Option<String>,
    pub submit_num: u32,
    pub logfiles: Vec<String>,
    pub job_hosts: HashMap<u32, String>,
}

/// The live task instance.
#[derive(Debug)]
pub struct TaskProxy {
    task_def: Arc<TaskDefinition>,
    point: crate::cycle_point::CyclePoint,
    stop_point: Option<crate::cycle_point::CyclePoint>,
    has_spawned: bool,
    submit_number: u32,
    run_try: TryState,
    sub_try: TryState,
    status: TaskStatus,
    host: Option<String>,
    owner: Option<String>,
    user_at_host: Option<String>,
    submit_method_id: Option<String>,
    job_vacated: bool,
    submitted_time: Option<DateTime<Utc>>,
    started_time: Option<DateTime<Utc>>,
    finished_time: Option<DateTime<Utc>>,
    point_as_seconds: Option<i64>,
    delayed_start: Option<DateTime<Utc>>,
    expire_time: Option<DateTime<Utc>>,
    submission_timeout: Option<DateTime<Utc>>,
    execution_timeout: Option<DateTime<Utc>>,
    is_manual_submit: bool,
    kill_failed: bool,
    hold_on_retry: bool,
    enable_resurrection: bool,
    rtconfig_applied: bool,
    summary: TaskSummary,
    outputs: TaskOutputs,
    prerequisites: Vec<Prerequisite>,
    handlers: EventHandlerRegistry,
    deltas: PendingDeltas,
}

impl TaskProxy {
    /// Construct a proxy. A cycle point outside every one of the task
    /// definition's sequences is a hard error at construction time; the
    /// scheduler pool must not insert a proxy this returns `Err` for.
    pub fn new(
        task_def: Arc<TaskDefinition>,
        point: crate::cycle_point::CyclePoint,
        stop_point: Option<crate::cycle_point::CyclePoint>,
    ) -> crate::error::CoreResult<Self> {
        if !task_def.accepts(&point) {
            return Err(crate::error::CoreError::BoundsViolation {
                name: task_def.name.clone(),
                point: point.to_string(),
            });
        }
        let outputs = TaskOutputs::new(&[]);
        Ok(Self {
            task_def,
            point,
            stop_point,
            has_spawned: false,
            submit_number: 0,
            run_try: TryState::new(vec![]),
            sub_try: TryState::new(vec![]),
            status: TaskStatus::Waiting,
            host: None,
            owner: None,
            user_at_host: None,
            submit_method_id: None,
            job_vacated: false,
            submitted_time: None,
            started_time: None,
            finished_time: None,
            point_as_seconds: None,
            delayed_start: None,
            expire_time: None,
            submission_timeout: None,
            execution_timeout: None,
            is_manual_submit: false,
            kill_failed: false,
            hold_on_retry: false,
            enable_resurrection: false,
            rtconfig_applied: false,
            summary: TaskSummary::default(),
            outputs,
            prerequisites: Vec::new(),
            handlers: EventHandlerRegistry::new(),
            deltas: PendingDeltas::new(),
        })
    }

    pub fn id(&self) -> TaskId {
        TaskId::new(self.task_def.name.clone(), self.point)
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn submit_number(&self) -> u32 {
        self.submit_number
    }

    pub fn has_spawned(&self) -> bool {
        self.has_spawned
    }

    pub fn summary(&self) -> &TaskSummary {
        &self.summary
    }

    pub fn outputs(&self) -> &TaskOutputs {
        &self.outputs
    }

    pub fn prerequisites(&self) -> &[Prerequisite] {
        &self.prerequisites
    }

    pub fn set_prerequisites(&mut self, prereqs: Vec<Prerequisite>) {
        self.prerequisites = prereqs;
    }

    pub fn job_vacated(&self) -> bool {
        self.job_vacated
    }

    pub fn kill_failed(&self) -> bool {
        self.kill_failed
    }

    pub fn handlers(&self) -> &EventHandlerRegistry {
        &self.handlers
    }

    pub fn handlers_mut(&mut self) -> &mut EventHandlerRegistry {
        &mut self.handlers
    }

    /// Apply retry-delay lists from runtime config once per proxy life.
    /// A malformed delay list is a configuration error, surfaced eagerly.
    pub fn set_from_rtconfig(&mut self) -> crate::error::CoreResult<()> {
        if self.rtconfig_applied {
            return Ok(());
        }
        self.run_try = TryState::new(self.task_def.runtime.retry_delays.clone());
        self.sub_try = TryState::new(self.task_def.runtime.submission_retry_delays.clone());
        self.rtconfig_applied = true;
        Ok(())
    }

    // -- Clock trigger / expiration --

    fn point_as_seconds(&mut self) -> i64 {
        if self.point_as_seconds.is_none() {
            self.point_as_seconds = Some(self.point.as_seconds());
        }
        self.point_as_seconds.unwrap()
    }

    /// Has this task reached its clock-trigger time?
    pub fn start_time_reached(&mut self, now: DateTime<Utc>) -> bool {
        let Some(offset) = self.task_def.clock_trigger_offset else {
            return true;
        };
        if self.delayed_start.is_none() {
            let base = self.point_as_seconds();
            let shifted = crate::cycle_point::CyclePoint::Integer(base).add_offset(offset);
            self.delayed_start = DateTime::from_timestamp(shifted.as_seconds(), 0);
        }
        matches!(self.delayed_start, Some(t) if now > t)
    }

    /// Is this task past its use-by date?
    pub fn has_expired(&mut self, now: DateTime<Utc>) -> bool {
        let Some(offset) = self.task_def.expiration_offset else {
            return false;
        };
        if self.expire_time.is_none() {
            let base = self.point_as_seconds();
            let shifted = crate::cycle_point::CyclePoint::Integer(base).add_offset(offset);
            self.expire_time = DateTime::from_timestamp(shifted.as_seconds(), 0);
        }
        matches!(self.expire_time, Some(t) if now > t)
    }

    fn retry_delay_done(&self, now: DateTime<Utc>) -> bool {
        self.run_try.is_delay_done(now) || self.sub_try.is_delay_done(now)
    }

    /// Expiration preempts submission, and gates the
    /// `waiting -> queued -> ready` / `submit-retry -> ready` /
    /// `retry -> ready` edges.
    pub fn ready_to_run(&mut self, now: DateTime<Utc>, flags: &EventFlags) -> bool {
        let gate = match self.status {
            TaskStatus::Waiting | TaskStatus::Queued => {
                all_satisfied(&self.prerequisites) && self.start_time_reached(now)
            }
            TaskStatus::SubmitRetry | TaskStatus::Retry => self.retry_delay_done(now),
            // Already ready (e.g. a manual trigger forced this status
            // directly): nothing left to gate on.
            TaskStatus::Ready => true,
            _ => false,
        };
        if !gate {
            return false;
        }
        if self.has_expired(now) {
            warn!(task = %self.id(), "task expired, skipping job");
            self.transition(TaskStatus::Expired, now);
            self.setup_event_handlers("expired", "Task expired (skipping job).", now);
            flags.signal_summary_invalid();
            return false;
        }
        match self.status {
            TaskStatus::Waiting => {
                self.transition(TaskStatus::Queued, now);
                self.transition(TaskStatus::Ready, now);
            }
            TaskStatus::Queued | TaskStatus::SubmitRetry | TaskStatus::Retry => {
                self.transition(TaskStatus::Ready, now);
            }
            TaskStatus::Ready => {}
            _ => unreachable!("gate already filtered to the above statuses"),
        }
        true
    }

    /// Spawning occurs once, guarded by `has-spawned`. Coldstart tasks
    /// are marked spawned the first time this predicate is *checked*
    /// rather than at construction, since a coldstart task's flag isn't
    /// known to be stable until then.
    pub fn ready_to_spawn(&mut self) -> bool {
        if self.task_def.is_coldstart && !self.has_spawned {
            self.has_spawned = true;
            return false;
        }
        !self.has_spawned && self.status.is_past_submit() && self.status != TaskStatus::SubmitFailed
    }

    /// Create the successor's cycle point: the next point of the minimum
    /// of all sequences, or `None` if none yields one.
    pub fn spawn(&mut self) -> Option<crate::cycle_point::CyclePoint> {
        self.has_spawned = true;
        crate::cycle_point::min_next_point(&self.task_def.sequences, &self.point)
    }

    // -- Submission prep --

    /// Increments the submit number, refreshes the job-log
    /// directory/symlink, and records a `task_jobs` insert: one row per
    /// submit-number advance.
    pub fn prep_submit(
        &mut self,
        now: DateTime<Utc>,
        job_log_root: &std::path::Path,
    ) -> std::io::Result<std::path::PathBuf> {
        let id = self.id();
        let previous = self.submit_number;
        self.submit_number += 1;
        if previous > 0 {
            crate::submission::remove_job_log_dir(job_log_root, &id, previous)?;
        }
        let dir = crate::submission::prepare_job_log_dir(job_log_root, &id, self.submit_number)?;

        self.deltas.push_insert(PendingRow::TaskJob {
            task: id.to_string(),
            row: TaskJobRow {
                time_submit: now,
                is_manual_submit: self.is_manual_submit,
                try_num: self.run_try.index() as u32 + 1,
                user_at_host: self.user_at_host.clone(),
                batch_sys_name: Some(self.task_def.runtime.batch_system_name.clone()),
                submit_status: None,
                time_submit_exit: None,
                batch_sys_job_id: None,
                run_status: None,
                time_run: None,
                time_run_exit: None,
                run_signal: None,
            },
        });
        self.summary.submit_num = self.submit_number;
        Ok(dir)
    }

    /// Mark a submission attempt in flight; the caller enqueues the
    /// actual submit command with the pool and later delivers the result
    /// through [`Self::job_submission_callback`].
    pub fn begin_submit(&mut self) {
        self.sub_try.set_waiting();
    }

    // -- Process-pool callbacks --

    /// Never raises: a parse failure is logged and treated as a null
    /// outcome.
    pub fn job_submission_callback(&mut self, line: &str, now: DateTime<Utc>, flags: &EventFlags) {
        self.sub_try.unset_waiting();
        let parsed = match batch_system::parse_submit_line(line) {
            Ok(p) => p,
            Err(raw) => {
                warn!(task = %self.id(), line = %raw, "malformed submit callback line");
                return;
            }
        };
        self.submit_method_id = parsed.submit_method_id.clone();
        if parsed.ret_code == 0 && self.submit_method_id.is_some() {
            self.job_submission_succeeded(now, flags);
        } else {
            self.job_submission_failed(now, flags);
        }
    }

    fn job_submission_succeeded(&mut self, now: DateTime<Utc>, flags: &EventFlags) {
        let id = self.id().to_string();
        self.submitted_time = Some(now);
        self.started_time = None;
        self.finished_time = None;
        self.summary.submitted_time = Some(now);
        self.summary.submit_method_id = self.submit_method_id.clone();
        self.summary.latest_message = "submitted".to_string();
        self.transition(TaskStatus::Submitted, now);

        self.deltas.push_update(PendingRow::TaskJob {
            task: id,
            row: TaskJobRow {
                time_submit: now,
                is_manual_submit: self.is_manual_submit,
                try_num: self.run_try.index() as u32 + 1,
                user_at_host: self.user_at_host.clone(),
                batch_sys_name: Some(self.task_def.runtime.batch_system_name.clone()),
                submit_status: Some(0),
                time_submit_exit: Some(now),
                batch_sys_job_id: self.submit_method_id.clone(),
                run_status: None,
                time_run: None,
                time_run_exit: None,
                run_signal: None,
            },
        });

        if let Some(timeout) = self.task_def.runtime.submission_timeout {
            self.submission_timeout = Some(now + timeout);
        }
        self.setup_event_handlers("submitted", "job submitted", now);
        flags.signal_summary_invalid();
    }

    fn job_submission_failed(&mut self, now: DateTime<Utc>, flags: &EventFlags) {
        let id = self.id().to_string();
        self.submit_method_id = None;
        self.deltas.push_update(PendingRow::TaskJob {
            task: id,
            row: TaskJobRow {
                time_submit: now,
                is_manual_submit: self.is_manual_submit,
                try_num: self.run_try.index() as u32 + 1,
                user_at_host: self.user_at_host.clone(),
                batch_sys_name: Some(self.task_def.runtime.batch_system_name.clone()),
                submit_status: Some(1),
                time_submit_exit: Some(now),
                batch_sys_job_id: None,
                run_status: None,
                time_run: None,
                time_run_exit: None,
                run_signal: None,
            },
        });
        match self.sub_try.next(now) {
            None => {
                flags.signal_replan();
                self.transition(TaskStatus::SubmitFailed, now);
                self.setup_event_handlers("submission failed", "job submission failed", now);
            }
            Some(_) => {
                self.transition(TaskStatus::SubmitRetry, now);
                self.setup_event_handlers("submission retry", "job submission failed, retrying", now);
            }
        }
        flags.signal_summary_invalid();
    }

    fn job_execution_failed(&mut self, now: DateTime<Utc>, flags: &EventFlags) {
        let id = self.id().to_string();
        self.finished_time = Some(now);
        self.summary.finished_time = Some(now);
        self.execution_timeout = None;
        self.deltas.push_update(PendingRow::TaskJob {
            task: id,
            row: TaskJobRow {
                time_submit: self.submitted_time.unwrap_or(now),
                is_manual_submit: self.is_manual_submit,
                try_num: self.run_try.index() as u32 + 1,
                user_at_host: self.user_at_host.clone(),
                batch_sys_name: Some(self.task_def.runtime.batch_system_name.clone()),
                submit_status: None,
                time_submit_exit: None,
                batch_sys_job_id: self.submit_method_id.clone(),
                run_status: Some(1),
                time_run: self.started_time,
                time_run_exit: Some(now),
                run_signal: None,
            },
        });
        match self.run_try.next(now) {
            None => {
                flags.signal_replan();
                self.transition(TaskStatus::Failed, now);
                self.setup_event_handlers("failed", "job failed", now);
            }
            Some(_) => {
                self.transition(TaskStatus::Retry, now);
                self.setup_event_handlers("retry", "job failed, retrying", now);
            }
        }
        flags.signal_summary_invalid();
    }

    pub fn job_poll_callback(&mut self, line: &str, now: DateTime<Utc>, flags: &EventFlags) {
        let outcome = match batch_system::parse_poll_line(line) {
            Ok(o) => o,
            Err(raw) => {
                self.summary.latest_message = "poll failed".to_string();
                flags.signal_summary_invalid();
                warn!(task = %self.id(), line = %raw, "malformed poll callback line");
                return;
            }
        };
        match outcome {
            PollOutcome::FailedNormally | PollOutcome::TerminatedWithoutTrap => {
                self.on_message(IncomingMessage::new(MessagePriority::Info, "failed", true), now, flags)
            }
            PollOutcome::FailedBySignal(signal) => {
                self.on_message(IncomingMessage::new(MessagePriority::Info, "failed", true), now, flags);
                self.on_message(
                    IncomingMessage::new(
                        MessagePriority::Info,
                        format!("{}{}", message::FAIL_MESSAGE_PREFIX, signal),
                        true,
                    ),
                    now,
                    flags,
                );
            }
            PollOutcome::TerminatedButManaged | PollOutcome::Started => {
                self.on_message(IncomingMessage::new(MessagePriority::Info, "started", true), now, flags)
            }
            PollOutcome::Succeeded => {
                self.on_message(IncomingMessage::new(MessagePriority::Info, "succeeded", true), now, flags)
            }
            PollOutcome::SubmissionFailed => self.on_message(
                IncomingMessage::new(MessagePriority::Info, "submission failed", true),
                now,
                flags,
            ),
            PollOutcome::StillSubmitted => self.on_message(
                IncomingMessage::new(MessagePriority::Info, "submitted", true),
                now,
                flags,
            ),
        }
    }

    pub fn job_poll_message_callback(&mut self, line: &str, now: DateTime<Utc>, flags: &EventFlags) {
        let parsed = match batch_system::parse_poll_message_line(line) {
            Ok(p) => p,
            Err(raw) => {
                warn!(task = %self.id(), line = %raw, "malformed poll-message callback line");
                return;
            }
        };
        let priority = match parsed.priority.as_str() {
            "WARNING" => MessagePriority::Warning,
            "CRITICAL" => MessagePriority::Critical,
            "DEBUG" => MessagePriority::Debug,
            _ => MessagePriority::Info,
        };
        self.on_message(IncomingMessage::new(priority, parsed.message, true), now, flags);
    }

    pub fn job_kill_callback(&mut self, line: &str, now: DateTime<Utc>, flags: &EventFlags) {
        let parsed = match batch_system::parse_kill_line(line) {
            Ok(p) => p,
            Err(raw) => {
                warn!(task = %self.id(), line = %raw, "malformed kill callback line");
                return;
            }
        };
        if parsed.ret_code != 0 {
            self.kill_failed = true;
            self.summary.latest_message = "kill failed".to_string();
            warn!(task = %self.id(), submit_num = self.submit_number, "kill failed");
            flags.signal_summary_invalid();
            return;
        }
        match self.status {
            TaskStatus::Submitted => {
                self.job_submission_failed(now, flags);
                flags.signal_summary_invalid();
            }
            TaskStatus::Running => {
                self.job_execution_failed(now, flags);
                flags.signal_summary_invalid();
            }
            other => {
                warn!(task = %self.id(), status = %other, "ignoring job kill result, unexpected task state");
            }
        }
    }

    // -- Message ingress --

    /// Normalize, de-duplicate, classify, and route an incoming message.
    pub fn on_message(&mut self, msg: IncomingMessage, now: DateTime<Utc>, flags: &EventFlags) {
        debug!(task = %self.id(), status = %self.status, message = %msg.text, polled = msg.polled, "incoming message");

        let normalized = msg.normalized();
        self.summary.latest_message = if msg.polled {
            format!("{normalized} (polled)")
        } else {
            normalized.clone()
        };
        flags.signal_summary_invalid();

        if self.status == TaskStatus::Failed && !self.enable_resurrection {
            warn!(task = %self.id(), message = %normalized, "rejecting message received while failed");
            return;
        }

        self.outputs.record(&normalized);

        if msg.polled && !self.status.is_active() {
            warn!(task = %self.id(), "ignoring late poll result: task is not active");
            return;
        }

        if msg.priority == MessagePriority::Warning {
            self.setup_event_handlers("warning", &normalized, now);
        }

        if self.task_def.runtime.reset_execution_timer {
            if let Some(timeout) = self.task_def.runtime.execution_timeout {
                self.execution_timeout = Some(now + timeout);
            }
        }

        match message::classify(&normalized) {
            MessageKind::Started
                if matches!(
                    self.status,
                    TaskStatus::Ready | TaskStatus::Submitted | TaskStatus::SubmitFailed
                ) =>
            {
                if self.job_vacated {
                    self.job_vacated = false;
                    warn!(task = %self.id(), "vacated job restarted");
                }
                flags.signal_replan();
                self.transition(TaskStatus::Running, now);
                self.started_time = Some(now);
                self.summary.started_time = Some(now);
                self.sub_try = TryState::new(self.task_def.runtime.submission_retry_delays.clone());
                if let Some(timeout) = self.task_def.runtime.execution_timeout {
                    self.execution_timeout = Some(now + timeout);
                } else {
                    self.execution_timeout = None;
                }
                self.setup_event_handlers("started", "job started", now);
            }
            MessageKind::Succeeded
                if matches!(
                    self.status,
                    TaskStatus::Ready
                        | TaskStatus::Submitted
                        | TaskStatus::SubmitFailed
                        | TaskStatus::Running
                        | TaskStatus::Failed
                ) =>
            {
                // A late "succeeded" is treated as authoritative even
                // over an already-recorded failure, since a job can
                // report failure and then succeed on a retried poll.
                self.execution_timeout = None;
                self.hold_on_retry = false;
                flags.signal_replan();
                self.finished_time = Some(now);
                self.summary.finished_time = Some(now);
                if let Some(started) = self.started_time {
                    self.task_def
                        .record_elapsed_time((now - started).num_seconds() as f64);
                }
                let id = self.id().to_string();
                self.deltas.push_update(PendingRow::TaskJob {
                    task: id,
                    row: TaskJobRow {
                        time_submit: self.submitted_time.unwrap_or(now),
                        is_manual_submit: self.is_manual_submit,
                        try_num: self.run_try.index() as u32 + 1,
                        user_at_host: self.user_at_host.clone(),
                        batch_sys_name: Some(self.task_def.runtime.batch_system_name.clone()),
                        submit_status: None,
                        time_submit_exit: None,
                        batch_sys_job_id: self.submit_method_id.clone(),
                        run_status: Some(0),
                        time_run: self.started_time,
                        time_run_exit: Some(now),
                        run_signal: None,
                    },
                });
                self.setup_event_handlers("succeeded", "job succeeded", now);
                self.force_transition(TaskStatus::Succeeded, now);
            }
            MessageKind::Failed
                if matches!(
                    self.status,
                    TaskStatus::Ready | TaskStatus::Submitted | TaskStatus::SubmitFailed | TaskStatus::Running
                ) =>
            {
                self.job_execution_failed(now, flags);
            }
            MessageKind::FailSignal(signal) => {
                let id = self.id().to_string();
                self.deltas.push_insert(PendingRow::TaskEvent {
                    task: id.clone(),
                    row: TaskEventRow {
                        time: now,
                        event: "signaled".to_string(),
                        message: normalized.clone(),
                        misc: self.user_at_host.clone(),
                    },
                });
                self.deltas.push_update(PendingRow::TaskJob {
                    task: id,
                    row: TaskJobRow {
                        time_submit: self.submitted_time.unwrap_or(now),
                        is_manual_submit: self.is_manual_submit,
                        try_num: self.run_try.index() as u32 + 1,
                        user_at_host: self.user_at_host.clone(),
                        batch_sys_name: Some(self.task_def.runtime.batch_system_name.clone()),
                        submit_status: None,
                        time_submit_exit: None,
                        batch_sys_job_id: self.submit_method_id.clone(),
                        run_status: None,
                        time_run: None,
                        time_run_exit: None,
                        run_signal: Some(signal),
                    },
                });
            }
            MessageKind::Vacated(_) => {
                flags.signal_replan();
                self.transition(TaskStatus::Submitted, now);
                let id = self.id().to_string();
                self.deltas.push_insert(PendingRow::TaskEvent {
                    task: id,
                    row: TaskEventRow {
                        time: now,
                        event: "vacated".to_string(),
                        message: normalized,
                        misc: self.user_at_host.clone(),
                    },
                });
                self.execution_timeout = None;
                self.started_time = None;
                self.summary.started_time = None;
                self.sub_try = TryState::new(self.task_def.runtime.submission_retry_delays.clone());
                self.job_vacated = true;
            }
            MessageKind::SubmissionFailed => {
                self.submission_timeout = None;
                self.job_submission_failed(now, flags);
            }
            MessageKind::Started | MessageKind::Succeeded | MessageKind::Failed => {
                // Token matched but the status guard didn't: fall
                // through to the generic message-event record below.
                self.record_message_event(&normalized, msg.priority, now);
            }
            MessageKind::Other(_) => {
                self.record_message_event(&normalized, msg.priority, now);
            }
        }
    }

    fn record_message_event(&mut self, message: &str, priority: MessagePriority, now: DateTime<Utc>) {
        let level = match priority {
            MessagePriority::Debug => "debug",
            MessagePriority::Info => "info",
            MessagePriority::Warning => "warning",
            MessagePriority::Critical => "critical",
        };
        let id = self.id().to_string();
        self.deltas.push_insert(PendingRow::TaskEvent {
            task: id,
            row: TaskEventRow {
                time: now,
                event: format!("message {level}"),
                message: message.to_string(),
                misc: self.user_at_host.clone(),
            },
        });
    }

    // -- Manual trigger --

    /// Valid from any status, targets `ready`, and clears retry timers.
    pub fn manual_trigger(&mut self, now: DateTime<Utc>, flags: &EventFlags) {
        self.run_try.clear_timeout();
        self.sub_try.clear_timeout();
        self.is_manual_submit = true;
        self.force_transition(TaskStatus::Ready, now);
        flags.signal_replan();
    }

    // -- Timeouts --

    /// Fires exactly one `submission timeout` event; never changes state.
    pub fn handle_submission_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if matches!(self.submission_timeout, Some(t) if now > t) {
            self.submission_timeout = None;
            self.setup_event_handlers("submission timeout", "job submission timeout", now);
            true
        } else {
            false
        }
    }

    /// Fires exactly one `execution timeout` event; never changes state.
    /// May be re-armed on every message if `reset timer` is configured
    /// (handled in [`Self::on_message`]).
    pub fn handle_execution_timeout(&mut self, now: DateTime<Utc>) -> bool {
        if matches!(self.execution_timeout, Some(t) if now > t) {
            self.execution_timeout = None;
            self.setup_event_handlers("execution timeout", "job execution timeout", now);
            true
        } else {
            false
        }
    }

    // -- Simulation mode --

    /// Polls whether the simulated run has completed; if so, returns the
    /// synthetic messages to enqueue (`submitted` then `succeeded` or
    /// `failed`), same path a live batch system's messages would use.
    pub fn sim_time_check(&self, now: DateTime<Utc>) -> Option<Vec<IncomingMessage>> {
        let sim = self.task_def.runtime.simulation.as_ref()?;
        let started = self.started_time?;
        if now <= started + sim.run_length {
            return None;
        }
        let mut msgs = vec![IncomingMessage::new(MessagePriority::Info, "submitted", false)];
        if sim.simulate_failure {
            msgs.push(IncomingMessage::new(MessagePriority::Critical, "failed", false));
        } else {
            msgs.push(IncomingMessage::new(MessagePriority::Info, "succeeded", false));
        }
        Some(msgs)
    }

    // -- Event handler setup (component D) --

    fn setup_event_handlers(&mut self, event: &str, message: &str, now: DateTime<Utc>) {
        let id = self.id();
        self.deltas.push_insert(PendingRow::TaskEvent {
            task: id.to_string(),
            row: TaskEventRow {
                time: now,
                event: event.to_string(),
                message: message.to_string(),
                misc: self.user_at_host.clone(),
            },
        });

        if matches!(event, "failed" | "retry" | "succeeded") {
            self.setup_job_logs_retrieval(event);
        }
        if self.task_def.runtime.event_hooks.mail_events.iter().any(|e| e == event) {
            self.setup_mail_handler(event);
        }
        self.setup_custom_event_handlers(event, message);
    }

    fn setup_job_logs_retrieval(&mut self, event: &str) {
        let local = self.user_at_host.as_deref().is_none_or(|u| u.ends_with("@localhost") || u == "localhost");
        let hooks = &self.task_def.runtime.event_hooks;
        if local || !hooks.retrieve_job_logs {
            let key = HandlerKey {
                family: HandlerFamily::JobLogsRegister,
                event: event.to_string(),
                submit_number: self.submit_number,
            };
            let delays = hooks.job_logs_register_retry_delays.clone();
            self.handlers.register(key, "register-logs".to_string(), delays);
        } else {
            let key = HandlerKey {
                family: HandlerFamily::JobLogsRetrieve,
                event: event.to_string(),
                submit_number: self.submit_number,
            };
            let delays = hooks.job_logs_retrieve_retry_delays.clone();
            self.handlers.register(key, "retrieve-logs".to_string(), delays);
        }
    }

    fn setup_mail_handler(&mut self, event: &str) {
        let key = HandlerKey {
            family: HandlerFamily::Mail,
            event: event.to_string(),
            submit_number: self.submit_number,
        };
        self.handlers.register(key, "mail".to_string(), vec![]);
    }

    fn setup_custom_event_handlers(&mut self, event: &str, message: &str) {
        let id = self.id();
        let handlers = self.task_def.runtime.event_hooks.handlers_for(event).to_vec();
        let retry_delays = self.task_def.runtime.event_hooks.handler_retry_delays.clone();
        for (i, handler) in handlers.iter().enumerate() {
            let key = HandlerKey {
                family: HandlerFamily::Custom(i),
                event: event.to_string(),
                submit_number: self.submit_number,
            };
            if self.handlers.contains(&key) {
                continue;
            }
            let fields = TemplateFields {
                event,
                suite: "suite", // suite name is scheduler-pool state, out of scope here
                point: &self.point.to_string(),
                name: &self.task_def.name,
                submit_num: self.submit_number,
                id: &id.to_string(),
                message,
            };
            let cmd = expand_template(handler, &fields);
            self.handlers.register(key, cmd.0, retry_delays.clone());
        }
    }

    // -- Internal transition helpers --

    fn transition(&mut self, to: TaskStatus, now: DateTime<Utc>) -> bool {
        if !TaskStateMachine::is_valid_transition(self.status, to) {
            warn!(task = %self.id(), from = %self.status, to = %to, "illegal transition dropped");
            return false;
        }
        self.apply_transition(to, now);
        true
    }

    /// Used only for the one transition allowed unconditionally despite
    /// the graph (`failed -> succeeded`) and for manual trigger, which is
    /// valid from any status.
    fn force_transition(&mut self, to: TaskStatus, now: DateTime<Utc>) {
        self.apply_transition(to, now);
    }

    fn apply_transition(&mut self, to: TaskStatus, now: DateTime<Utc>) {
        info!(task = %self.id(), from = %self.status, to = %to, "task transition");
        self.status = to;
        if to.is_terminal() {
            self.hold_on_retry = false;
        }
        let id = self.id().to_string();
        self.deltas.push_update(PendingRow::TaskState {
            task: id,
            row: TaskStateRow {
                time_created: None,
                time_updated: now,
                status: to,
                submit_num: Some(self.submit_number),
                try_num: Some(self.run_try.index() as u32 + 1),
                submit_method: None,
                host: self.host.clone(),
            },
        });
    }

    pub fn drain_deltas(&mut self) -> PendingDeltas {
        std::mem::replace(&mut self.deltas, PendingDeltas::new())
    }

    pub fn set_host(&mut self, host: Option<String>, owner: Option<String>, user_at_host: Option<String>) {
        self.host = host;
        self.owner = owner;
        self.user_at_host = user_at_host;
    }

    pub fn set_enable_resurrection(&mut self, enabled: bool) {
        self.enable_resurrection = enabled;
    }
}
