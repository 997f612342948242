//! The external, immutable task definition.
//!
//! Task definitions live in an immutable table keyed by name: an arena +
//! handle model that breaks the would-be cyclic reference between a
//! proxy, its task definition, and the definition's cycling sequences.
//! Proxies hold the name, not a back-pointer; callers share one
//! `Arc<TaskDefinition>` per name across all of that name's proxies.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Duration;

use crate::cycle_point::{CycleOffset, Sequence};

/// Simulation-mode configuration.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Wall-clock length of the simulated run.
    pub run_length: Duration,
    /// Whether the simulated run ends in `failed` rather than `succeeded`.
    pub simulate_failure: bool,
}

/// Event-hook configuration: which events trigger mail, which trigger
/// custom commands, and the retry schedule each family uses.
#[derive(Debug, Clone, Default)]
pub struct EventHooksConfig {
    /// Events for which a mail notification handler should be queued.
    pub mail_events: Vec<String>,
    /// The generic `handlers` list, used when `handler_events` names the
    /// firing event and no per-event override exists.
    pub handlers: Vec<String>,
    /// Events the generic `handlers` list applies to.
    pub handler_events: Vec<String>,
    /// Per-event handler overrides (`"<event> handler"`).
    pub per_event_handlers: HashMap<String, Vec<String>>,
    /// Retry delays shared by custom command handlers.
    pub handler_retry_delays: Vec<Duration>,
    /// Whether job logs should be retrieved from a remote host on
    /// `failed`/`retry`/`succeeded`. When `false` (or the job ran
    /// locally), a `register-logs` record is used instead.
    pub retrieve_job_logs: bool,
    /// Retry delays for the job-logs retrieval handler.
    pub job_logs_retrieve_retry_delays: Vec<Duration>,
    /// Retry delays for the job-logs register handler (local/no-retrieval
    /// path).
    pub job_logs_register_retry_delays: Vec<Duration>,
}

impl EventHooksConfig {
    /// Resolve the handler list for `event`: the per-event override if
    /// present, else the generic list when `event` is in `handler_events`.
    pub fn handlers_for(&self, event: &str) -> &[String] {
        if let Some(list) = self.per_event_handlers.get(event) {
            return list;
        }
        if self.handler_events.iter().any(|e| e == event) {
            return &self.handlers;
        }
        &[]
    }
}

/// Polling intervals for submitted/running jobs.
#[derive(Debug, Clone, Copy)]
pub struct PollingIntervals {
    pub submission: Duration,
    pub execution: Duration,
}

/// Per-task runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub script: String,
    pub environment: HashMap<String, String>,
    pub directives: HashMap<String, String>,
    pub retry_delays: Vec<Duration>,
    pub submission_retry_delays: Vec<Duration>,
    pub event_hooks: EventHooksConfig,
    pub polling_intervals: PollingIntervals,
    pub submission_timeout: Option<Duration>,
    pub execution_timeout: Option<Duration>,
    /// Reset the execution timeout on every incoming message.
    pub reset_execution_timer: bool,
    pub batch_system_name: String,
    pub task_host: Option<String>,
    pub simulation: Option<SimulationConfig>,
}

/// Immutable metadata for a task name.
#[derive(Debug)]
pub struct TaskDefinition {
    pub name: String,
    pub sequences: Vec<Box<dyn Sequence>>,
    pub runtime: RuntimeConfig,
    pub clock_trigger_offset: Option<CycleOffset>,
    pub expiration_offset: Option<CycleOffset>,
    pub namespace_hierarchy: Vec<String>,
    pub is_coldstart: bool,
    /// Elapsed-time samples from prior successful runs. The core appends
    /// to this on success and otherwise only reads it; guarded by a mutex
    /// since one `Arc<TaskDefinition>` is shared across every proxy of
    /// this name.
    elapsed_time_samples: Mutex<Vec<f64>>,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        sequences: Vec<Box<dyn Sequence>>,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            name: name.into(),
            sequences,
            runtime,
            clock_trigger_offset: None,
            expiration_offset: None,
            namespace_hierarchy: Vec::new(),
            is_coldstart: false,
            elapsed_time_samples: Mutex::new(Vec::new()),
        }
    }

    /// True if `point` lands on at least one of this definition's
    /// sequences.
    pub fn accepts(&self, point: &crate::cycle_point::CyclePoint) -> bool {
        self.sequences.iter().any(|s| s.is_valid(point))
    }

    pub fn elapsed_time_samples(&self) -> Vec<f64> {
        self.elapsed_time_samples.lock().unwrap().clone()
    }

    pub fn mean_elapsed_time(&self) -> Option<f64> {
        let samples = self.elapsed_time_samples.lock().unwrap();
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        }
    }

    /// Append an elapsed-time sample from a successful run.
    pub fn record_elapsed_time(&self, seconds: f64) {
        self.elapsed_time_samples.lock().unwrap().push(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle_point::{CyclePoint, IntegerSequence};

    fn runtime() -> RuntimeConfig {
        RuntimeConfig {
            script: "true".into(),
            environment: HashMap::new(),
            directives: HashMap::new(),
            retry_delays: vec![],
            submission_retry_delays: vec![],
            event_hooks: EventHooksConfig::default(),
            polling_intervals: PollingIntervals {
                submission: Duration::seconds(60),
                execution: Duration::seconds(60),
            },
            submission_timeout: None,
            execution_timeout: None,
            reset_execution_timer: false,
            batch_system_name: "background".into(),
            task_host: None,
            simulation: None,
        }
    }

    #[test]
    fn accepts_checks_all_sequences() {
        let def = TaskDefinition::new(
            "foo",
            vec![Box::new(IntegerSequence {
                start: 0,
                step: 6,
                end: None,
            })],
            runtime(),
        );
        assert!(def.accepts(&CyclePoint::Integer(12)));
        assert!(!def.accepts(&CyclePoint::Integer(13)));
    }

    #[test]
    fn elapsed_time_only_appends() {
        let def = TaskDefinition::new("foo", vec![], runtime());
        assert_eq!(def.mean_elapsed_time(), None);
        def.record_elapsed_time(10.0);
        def.record_elapsed_time(20.0);
        assert_eq!(def.mean_elapsed_time(), Some(15.0));
        assert_eq!(def.elapsed_time_samples(), vec![10.0, 20.0]);
    }

    #[test]
    fn event_hooks_resolve_per_event_override_first() {
        let mut hooks = EventHooksConfig::default();
        hooks.handlers = vec!["generic.sh".into()];
        hooks.handler_events = vec!["succeeded".into()];
        hooks
            .per_event_handlers
            .insert("failed".into(), vec!["on-failed.sh".into()]);

        assert_eq!(hooks.handlers_for("failed"), &["on-failed.sh".to_string()]);
        assert_eq!(hooks.handlers_for("succeeded"), &["generic.sh".to_string()]);
        assert!(hooks.handlers_for("started").is_empty());
    }
}
