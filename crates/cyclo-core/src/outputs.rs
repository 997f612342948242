//! Task outputs and prerequisites: an explicit `output-name -> completed?`
//! mapping rather than dynamically-set attributes derived from message
//! strings. The set of output names is fixed by the task definition plus
//! the well-known set `{started, succeeded, failed, submit_failed}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Output names every task has regardless of its own declared outputs.
pub const WELL_KNOWN_OUTPUTS: &[&str] = &["started", "succeeded", "failed", "submit_failed"];

/// `message -> completed?`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutputs {
    completed: BTreeMap<String, bool>,
}

impl TaskOutputs {
    /// Build the output set from the task definition's declared custom
    /// outputs plus the well-known set, all initialized incomplete.
    pub fn new(custom_outputs: &[String]) -> Self {
        let mut completed = BTreeMap::new();
        for name in WELL_KNOWN_OUTPUTS {
            completed.insert((*name).to_string(), false);
        }
        for name in custom_outputs {
            completed.entry(name.clone()).or_insert(false);
        }
        Self { completed }
    }

    /// Record an output as completed. Idempotent: re-recording an
    /// already-completed output is a no-op, and recording an output not
    /// in the fixed set simply adds it (a message token not declared as a
    /// custom output is still recorded).
    pub fn record(&mut self, name: &str) {
        self.completed.entry(name.to_string()).or_insert(false);
        self.completed.insert(name.to_string(), true);
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.get(name).copied().unwrap_or(false)
    }

    pub fn completed_messages(&self) -> Vec<&str> {
        self.completed
            .iter()
            .filter(|(_, done)| **done)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn as_map(&self) -> &BTreeMap<String, bool> {
        &self.completed
    }
}

/// A single task prerequisite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    pub condition_expression: String,
    pub message: String,
    pub satisfied: bool,
}

impl Prerequisite {
    pub fn new(condition_expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            condition_expression: condition_expression.into(),
            message: message.into(),
            satisfied: false,
        }
    }
}

/// Whether every prerequisite in `prereqs` is satisfied.
pub fn all_satisfied(prereqs: &[Prerequisite]) -> bool {
    prereqs.iter().all(|p| p.satisfied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_seeds_well_known_outputs_incomplete() {
        let outputs = TaskOutputs::new(&[]);
        for name in WELL_KNOWN_OUTPUTS {
            assert!(!outputs.is_completed(name));
        }
    }

    #[test]
    fn record_is_idempotent() {
        let mut outputs = TaskOutputs::new(&[]);
        outputs.record("started");
        outputs.record("started");
        assert!(outputs.is_completed("started"));
        assert_eq!(
            outputs
                .completed_messages()
                .iter()
                .filter(|m| **m == "started")
                .count(),
            1
        );
    }

    #[test]
    fn custom_outputs_are_seeded_and_recordable() {
        let mut outputs = TaskOutputs::new(&["file ready".to_string()]);
        assert!(!outputs.is_completed("file ready"));
        outputs.record("file ready");
        assert!(outputs.is_completed("file ready"));
    }

    #[test]
    fn all_satisfied_requires_every_prereq() {
        let mut prereqs = vec![
            Prerequisite::new("foo.succeeded", "foo succeeded"),
            Prerequisite::new("bar.succeeded", "bar succeeded"),
        ];
        assert!(!all_satisfied(&prereqs));
        prereqs[0].satisfied = true;
        assert!(!all_satisfied(&prereqs));
        prereqs[1].satisfied = true;
        assert!(all_satisfied(&prereqs));
    }
}
