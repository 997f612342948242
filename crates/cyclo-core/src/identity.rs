//! Task identity: `(name, cycle-point)`, unique within a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cycle_point::CyclePoint;

/// `(name, cycle-point)` -- uniquely identifies a task proxy within a run.
/// String form is `name.cycle`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub name: String,
    pub point: CyclePoint,
}

impl TaskId {
    pub fn new(name: impl Into<String>, point: CyclePoint) -> Self {
        Self {
            name: name.into(),
            point,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.point)
    }
}
