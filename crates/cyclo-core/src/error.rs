//! The closed error taxonomy for the task proxy lifecycle engine.
//!
//! Each variant is a *kind* of failure the core itself can observe and
//! must classify, not a wrapper around an arbitrary external error
//! (those are `anyhow::Error` at the call site instead).

use thiserror::Error;

use crate::identity::TaskId;

/// Errors the core engine raises itself, as opposed to errors bubbled up
/// from external collaborators (host selection, job-file writing, ...),
/// which callers wrap in `anyhow::Error` instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A process-pool callback line could not be parsed. Never fatal: the
    /// caller logs it to the job activity log and treats it as a null
    /// outcome (latest-message updated, no state change).
    #[error("malformed callback line for {task}: {line:?}")]
    InputMalformed { task: TaskId, line: String },

    /// Constructing a proxy whose cycle point lies outside every sequence
    /// of its task definition. Hard error at construction time.
    #[error("cycle point {point} for task {name} is outside all sequences")]
    BoundsViolation { name: String, point: String },

    /// A malformed simulation-mode time range or retry-delay list,
    /// surfaced eagerly at `set_from_rtconfig`.
    #[error("invalid runtime configuration for {task}: {reason}")]
    Configuration { task: TaskId, reason: String },

    /// An attempted transition the state machine does not permit. These
    /// are logged and dropped rather than propagated everywhere; this
    /// variant exists for call sites that need to distinguish the drop
    /// from a successful transition.
    #[error("illegal transition for {task}: {from} -> (event {event})")]
    IllegalTransition {
        task: TaskId,
        from: crate::task_state::TaskStatus,
        event: String,
    },

    /// `spawn` invoked on a proxy definition whose sequences produced no
    /// further point (not an error condition callers should treat as
    /// failure, but distinguishable from "already spawned").
    #[error("no successor cycle point for {task}")]
    NoSuccessor { task: TaskId },
}

/// Result alias used throughout the engine for `CoreError`-producing calls.
pub type CoreResult<T> = Result<T, CoreError>;
