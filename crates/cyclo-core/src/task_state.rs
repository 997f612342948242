//! Task status and its legal transition graph.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The sum-typed task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Held,
    Expired,
    Queued,
    Ready,
    Submitted,
    SubmitFailed,
    SubmitRetry,
    Running,
    Succeeded,
    Failed,
    Retry,
    Runahead,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Held => "held",
            Self::Expired => "expired",
            Self::Queued => "queued",
            Self::Ready => "ready",
            Self::Submitted => "submitted",
            Self::SubmitFailed => "submit-failed",
            Self::SubmitRetry => "submit-retry",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Runahead => "runahead",
        };
        f.write_str(s)
    }
}

impl TaskStatus {
    /// Terminal statuses have no outgoing transitions except manual
    /// trigger, which resets try-states and returns to `ready`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Expired | TaskStatus::SubmitFailed | TaskStatus::Failed
        )
    }

    /// The "past-submit" predicate used by spawning:
    /// `ready < submitted, submit-retry, running, succeeded, failed, retry`.
    pub fn is_past_submit(self) -> bool {
        matches!(
            self,
            TaskStatus::Submitted
                | TaskStatus::SubmitRetry
                | TaskStatus::Running
                | TaskStatus::Succeeded
                | TaskStatus::Failed
                | TaskStatus::Retry
        )
    }

    /// Statuses a message-ingress/poll result is still accepted in. A
    /// result received after the proxy is no longer active is logged and
    /// ignored rather than applied.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::Ready
                | TaskStatus::Submitted
                | TaskStatus::SubmitFailed
                | TaskStatus::SubmitRetry
                | TaskStatus::Running
        )
    }
}

/// The task state machine: validates legal edges in the transition graph.
/// All other requested transitions are errors to log and drop.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Whether `from -> to` is a legal edge, ignoring guard conditions
    /// (retries-remaining, clock, prerequisites) which the caller
    /// (`TaskProxy`) evaluates before calling this.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Waiting, Queued)
                | (Waiting, Expired)
                | (Queued, Ready)
                | (Ready, Submitted)
                | (Ready, SubmitRetry)
                | (Ready, SubmitFailed)
                | (SubmitRetry, Ready)
                | (Retry, Ready)
                | (Submitted, Running)
                | (Submitted, Failed)
                | (SubmitFailed, Failed)
                | (Ready, Failed)
                | (Running, Failed)
                | (Submitted, Retry)
                | (SubmitFailed, Retry)
                | (Ready, Retry)
                | (Running, Retry)
                | (Submitted, Succeeded)
                | (SubmitFailed, Succeeded)
                | (Ready, Succeeded)
                | (Running, Succeeded)
                | (Submitted, SubmitFailed)
                | (Running, Submitted) // vacation
        )
    }

    /// Manual trigger is valid from any status and always targets `ready`;
    /// the caller is responsible for clearing retry timers.
    pub fn manual_trigger(_from: TaskStatus) -> TaskStatus {
        TaskStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn happy_path_chain_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(Waiting, Queued));
        assert!(TaskStateMachine::is_valid_transition(Queued, Ready));
        assert!(TaskStateMachine::is_valid_transition(Ready, Submitted));
        assert!(TaskStateMachine::is_valid_transition(Submitted, Running));
        assert!(TaskStateMachine::is_valid_transition(Running, Succeeded));
    }

    #[test]
    fn unrelated_pairs_are_invalid() {
        assert!(!TaskStateMachine::is_valid_transition(Succeeded, Running));
        assert!(!TaskStateMachine::is_valid_transition(Waiting, Running));
        assert!(!TaskStateMachine::is_valid_transition(Expired, Ready));
    }

    #[test]
    fn terminal_statuses_flagged() {
        assert!(Succeeded.is_terminal());
        assert!(Expired.is_terminal());
        assert!(SubmitFailed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!Retry.is_terminal());
    }

    #[test]
    fn past_submit_predicate() {
        assert!(!Ready.is_past_submit());
        assert!(Submitted.is_past_submit());
        assert!(Running.is_past_submit());
        assert!(Succeeded.is_past_submit());
        assert!(Failed.is_past_submit());
        assert!(Retry.is_past_submit());
        assert!(SubmitRetry.is_past_submit());
    }

    #[test]
    fn manual_trigger_always_targets_ready() {
        assert_eq!(TaskStateMachine::manual_trigger(SubmitRetry), Ready);
        assert_eq!(TaskStateMachine::manual_trigger(Failed), Ready);
    }

    #[test]
    fn vacation_transition_is_running_to_submitted() {
        assert!(TaskStateMachine::is_valid_transition(Running, Submitted));
        assert!(!TaskStateMachine::is_valid_transition(Submitted, Waiting));
    }
}
