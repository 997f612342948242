//! Process-pool callback line parsing, and the batch-system registry.
//!
//! Parsing here never raises: a malformed line becomes `Err(original
//! line)`, which callers turn into `CoreError::InputMalformed` and a job
//! activity log entry.

use std::collections::HashMap;

/// Outcome of a `job-submit-callback` line:
/// `timestamp | _ | return-code | submit-method-id?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCallbackLine {
    pub timestamp: String,
    pub ret_code: i32,
    pub submit_method_id: Option<String>,
}

pub fn parse_submit_line(line: &str) -> Result<SubmitCallbackLine, String> {
    let items: Vec<&str> = line.split('|').collect();
    if items.len() < 3 {
        return Err(line.to_string());
    }
    let ret_code: i32 = items[2].parse().map_err(|_| line.to_string())?;
    Ok(SubmitCallbackLine {
        timestamp: items[0].to_string(),
        ret_code,
        submit_method_id: items.get(3).map(|s| s.to_string()).filter(|s| !s.is_empty()),
    })
}

/// Outcome of a `job-kill-callback` line: `timestamp | _ | return-code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCallbackLine {
    pub timestamp: String,
    pub ret_code: i32,
}

pub fn parse_kill_line(line: &str) -> Result<KillCallbackLine, String> {
    let items: Vec<&str> = line.splitn(3, '|').collect();
    if items.len() < 3 {
        return Err(line.to_string());
    }
    let ret_code: i32 = items[2].parse().map_err(|_| line.to_string())?;
    Ok(KillCallbackLine {
        timestamp: items[0].to_string(),
        ret_code,
    })
}

/// Fields 3 and 4 of a `job-poll-message-callback` line: `priority|message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollMessageLine {
    pub priority: String,
    pub message: String,
}

pub fn parse_poll_message_line(line: &str) -> Result<PollMessageLine, String> {
    let items: Vec<&str> = line.split('|').collect();
    if items.len() < 5 {
        return Err(line.to_string());
    }
    Ok(PollMessageLine {
        priority: items[3].to_string(),
        message: items[4].to_string(),
    })
}

/// The classified outcome of a `job-poll-callback` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// `run_status=1`, signal is `ERR`/`EXIT`: failed normally.
    FailedNormally,
    /// `run_status=1`, exited the batch system: failed by signal.
    FailedBySignal(String),
    /// `run_status=1`, still managed by the batch system: may yet
    /// restart, do not mark failed.
    TerminatedButManaged,
    /// `run_status=0`: succeeded.
    Succeeded,
    /// Terminated without running the error trap, exited the batch
    /// system.
    TerminatedWithoutTrap,
    /// Started and still managed by the batch system.
    Started,
    /// Never ran, and no longer in the batch system.
    SubmissionFailed,
    /// Never ran, still in the batch system (no state change implied).
    StillSubmitted,
}

/// Parse a poll line's significant fields (index 4..=8: `batch_sys_exit_polled
/// | run_status | run_signal | _ | time_run`) and classify the outcome.
pub fn parse_poll_line(line: &str) -> Result<PollOutcome, String> {
    let items: Vec<&str> = line.split('|').collect();
    if items.len() < 9 {
        return Err(line.to_string());
    }
    let batch_sys_exit_polled = items[4];
    let run_status = items[5];
    let run_signal = items[6];
    let time_run = items[8];

    let outcome = if run_status == "1" && matches!(run_signal, "ERR" | "EXIT") {
        PollOutcome::FailedNormally
    } else if run_status == "1" && batch_sys_exit_polled == "1" {
        PollOutcome::FailedBySignal(run_signal.to_string())
    } else if run_status == "1" {
        PollOutcome::TerminatedButManaged
    } else if run_status == "0" {
        PollOutcome::Succeeded
    } else if !time_run.is_empty() && batch_sys_exit_polled == "1" {
        PollOutcome::TerminatedWithoutTrap
    } else if !time_run.is_empty() {
        PollOutcome::Started
    } else if batch_sys_exit_polled == "1" {
        PollOutcome::SubmissionFailed
    } else {
        PollOutcome::StillSubmitted
    };
    Ok(outcome)
}

/// Render a job-activity-log line: strip a `timestamp|_|content` triple and
/// re-render as `"{timestamp} {content}"`, optionally prefixed with
/// `(user@host) `.
pub fn render_activity_log_line(line: &str, user: Option<&str>, host: Option<&str>) -> String {
    let prefix = match (user, host) {
        (Some(u), Some(h)) => format!("({u}@{h}) "),
        (None, Some(h)) => format!("({h}) "),
        (Some(u), None) => format!("({u}@localhost) "),
        (None, None) => String::new(),
    };
    let body = match line.splitn(3, '|').collect::<Vec<_>>()[..] {
        [timestamp, _, content] => format!("{timestamp} {content}"),
        _ => line.to_string(),
    };
    format!("{prefix}{body}")
}

/// The variant-handler contract batch systems implement: format the
/// submit and kill commands for this batch system. Poll-line parsing is uniform
/// across batch systems (`parse_poll_line` above), so it is not part of
/// this trait.
pub trait BatchSystem: Send + Sync {
    fn name(&self) -> &str;
    fn format_submit_command(&self, script_path: &str, directives: &HashMap<String, String>) -> Vec<String>;
    fn format_kill_command(&self, submit_method_id: &str) -> Vec<String>;
}

/// A simple background/direct-exec batch system: runs the job script in
/// the foreground and kills it by PID (`submit_method_id` is the PID).
#[derive(Debug, Default)]
pub struct BackgroundBatchSystem;

impl BatchSystem for BackgroundBatchSystem {
    fn name(&self) -> &str {
        "background"
    }

    fn format_submit_command(&self, script_path: &str, _directives: &HashMap<String, String>) -> Vec<String> {
        vec![script_path.to_string(), "&".to_string()]
    }

    fn format_kill_command(&self, submit_method_id: &str) -> Vec<String> {
        vec!["kill".to_string(), submit_method_id.to_string()]
    }
}

/// Registry of batch-system variant handlers keyed by name.
#[derive(Default)]
pub struct BatchSystemRegistry {
    systems: HashMap<String, Box<dyn BatchSystem>>,
}

impl BatchSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, system: Box<dyn BatchSystem>) {
        self.systems.insert(system.name().to_string(), system);
    }

    pub fn get(&self, name: &str) -> Option<&dyn BatchSystem> {
        self.systems.get(name).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submit_line_with_method_id() {
        let parsed = parse_submit_line("2025-01-01T00:00:01|_|0|1234").unwrap();
        assert_eq!(parsed.ret_code, 0);
        assert_eq!(parsed.submit_method_id.as_deref(), Some("1234"));
    }

    #[test]
    fn parses_submit_line_without_method_id() {
        let parsed = parse_submit_line("t|_|1").unwrap();
        assert_eq!(parsed.ret_code, 1);
        assert_eq!(parsed.submit_method_id, None);
    }

    #[test]
    fn submit_line_malformed_is_err() {
        assert!(parse_submit_line("garbage").is_err());
    }

    #[test]
    fn parses_kill_line() {
        let parsed = parse_kill_line("t|_|0").unwrap();
        assert_eq!(parsed.ret_code, 0);
    }

    #[test]
    fn parses_poll_message_line() {
        let parsed = parse_poll_message_line("|||INFO|started at 2025-01-01T00:00:05").unwrap();
        assert_eq!(parsed.priority, "INFO");
        assert_eq!(parsed.message, "started at 2025-01-01T00:00:05");
    }

    #[test]
    fn poll_line_failed_normally() {
        let line = "x|x|x|x|0|1|ERR|x|";
        assert_eq!(parse_poll_line(line).unwrap(), PollOutcome::FailedNormally);
    }

    #[test]
    fn poll_line_failed_by_signal() {
        let line = "x|x|x|x|1|1|SIGTERM|x|";
        assert_eq!(
            parse_poll_line(line).unwrap(),
            PollOutcome::FailedBySignal("SIGTERM".to_string())
        );
    }

    #[test]
    fn poll_line_succeeded() {
        let line = "x|x|x|x|0|0||x|";
        assert_eq!(parse_poll_line(line).unwrap(), PollOutcome::Succeeded);
    }

    #[test]
    fn poll_line_still_submitted() {
        let line = "x|x|x|x|0|||x|";
        assert_eq!(parse_poll_line(line).unwrap(), PollOutcome::StillSubmitted);
    }

    #[test]
    fn poll_line_submission_failed() {
        let line = "x|x|x|x|1|||x|";
        assert_eq!(parse_poll_line(line).unwrap(), PollOutcome::SubmissionFailed);
    }

    #[test]
    fn poll_line_too_short_is_err() {
        assert!(parse_poll_line("a|b|c").is_err());
    }

    #[test]
    fn activity_log_line_strips_triple_and_prefixes_host() {
        let rendered = render_activity_log_line("2025-01-01|_|did a thing", Some("alice"), Some("host1"));
        assert_eq!(rendered, "(alice@host1) 2025-01-01 did a thing");
    }

    #[test]
    fn activity_log_line_no_prefix_when_local() {
        let rendered = render_activity_log_line("2025-01-01|_|did a thing", None, None);
        assert_eq!(rendered, "2025-01-01 did a thing");
    }

    #[test]
    fn registry_round_trips() {
        let mut registry = BatchSystemRegistry::new();
        registry.register(Box::new(BackgroundBatchSystem));
        assert!(registry.get("background").is_some());
        assert!(registry.get("slurm").is_none());
    }
}
