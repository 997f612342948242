//! Message ingress: normalizes, de-duplicates, and classifies inbound
//! task messages.
//!
//! This module owns the pure parsing/classification; `TaskProxy::on_message`
//! drives the state transitions the classification implies.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Severity of an incoming task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePriority {
    Debug,
    Info,
    Warning,
    Critical,
}

/// Prefix marking a batch-system job-vacation notice.
pub const VACATION_MESSAGE_PREFIX: &str = "vacated ";

/// Prefix marking a captured signal sent to a running job.
pub const FAIL_MESSAGE_PREFIX: &str = "failed/";

/// Well-known exact-match output tokens.
pub const OUTPUT_STARTED: &str = "started";
pub const OUTPUT_SUCCEEDED: &str = "succeeded";
pub const OUTPUT_FAILED: &str = "failed";
pub const OUTPUT_SUBMISSION_FAILED: &str = "submission failed";

static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" at .+$").unwrap());

/// An inbound task message before classification.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub priority: MessagePriority,
    pub text: String,
    pub polled: bool,
}

impl IncomingMessage {
    pub fn new(priority: MessagePriority, text: impl Into<String>, polled: bool) -> Self {
        Self {
            priority,
            text: text.into(),
            polled,
        }
    }

    /// Strip the fixed trailing `" at <timestamp>"` suffix.
    /// Returns the normalized message.
    pub fn normalized(&self) -> String {
        SUFFIX_RE.replace(&self.text, "").into_owned()
    }
}

/// The routed classification of a normalized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Started,
    Succeeded,
    Failed,
    SubmissionFailed,
    /// A signal captured on a running job; carries the signal name.
    FailSignal(String),
    /// A batch-system job-vacation notice; carries the full message.
    Vacated(String),
    /// Anything else: recorded as `message <priority>`.
    Other(String),
}

/// Classify a normalized message by exact-match / prefix rules, checked
/// in priority order: well-known tokens, then fail-signal prefix, then
/// vacation prefix, falling through to a generic progress note.
pub fn classify(normalized: &str) -> MessageKind {
    if normalized == OUTPUT_STARTED {
        MessageKind::Started
    } else if normalized == OUTPUT_SUCCEEDED {
        MessageKind::Succeeded
    } else if normalized == OUTPUT_FAILED {
        MessageKind::Failed
    } else if normalized == OUTPUT_SUBMISSION_FAILED {
        MessageKind::SubmissionFailed
    } else if let Some(signal) = normalized.strip_prefix(FAIL_MESSAGE_PREFIX) {
        MessageKind::FailSignal(signal.to_string())
    } else if normalized.starts_with(VACATION_MESSAGE_PREFIX) {
        MessageKind::Vacated(normalized.to_string())
    } else {
        MessageKind::Other(normalized.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_at_timestamp_suffix() {
        let msg = IncomingMessage::new(
            MessagePriority::Info,
            "succeeded at 2025-01-01T00:01:00",
            false,
        );
        assert_eq!(msg.normalized(), "succeeded");
    }

    #[test]
    fn leaves_message_without_suffix_untouched() {
        let msg = IncomingMessage::new(MessagePriority::Info, "started", false);
        assert_eq!(msg.normalized(), "started");
    }

    #[test]
    fn classifies_well_known_tokens() {
        assert_eq!(classify("started"), MessageKind::Started);
        assert_eq!(classify("succeeded"), MessageKind::Succeeded);
        assert_eq!(classify("failed"), MessageKind::Failed);
        assert_eq!(classify("submission failed"), MessageKind::SubmissionFailed);
    }

    #[test]
    fn classifies_fail_signal_prefix() {
        assert_eq!(
            classify("failed/SIGTERM"),
            MessageKind::FailSignal("SIGTERM".to_string())
        );
    }

    #[test]
    fn classifies_vacation_prefix() {
        assert_eq!(
            classify("vacated by batch system"),
            MessageKind::Vacated("vacated by batch system".to_string())
        );
    }

    #[test]
    fn classifies_unknown_as_other() {
        assert_eq!(
            classify("custom progress note"),
            MessageKind::Other("custom progress note".to_string())
        );
    }
}
