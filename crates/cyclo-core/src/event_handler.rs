//! The event-handler registry.
//!
//! For each observed lifecycle event the core sets up up to three handler
//! families (job-logs retrieval, mail, custom commands), each an
//! independently-retried `TryState` keyed by `((handler-key, event),
//! submit-number)`. De-duplication: if the key already exists, no new
//! record is created.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::try_state::TryState;

/// Identifies one handler family, independent of the event or submit
/// number it's keyed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HandlerFamily {
    JobLogsRetrieve,
    JobLogsRegister,
    Mail,
    /// Index into the configured `handlers` list.
    Custom(usize),
}

/// The full key a handler record is de-duplicated and looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub family: HandlerFamily,
    pub event: String,
    pub submit_number: u32,
}

/// One in-flight (or pending) handler invocation.
#[derive(Debug, Clone)]
pub struct HandlerRecord {
    pub try_state: TryState,
    pub command: String,
    /// True once the handler has been dispatched at least once; a record
    /// is due immediately on first registration (no delay has to elapse
    /// for the *first* attempt, only for retries).
    attempted: bool,
}

impl HandlerRecord {
    fn new(command: String, delays: Vec<chrono::Duration>) -> Self {
        Self {
            try_state: TryState::new(delays),
            command,
            attempted: false,
        }
    }

    /// Whether this record's next attempt should fire now.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.try_state.is_waiting() {
            return false;
        }
        !self.attempted || self.try_state.is_delay_done(now)
    }
}

/// Fields available to a custom-handler command template.
#[derive(Debug, Clone)]
pub struct TemplateFields<'a> {
    pub event: &'a str,
    pub suite: &'a str,
    pub point: &'a str,
    pub name: &'a str,
    pub submit_num: u32,
    pub id: &'a str,
    pub message: &'a str,
}

const MARKERS: &[&str] = &[
    "%(event)s",
    "%(suite)s",
    "%(point)s",
    "%(name)s",
    "%(submit_num)s",
    "%(id)s",
    "%(message)s",
];

/// Whether a raw (unexpanded) template contains any substitution marker.
fn has_markers(template: &str) -> bool {
    MARKERS.iter().any(|marker| template.contains(marker))
}

/// A fully-expanded handler command, ready to hand to the process runner.
/// Distinct from `String` so a command already produced by
/// [`expand_template`] can't be fed back into it: expansion is a
/// setup-only step, run once per handler registration against the raw
/// configured template, never against a handler's own prior output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedCommand(pub String);

/// Expand a custom-handler command template at registration time,
/// shell-quoting each substituted value. Falls back to the classic
/// positional form `<handler> '<event>' '<suite>' '<id>' '<message>'`
/// when the raw template contains no substitution markers.
pub fn expand_template(template: &str, fields: &TemplateFields<'_>) -> ExpandedCommand {
    let out = if has_markers(template) {
        substitute(template, fields)
    } else {
        format!(
            "{} '{}' '{}' '{}' '{}'",
            template, fields.event, fields.suite, fields.id, fields.message
        )
    };
    ExpandedCommand(out)
}

fn substitute(template: &str, fields: &TemplateFields<'_>) -> String {
    let pairs: [(&str, Cow<'_, str>); 6] = [
        ("%(event)s", quote(fields.event)),
        ("%(suite)s", quote(fields.suite)),
        ("%(point)s", quote(fields.point)),
        ("%(name)s", quote(fields.name)),
        ("%(submit_num)s", Cow::Owned(fields.submit_num.to_string())),
        ("%(id)s", quote(fields.id)),
    ];
    let mut out = template.to_string();
    for (marker, value) in pairs {
        out = out.replace(marker, &value);
    }
    // "%(message)s" handled last since messages may themselves contain
    // text resembling other markers.
    out.replace("%(message)s", &quote(fields.message))
}

fn quote(value: &str) -> Cow<'_, str> {
    shell_words::quote(value)
}

/// Registry of all pending/in-flight event handlers for one task proxy.
#[derive(Debug, Default)]
pub struct EventHandlerRegistry {
    records: HashMap<HandlerKey, HandlerRecord>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, honoring de-duplication: if `key` already has
    /// a record, this is a no-op.
    pub fn register(&mut self, key: HandlerKey, command: String, delays: Vec<chrono::Duration>) {
        self.records
            .entry(key)
            .or_insert_with(|| HandlerRecord::new(command, delays));
    }

    pub fn get(&self, key: &HandlerKey) -> Option<&HandlerRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.records.contains_key(key)
    }

    /// Keys of every record due to fire right now.
    pub fn due_keys(&self, now: DateTime<Utc>) -> Vec<HandlerKey> {
        self.records
            .iter()
            .filter(|(_, record)| record.is_due(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn mark_waiting(&mut self, key: &HandlerKey, _now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(key) {
            record.attempted = true;
            // The delay for *this* attempt (if any) was already consumed
            // by the previous `complete(false, ..)` call; dispatch just
            // marks the attempt in flight.
            record.try_state.set_waiting();
        }
    }

    /// A handler's completion callback: ok removes the record; fail
    /// unsets waiting so the scheduler retries after the next delay.
    pub fn complete(&mut self, key: &HandlerKey, ok: bool, now: DateTime<Utc>) {
        if ok {
            self.records.remove(key);
            return;
        }
        if let Some(record) = self.records.get_mut(key) {
            record.try_state.unset_waiting();
            record.try_state.next(now);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn template_expansion_substitutes_and_quotes() {
        let fields = TemplateFields {
            event: "failed",
            suite: "demo",
            point: "1",
            name: "foo",
            submit_num: 2,
            id: "foo.1",
            message: "job failed",
        };
        let expanded = expand_template("notify.sh %(event)s %(message)s", &fields);
        assert_eq!(expanded.0, "notify.sh failed 'job failed'");
    }

    #[test]
    fn template_without_markers_falls_back_to_positional() {
        let fields = TemplateFields {
            event: "failed",
            suite: "demo",
            point: "1",
            name: "foo",
            submit_num: 2,
            id: "foo.1",
            message: "job failed",
        };
        let expanded = expand_template("plain-handler.sh", &fields);
        assert_eq!(expanded.0, "plain-handler.sh 'failed' 'demo' 'foo.1' 'job failed'");
    }

    #[test]
    fn expansion_is_deterministic_and_quotes_once() {
        // Expanding the same raw template twice must produce identical,
        // singly-quoted output -- no accumulation of quoting on repeat
        // expansion of the *template*, as distinct from re-expanding
        // already-expanded output (which expand_template's signature
        // doesn't allow: it always takes a raw template, never an
        // `ExpandedCommand`).
        let fields = TemplateFields {
            event: "failed",
            suite: "demo",
            point: "1",
            name: "foo",
            submit_num: 2,
            id: "foo.1",
            message: "job failed",
        };
        let first = expand_template("notify.sh %(event)s", &fields);
        let second = expand_template("notify.sh %(event)s", &fields);
        assert_eq!(first, second);
        assert_eq!(first.0, "notify.sh 'failed'");
    }

    #[test]
    fn dedup_keeps_first_registration() {
        let mut registry = EventHandlerRegistry::new();
        let key = HandlerKey {
            family: HandlerFamily::Mail,
            event: "failed".to_string(),
            submit_number: 1,
        };
        registry.register(key.clone(), "mail-a".to_string(), vec![]);
        registry.register(key.clone(), "mail-b".to_string(), vec![]);
        assert_eq!(registry.get(&key).unwrap().command, "mail-a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn complete_ok_removes_record() {
        let mut registry = EventHandlerRegistry::new();
        let key = HandlerKey {
            family: HandlerFamily::Mail,
            event: "failed".to_string(),
            submit_number: 1,
        };
        registry.register(key.clone(), "mail-a".to_string(), vec![]);
        registry.complete(&key, true, now());
        assert!(!registry.contains(&key));
    }

    #[test]
    fn complete_fail_unsets_waiting_for_retry() {
        let mut registry = EventHandlerRegistry::new();
        let key = HandlerKey {
            family: HandlerFamily::Mail,
            event: "failed".to_string(),
            submit_number: 1,
        };
        registry.register(key.clone(), "mail-a".to_string(), vec![chrono::Duration::seconds(0)]);
        registry.mark_waiting(&key, now());
        assert!(registry.get(&key).unwrap().try_state.is_waiting());
        registry.complete(&key, false, now());
        assert!(!registry.get(&key).unwrap().try_state.is_waiting());
    }

    #[test]
    fn fresh_record_is_due_immediately() {
        let mut registry = EventHandlerRegistry::new();
        let key = HandlerKey {
            family: HandlerFamily::JobLogsRetrieve,
            event: "succeeded".to_string(),
            submit_number: 1,
        };
        registry.register(key.clone(), "retrieve".to_string(), vec![]);
        assert_eq!(registry.due_keys(now()), vec![key]);
    }
}
