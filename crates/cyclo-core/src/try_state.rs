//! The retry ledger underlying submission and execution retries.
//!
//! A `TryState` tracks a delay schedule, which delay is currently armed,
//! and whether an attempt is in flight. It never rewinds: `index` only
//! moves forward, even once the delay schedule is exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry counter + delay schedule + waiting flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryState {
    /// The configured retry delays, in order.
    delays: Vec<chrono::Duration>,
    /// Index of the next delay to consume. Monotone non-decreasing.
    index: usize,
    /// The delay most recently armed by `next()`, if any.
    current_delay: Option<chrono::Duration>,
    /// Absolute wall-clock time the currently-armed retry fires at.
    /// Set iff a delay has been consumed and the retry has not yet fired.
    timeout: Option<DateTime<Utc>>,
    /// True only while an action attempt (submit, poll, kill...) is in
    /// flight for this try-state.
    waiting: bool,
}

impl TryState {
    pub fn new(delays: Vec<chrono::Duration>) -> Self {
        Self {
            delays,
            index: 0,
            current_delay: None,
            timeout: None,
            waiting: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn delay_count(&self) -> usize {
        self.delays.len()
    }

    pub fn timeout(&self) -> Option<DateTime<Utc>> {
        self.timeout
    }

    pub fn current_delay(&self) -> Option<chrono::Duration> {
        self.current_delay
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Whether any retry remains unconsumed.
    pub fn has_next(&self) -> bool {
        self.index < self.delays.len()
    }

    /// Consume the next delay and arm its timeout, returning it. A
    /// delay of zero is a valid, consumed retry: it does not skip.
    /// Returns `None` once all configured delays have been consumed.
    pub fn next(&mut self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if self.index >= self.delays.len() {
            return None;
        }
        let delay = self.delays[self.index];
        self.index += 1;
        self.current_delay = Some(delay);
        self.timeout = Some(now + delay);
        Some(delay)
    }

    /// True iff a timeout is armed and has elapsed.
    pub fn is_delay_done(&self, now: DateTime<Utc>) -> bool {
        matches!(self.timeout, Some(t) if now > t)
    }

    /// Mark an attempt in flight; clears the armed delay/timeout.
    pub fn set_waiting(&mut self) {
        self.waiting = true;
        self.current_delay = None;
        self.timeout = None;
    }

    /// Mark the in-flight attempt finished.
    pub fn unset_waiting(&mut self) {
        self.waiting = false;
    }

    /// Clear the armed timeout without consuming or rewinding the index
    /// (used by manual trigger, which forces a task ready regardless of
    /// any pending retry delay).
    pub fn clear_timeout(&mut self) {
        self.timeout = None;
        self.current_delay = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn next_never_rewinds_and_exhausts() {
        let mut ts = TryState::new(vec![Duration::seconds(0), Duration::seconds(10)]);
        assert_eq!(ts.next(now()), Some(Duration::seconds(0)));
        assert_eq!(ts.index(), 1);
        assert_eq!(ts.next(now()), Some(Duration::seconds(10)));
        assert_eq!(ts.index(), 2);
        assert_eq!(ts.next(now()), None);
        assert_eq!(ts.index(), 2, "index must not rewind past exhaustion");
    }

    #[test]
    fn zero_delay_is_consumed_not_skipped() {
        let mut ts = TryState::new(vec![Duration::seconds(0)]);
        let consumed = ts.next(now());
        assert_eq!(consumed, Some(Duration::seconds(0)));
        assert!(ts.timeout().is_some());
    }

    #[test]
    fn is_delay_done_requires_elapsed_timeout() {
        let mut ts = TryState::new(vec![Duration::seconds(10)]);
        ts.next(now());
        assert!(!ts.is_delay_done(now()));
        assert!(ts.is_delay_done(now() + Duration::seconds(11)));
    }

    #[test]
    fn set_waiting_clears_armed_delay() {
        let mut ts = TryState::new(vec![Duration::seconds(10)]);
        ts.next(now());
        assert!(ts.timeout().is_some());
        ts.set_waiting();
        assert!(ts.is_waiting());
        assert!(ts.timeout().is_none());
        assert!(ts.current_delay().is_none());
        ts.unset_waiting();
        assert!(!ts.is_waiting());
    }

    #[test]
    fn copying_preserves_index() {
        let mut ts = TryState::new(vec![Duration::seconds(0), Duration::seconds(0)]);
        ts.next(now());
        let copy = ts.clone();
        assert_eq!(copy.index(), ts.index());
    }
}
