//! Cycle points: the totally ordered value a task instance recurs at.
//!
//! Requires strict ordering and exact equality across two concrete
//! representations (datetime or integer). Sequences generate points; the
//! core treats them as opaque, pure value types invoked with a point.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A recurring instant at which a task can run.
///
/// Ordering and equality are only meaningful within one variant; comparing
/// a `DateTime` point against an `Integer` point is a logic error on the
/// caller's part (mixed-representation suites do not occur in practice --
/// one suite's sequences are uniformly datetime- or integer-cycled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
pub enum CyclePoint {
    DateTime(DateTime<Utc>),
    Integer(i64),
}

impl CyclePoint {
    /// The point expressed as seconds, for arithmetic against offsets in
    /// clock-trigger and expiration calculations.
    pub fn as_seconds(&self) -> i64 {
        match self {
            CyclePoint::DateTime(dt) => dt.timestamp(),
            CyclePoint::Integer(n) => *n,
        }
    }

    /// Apply an offset, producing a new point in the same representation.
    ///
    /// Mixing a `Duration` offset against an `Integer` point (or vice
    /// versa) is a configuration error the caller should have rejected
    /// at `set_from_rtconfig` time; here it saturates rather than panics.
    pub fn add_offset(&self, offset: CycleOffset) -> CyclePoint {
        match (self, offset) {
            (CyclePoint::DateTime(dt), CycleOffset::Duration(d)) => {
                CyclePoint::DateTime(*dt + d)
            }
            (CyclePoint::Integer(n), CycleOffset::Integer(i)) => CyclePoint::Integer(n + i),
            (CyclePoint::DateTime(dt), CycleOffset::Integer(i)) => {
                CyclePoint::DateTime(*dt + Duration::seconds(i))
            }
            (CyclePoint::Integer(n), CycleOffset::Duration(d)) => {
                CyclePoint::Integer(n + d.num_seconds())
            }
        }
    }

    pub fn is_datetime(&self) -> bool {
        matches!(self, CyclePoint::DateTime(_))
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePoint::DateTime(dt) => write!(f, "{}", dt.format("%Y%m%dT%H%M%SZ")),
            CyclePoint::Integer(n) => write!(f, "{n}"),
        }
    }
}

/// An offset applied to a cycle point: an ISO-8601-style duration for
/// datetime cycling, or a plain integer step for integer cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOffset {
    Duration(Duration),
    Integer(i64),
}

impl CycleOffset {
    pub fn zero_for(point: &CyclePoint) -> CycleOffset {
        match point {
            CyclePoint::DateTime(_) => CycleOffset::Duration(Duration::zero()),
            CyclePoint::Integer(_) => CycleOffset::Integer(0),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            CycleOffset::Duration(d) => d.is_zero(),
            CycleOffset::Integer(i) => *i == 0,
        }
    }
}

/// A pure, stateless point generator. Implementations hold only their own
/// start/step/end configuration; they never reference a task proxy or
/// suite config (the cyclic-reference break called for by DESIGN NOTES).
pub trait Sequence: Send + Sync + fmt::Debug {
    /// Does `point` land on this sequence?
    fn is_valid(&self, point: &CyclePoint) -> bool;

    /// The next point on this sequence strictly after `after`, or `None`
    /// if the sequence is bounded and exhausted.
    fn next_point(&self, after: &CyclePoint) -> Option<CyclePoint>;
}

/// A datetime sequence: `start + n * step`, optionally bounded by `end`.
#[derive(Debug, Clone)]
pub struct DateTimeSequence {
    pub start: DateTime<Utc>,
    pub step: Duration,
    pub end: Option<DateTime<Utc>>,
}

impl Sequence for DateTimeSequence {
    fn is_valid(&self, point: &CyclePoint) -> bool {
        let CyclePoint::DateTime(dt) = point else {
            return false;
        };
        if *dt < self.start {
            return false;
        }
        if self.step.is_zero() {
            return *dt == self.start;
        }
        let elapsed = (*dt - self.start).num_seconds();
        let step_secs = self.step.num_seconds();
        elapsed % step_secs == 0
    }

    fn next_point(&self, after: &CyclePoint) -> Option<CyclePoint> {
        let CyclePoint::DateTime(dt) = after else {
            return None;
        };
        if self.step.is_zero() {
            return None;
        }
        let mut candidate = if *dt < self.start {
            self.start
        } else {
            let elapsed = (*dt - self.start).num_seconds();
            let step_secs = self.step.num_seconds();
            let n = elapsed / step_secs + 1;
            self.start + self.step * (n as i32)
        };
        if candidate <= *dt {
            candidate = candidate + self.step;
        }
        if let Some(end) = self.end {
            if candidate > end {
                return None;
            }
        }
        Some(CyclePoint::DateTime(candidate))
    }
}

/// An integer sequence: `start + n * step`, optionally bounded by `end`.
#[derive(Debug, Clone)]
pub struct IntegerSequence {
    pub start: i64,
    pub step: i64,
    pub end: Option<i64>,
}

impl Sequence for IntegerSequence {
    fn is_valid(&self, point: &CyclePoint) -> bool {
        let CyclePoint::Integer(n) = point else {
            return false;
        };
        if *n < self.start || self.step == 0 {
            return *n == self.start;
        }
        (*n - self.start) % self.step == 0
    }

    fn next_point(&self, after: &CyclePoint) -> Option<CyclePoint> {
        let CyclePoint::Integer(n) = after else {
            return None;
        };
        if self.step == 0 {
            return None;
        }
        let candidate = if *n < self.start {
            self.start
        } else {
            let k = (*n - self.start) / self.step + 1;
            self.start + self.step * k
        };
        if let Some(end) = self.end {
            if candidate > end {
                return None;
            }
        }
        Some(CyclePoint::Integer(candidate))
    }
}

/// The next point of the minimum of a set of sequences: the successor
/// receives the earliest next point any sequence yields, or `None` if
/// none of them yield one.
pub fn min_next_point(
    sequences: &[Box<dyn Sequence>],
    after: &CyclePoint,
) -> Option<CyclePoint> {
    sequences
        .iter()
        .filter_map(|seq| seq.next_point(after))
        .min()
}
