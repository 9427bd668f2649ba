//! Occurrence windows: candidate starts + fixed duration + exception set.
//!
//! An occurrence is identified by its [`OccurrenceKey`], the start instant
//! truncated to the minute. Exception (cancelled) and notified sets are plain
//! [`OccurrenceSet`] values: functions here take them in and hand updated
//! copies back, and the caller persists the result.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EngineError;
use crate::recurrence;
use crate::temporal::{end_of_local_day, parse_rfc3339, same_local_day, truncate_to_minute};

// ── Occurrence keys ─────────────────────────────────────────────────────────

/// Canonical text form of an occurrence key.
pub const KEY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Older stores wrote keys with seconds.
const LEGACY_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Minute-resolution UTC start of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OccurrenceKey(DateTime<Utc>);

impl OccurrenceKey {
    pub fn from_start(start: DateTime<Utc>) -> Self {
        Self(truncate_to_minute(start))
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for OccurrenceKey {
    fn from(start: DateTime<Utc>) -> Self {
        Self::from_start(start)
    }
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(KEY_FORMAT))
    }
}

impl FromStr for OccurrenceKey {
    type Err = EngineError;

    /// Accepts `YYYY-MM-DD HH:MM`, `YYYY-MM-DD HH:MM:SS` and RFC 3339.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        for format in [KEY_FORMAT, LEGACY_KEY_FORMAT] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(Self::from_start(Utc.from_utc_datetime(&naive)));
            }
        }
        parse_rfc3339(trimmed)
            .map(Self::from_start)
            .map_err(|_| EngineError::InvalidDatetime(format!("'{}': not an occurrence key", s)))
    }
}

impl Serialize for OccurrenceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OccurrenceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A set of occurrence keys (cancelled or already-notified occurrences).
pub type OccurrenceSet = BTreeSet<OccurrenceKey>;

/// Add `key` to a copy of `set`.
pub fn cancel_occurrence(set: &OccurrenceSet, key: OccurrenceKey) -> OccurrenceSet {
    let mut updated = set.clone();
    updated.insert(key);
    updated
}

/// Remove `key` from a copy of `set`. Unknown keys are ignored.
pub fn uncancel_occurrence(set: &OccurrenceSet, key: OccurrenceKey) -> OccurrenceSet {
    let mut updated = set.clone();
    updated.remove(&key);
    updated
}

// ── Windows ─────────────────────────────────────────────────────────────────

/// One concrete occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cancelled: bool,
}

impl OccurrenceWindow {
    pub fn key(&self) -> OccurrenceKey {
        OccurrenceKey::from_start(self.start)
    }

    /// End time for display in `tz`.
    ///
    /// A window that crosses midnight in `tz` is shown ending at the last
    /// second of its start day. Display only: stored windows keep their real
    /// end.
    pub fn display_end(&self, tz: &Tz) -> DateTime<Utc> {
        if same_local_day(self.start, self.end, tz) {
            self.end
        } else {
            end_of_local_day(self.start, tz).max(self.start)
        }
    }
}

/// Candidate cap for [`WindowQuery::upcoming`].
pub const UPCOMING_SCAN_LIMIT: usize = 1000;

/// Bounds for a window expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowQuery {
    /// Earliest admissible start (inclusive). `None` starts at the anchor.
    pub horizon_start: Option<DateTime<Utc>>,
    /// Last admissible start (inclusive).
    pub horizon_end: DateTime<Utc>,
    /// Cap on candidate starts, applied before cancelled windows are dropped.
    pub limit: usize,
    pub include_cancelled: bool,
}

impl WindowQuery {
    pub fn new(horizon_end: DateTime<Utc>, limit: usize) -> Self {
        Self {
            horizon_start: None,
            horizon_end,
            limit,
            include_cancelled: false,
        }
    }

    /// Bounds for "what is the next occurrence" lookups: starts from `now`
    /// up to one year ahead.
    pub fn upcoming(now: DateTime<Utc>) -> Self {
        Self::new(now + Duration::days(366), UPCOMING_SCAN_LIMIT).starting_from(now)
    }

    /// Skip candidates before `from`. Skipped candidates do not count toward
    /// `limit`, so a series anchored far in the past still reaches `from`.
    pub fn starting_from(mut self, from: DateTime<Utc>) -> Self {
        self.horizon_start = Some(from);
        self
    }

    pub fn including_cancelled(mut self) -> Self {
        self.include_cancelled = true;
        self
    }
}

/// Expand `rule` from `anchor` into windows of length `duration`.
///
/// A window is `cancelled` when its key is in `exceptions`. With
/// `include_cancelled = false` those windows are dropped; the result is then
/// exactly the `include_cancelled = true` result minus the flagged entries.
/// An invalid rule produces no windows.
///
/// # Examples
///
/// ```
/// use chrono::Duration;
/// use staffing_engine::occurrence::{windows, OccurrenceKey, OccurrenceSet, WindowQuery};
/// use staffing_engine::temporal::parse_rfc3339;
///
/// let anchor = parse_rfc3339("2026-02-01T10:00:00Z").unwrap();
/// let horizon = parse_rfc3339("2026-12-31T00:00:00Z").unwrap();
/// let cancelled: OccurrenceKey = "2026-02-08 10:00".parse().unwrap();
/// let exceptions = OccurrenceSet::from([cancelled]);
///
/// let live = windows("FREQ=WEEKLY;COUNT=4", anchor, Duration::hours(2), &exceptions,
///     &WindowQuery::new(horizon, 100));
/// assert_eq!(live.len(), 3);
/// ```
pub fn windows(
    rule: &str,
    anchor: DateTime<Utc>,
    duration: Duration,
    exceptions: &OccurrenceSet,
    query: &WindowQuery,
) -> Vec<OccurrenceWindow> {
    let from = query.horizon_start.unwrap_or(anchor);
    recurrence::expand_from(rule, anchor, from, query.horizon_end, query.limit)
        .into_iter()
        .map(|start| OccurrenceWindow {
            start,
            end: start + duration,
            cancelled: exceptions.contains(&OccurrenceKey::from_start(start)),
        })
        .filter(|w| query.include_cancelled || !w.cancelled)
        .collect()
}

/// The first live window starting strictly after `now`.
///
/// Callers without a result fall back to the event's anchor start.
pub fn next_future_occurrence(
    windows: &[OccurrenceWindow],
    now: DateTime<Utc>,
) -> Option<&OccurrenceWindow> {
    windows.iter().find(|w| !w.cancelled && w.start > now)
}

/// Where `now` sits relative to an ordered run of windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionStatus {
    /// Latest live window that has already ended.
    pub last_completed: Option<OccurrenceWindow>,
    /// First live window that has not ended yet (it may be in progress).
    pub next: Option<OccurrenceWindow>,
}

impl CompletionStatus {
    /// Time since the last completed window ended.
    pub fn elapsed_since_completion(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_completed.map(|w| now - w.end)
    }
}

/// Split `windows` (ascending) around `now`. Cancelled windows are skipped.
pub fn completion_status(windows: &[OccurrenceWindow], now: DateTime<Utc>) -> CompletionStatus {
    let mut status = CompletionStatus::default();
    for window in windows.iter().filter(|w| !w.cancelled) {
        if window.end < now {
            status.last_completed = Some(*window);
        } else {
            status.next = Some(*window);
            break;
        }
    }
    status
}

// ── Tests ───────────────────────────────────────────────────────────────────
