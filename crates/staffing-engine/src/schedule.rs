//! Pure decisions behind the two periodic tasks.
//!
//! The scheduler asks these functions *what* to do for one event at a given
//! `now`; sending reminders, clearing positions and persisting markers is the
//! caller's job.

use chrono::{DateTime, Duration, Months, Utc};

use crate::event::Event;
use crate::occurrence::{completion_status, OccurrenceKey, OccurrenceSet, OccurrenceWindow, WindowQuery};

// ── Pre-event reminder ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderPolicy {
    /// How long before the start the reminder goes out.
    pub lead: Duration,
    /// Tolerance either side of `now + lead`.
    pub buffer: Duration,
    /// Expansion horizon, measured from `now`.
    pub lookahead: Duration,
    /// Candidate cap, counted from the start of the reminder band.
    pub scan_limit: usize,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            lead: Duration::hours(2),
            buffer: Duration::minutes(5),
            lookahead: Duration::days(7),
            scan_limit: 50,
        }
    }
}

/// Occurrences of `event` due a reminder at `now`.
///
/// A live window qualifies when its start is within
/// `[now + lead - buffer, now + lead + buffer]` and its key is not yet in the
/// event's notified set.
pub fn reminder_candidates(event: &Event, now: DateTime<Utc>, policy: &ReminderPolicy) -> Vec<OccurrenceWindow> {
    let target = now + policy.lead;
    let (from, to) = (target - policy.buffer, target + policy.buffer);
    let query = WindowQuery::new(now + policy.lookahead, policy.scan_limit).starting_from(from);

    event
        .windows(&query)
        .into_iter()
        .filter(|w| !w.cancelled)
        .filter(|w| w.start >= from && w.start <= to)
        .filter(|w| !event.notified.contains(&w.key()))
        .collect()
}

/// Copy of `notified` with `key` added.
pub fn record_notified(notified: &OccurrenceSet, key: OccurrenceKey) -> OccurrenceSet {
    let mut updated = notified.clone();
    updated.insert(key);
    updated
}

// ── Post-occurrence reset ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    /// A completed occurrence must have ended at least this long ago...
    pub min_elapsed: Duration,
    /// ...and at most this long ago.
    pub max_elapsed: Duration,
    pub horizon_months: u32,
    /// Candidate cap, counted from the oldest start still inside the band.
    pub scan_limit: usize,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            min_elapsed: Duration::hours(1),
            max_elapsed: Duration::hours(24),
            horizon_months: 3,
            scan_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDecision {
    NotRecurring,
    NothingCompleted,
    NoNextOccurrence,
    OutsideBand { elapsed: Duration },
    Reset {
        completed: OccurrenceWindow,
        next: OccurrenceWindow,
    },
}

impl ResetDecision {
    pub fn should_reset(&self) -> bool {
        matches!(self, Self::Reset { .. })
    }
}

/// Whether `event`'s positions should be cleared at `now`.
///
/// Resets only recurring events whose last completed occurrence ended within
/// the policy band and which still have an occurrence ahead.
pub fn reset_decision(event: &Event, now: DateTime<Utc>, policy: &ResetPolicy) -> ResetDecision {
    if !event.is_recurring() {
        return ResetDecision::NotRecurring;
    }

    let horizon = now
        .checked_add_months(Months::new(policy.horizon_months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    // Older windows cannot fall inside the band
    let from = now - policy.max_elapsed - event.duration();
    let windows = event.windows(&WindowQuery::new(horizon, policy.scan_limit).starting_from(from));
    let status = completion_status(&windows, now);

    let (Some(completed), elapsed) = (status.last_completed, status.elapsed_since_completion(now)) else {
        return ResetDecision::NothingCompleted;
    };
    let Some(next) = status.next else {
        return ResetDecision::NoNextOccurrence;
    };

    match elapsed {
        Some(elapsed) if elapsed >= policy.min_elapsed && elapsed <= policy.max_elapsed => {
            ResetDecision::Reset { completed, next }
        }
        Some(elapsed) => ResetDecision::OutsideBand { elapsed },
        None => ResetDecision::NothingCompleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::EventId;
    use crate::temporal::parse_rfc3339;

    fn utc(s: &str) -> DateTime<Utc> {
        parse_rfc3339(s).unwrap()
    }

    fn weekly() -> Event {
        Event::new(
            EventId(1),
            "Sunday Ops",
            utc("2026-02-01T10:00:00Z"),
            utc("2026-02-01T12:00:00Z"),
        )
        .with_rule("FREQ=WEEKLY;COUNT=4")
    }

    // ── reminders ───────────────────────────────────────────────────────

    #[test]
    fn test_reminder_inside_buffer() {
        let event = weekly();
        let policy = ReminderPolicy::default();

        let due = reminder_candidates(&event, utc("2026-02-08T08:03:00Z"), &policy);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].start, utc("2026-02-08T10:00:00Z"));

        // Edges are inclusive
        assert_eq!(reminder_candidates(&event, utc("2026-02-08T07:55:00Z"), &policy).len(), 1);
        assert_eq!(reminder_candidates(&event, utc("2026-02-08T08:05:00Z"), &policy).len(), 1);
        assert!(reminder_candidates(&event, utc("2026-02-08T08:06:00Z"), &policy).is_empty());
        assert!(reminder_candidates(&event, utc("2026-02-08T07:00:00Z"), &policy).is_empty());
    }

    #[test]
    fn test_reminder_skips_notified_and_cancelled() {
        let mut event = weekly();
        let now = utc("2026-02-08T08:00:00Z");
        let key = OccurrenceKey::from_start(utc("2026-02-08T10:00:00Z"));

        event.notified = record_notified(&event.notified, key);
        assert!(reminder_candidates(&event, now, &ReminderPolicy::default()).is_empty());

        let mut event = weekly();
        event.cancelled.insert(key);
        assert!(reminder_candidates(&event, now, &ReminderPolicy::default()).is_empty());
    }

    #[test]
    fn test_reminder_for_single_event() {
        let event = Event::new(
            EventId(2),
            "Fly-in",
            utc("2026-03-01T12:00:00Z"),
            utc("2026-03-01T16:00:00Z"),
        );
        let due = reminder_candidates(&event, utc("2026-03-01T10:00:00Z"), &ReminderPolicy::default());
        assert_eq!(due, vec![event.anchor_window()]);
    }

    // ── reset ───────────────────────────────────────────────────────────

    #[test]
    fn test_reset_two_hours_after_completion() {
        // Feb 8 occurrence ended 12:00; next is Feb 15
        let decision = reset_decision(&weekly(), utc("2026-02-08T14:00:00Z"), &ResetPolicy::default());
        match decision {
            ResetDecision::Reset { completed, next } => {
                assert_eq!(completed.end, utc("2026-02-08T12:00:00Z"));
                assert_eq!(next.start, utc("2026-02-15T10:00:00Z"));
            }
            other => panic!("expected reset, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_band_edges() {
        let policy = ResetPolicy::default();
        let event = weekly();
        assert!(reset_decision(&event, utc("2026-02-08T13:00:00Z"), &policy).should_reset());
        assert!(reset_decision(&event, utc("2026-02-09T12:00:00Z"), &policy).should_reset());
        assert_eq!(
            reset_decision(&event, utc("2026-02-08T12:30:00Z"), &policy),
            ResetDecision::OutsideBand {
                elapsed: Duration::minutes(30)
            }
        );
        assert!(!reset_decision(&event, utc("2026-02-09T12:01:00Z"), &policy).should_reset());
    }

    #[test]
    fn test_reset_requires_next_occurrence() {
        // Last occurrence (Feb 22) ended 2h ago
        let decision = reset_decision(&weekly(), utc("2026-02-22T14:00:00Z"), &ResetPolicy::default());
        assert_eq!(decision, ResetDecision::NoNextOccurrence);
    }

    #[test]
    fn test_reset_ignores_single_events() {
        let mut event = weekly();
        event.recurrence_rule = None;
        assert_eq!(
            reset_decision(&event, utc("2026-02-01T14:00:00Z"), &ResetPolicy::default()),
            ResetDecision::NotRecurring
        );
    }

    #[test]
    fn test_reset_before_first_occurrence() {
        assert_eq!(
            reset_decision(&weekly(), utc("2026-01-20T00:00:00Z"), &ResetPolicy::default()),
            ResetDecision::NothingCompleted
        );
    }

    #[test]
    fn test_reminder_for_old_daily_series() {
        let event = Event::new(
            EventId(4),
            "Daily",
            utc("2026-01-01T10:00:00Z"),
            utc("2026-01-01T11:00:00Z"),
        )
        .with_rule("FREQ=DAILY");

        let due = reminder_candidates(&event, utc("2026-03-01T08:00:00Z"), &ReminderPolicy::default());
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].start, utc("2026-03-01T10:00:00Z"));
    }

    #[test]
    fn test_reset_series_past_scan_limit() {
        // More than `scan_limit` occurrences have elapsed since the anchor
        let event = Event::new(
            EventId(5),
            "Daily",
            utc("2026-01-01T10:00:00Z"),
            utc("2026-01-01T11:00:00Z"),
        )
        .with_rule("FREQ=DAILY");

        match reset_decision(&event, utc("2027-06-01T12:00:00Z"), &ResetPolicy::default()) {
            ResetDecision::Reset { completed, next } => {
                assert_eq!(completed.end, utc("2027-06-01T11:00:00Z"));
                assert_eq!(next.start, utc("2027-06-02T10:00:00Z"));
            }
            other => panic!("expected reset, got {other:?}"),
        }
    }

    #[test]
    fn test_reset_long_running_series() {
        // Anchor a year back: the scan limit must reach past the completed window.
        let event = Event::new(
            EventId(3),
            "Daily",
            utc("2025-02-01T10:00:00Z"),
            utc("2025-02-01T11:00:00Z"),
        )
        .with_rule("FREQ=DAILY");
        assert!(reset_decision(&event, utc("2026-02-01T13:00:00Z"), &ResetPolicy::default()).should_reset());
    }
}
