//! Time helpers shared by the evaluator, the window builder and the
//! notification layer.
//!
//! All functions take explicit inputs (no system clock access). Callers pass
//! "now" when they need it, which keeps the scheduling decisions in this
//! crate deterministic and testable.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::EngineError;

/// Compact UTC form used inside RRULE text (`DTSTART`, `UNTIL`).
const RRULE_UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Parse an RFC 3339 datetime string into `DateTime<Utc>`.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidDatetime(format!("'{}': {}", s, e)))
}

/// Parse an IANA timezone string into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz, EngineError> {
    s.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(format!("'{}'", s)))
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0)
        .and_then(|d| d.with_second(0))
        .unwrap_or(dt)
}

/// Drop sub-second precision. RRULE text has whole-second resolution.
pub fn truncate_to_second(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Format an instant the way RRULE text expects (`20260201T100000Z`).
pub fn format_rrule_utc(dt: DateTime<Utc>) -> String {
    dt.format(RRULE_UTC_FORMAT).to_string()
}

/// Parse an RRULE `UNTIL` value.
///
/// Accepts `YYYYMMDDTHHMMSSZ`, the floating `YYYYMMDDTHHMMSS` (read as UTC)
/// and a bare `YYYYMMDD`, which bounds the rule at the last second of that
/// day.
pub fn parse_rrule_datetime(s: &str) -> Result<DateTime<Utc>, EngineError> {
    let trimmed = s.trim();
    let floating = trimmed.strip_suffix('Z').unwrap_or(trimmed);

    if let Ok(naive) = NaiveDateTime::parse_from_str(floating, "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    NaiveDate::parse_from_str(floating, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| EngineError::InvalidDatetime(format!("'{}': not an RRULE date", s)))
}

/// Place a UTC time-of-day on a UTC calendar date.
pub fn on_date(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Whether two instants fall on the same calendar day in `tz`.
pub fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>, tz: &Tz) -> bool {
    a.with_timezone(tz).date_naive() == b.with_timezone(tz).date_naive()
}

/// The last second of the calendar day containing `dt` in `tz`, as UTC.
///
/// Falls back to `dt` itself if the local end of day does not exist (a DST
/// gap at 23:59:59 is not known to occur in any zone, but the conversion is
/// fallible).
pub fn end_of_local_day(dt: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
    let local_date = dt.with_timezone(tz).date_naive();
    local_date
        .and_hms_opt(23, 59, 59)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(dt)
}

/// Human-readable form of a lead time or duration ("2 hours",
/// "1 hour, 30 minutes"). Seconds are ignored.
pub fn format_human_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes().unsigned_abs();
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{} day{}", days, if days == 1 { "" } else { "s" }));
    }
    if hours > 0 {
        parts.push(format!(
            "{} hour{}",
            hours,
            if hours == 1 { "" } else { "s" }
        ));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!(
            "{} minute{}",
            minutes,
            if minutes == 1 { "" } else { "s" }
        ));
    }
    parts.join(", ")
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        parse_rfc3339(s).unwrap()
    }

    #[test]
    fn test_parse_rfc3339_normalizes_offset() {
        let dt = utc("2026-02-01T11:00:00+01:00");
        assert_eq!(dt, utc("2026-02-01T10:00:00Z"));
    }

    #[test]
    fn test_parse_rfc3339_invalid() {
        let err = parse_rfc3339("yesterday-ish").unwrap_err().to_string();
        assert!(err.contains("Invalid datetime"), "got: {err}");
    }

    #[test]
    fn test_parse_timezone_invalid() {
        let err = parse_timezone("Mars/Olympus").unwrap_err().to_string();
        assert!(err.contains("Invalid timezone"), "got: {err}");
    }

    #[test]
    fn test_truncate_to_minute() {
        let dt = utc("2026-02-01T10:00:42.123Z");
        assert_eq!(truncate_to_minute(dt), utc("2026-02-01T10:00:00Z"));
    }

    #[test]
    fn test_rrule_datetime_forms() {
        assert_eq!(
            parse_rrule_datetime("20260301T120000Z").unwrap(),
            utc("2026-03-01T12:00:00Z")
        );
        assert_eq!(
            parse_rrule_datetime("20260301T120000").unwrap(),
            utc("2026-03-01T12:00:00Z")
        );
        assert_eq!(
            parse_rrule_datetime("20260301").unwrap(),
            utc("2026-03-01T23:59:59Z")
        );
        assert!(parse_rrule_datetime("2026-03-01").is_err());
    }

    #[test]
    fn test_format_rrule_utc() {
        assert_eq!(
            format_rrule_utc(utc("2026-02-01T10:00:00Z")),
            "20260201T100000Z"
        );
    }

    #[test]
    fn test_end_of_local_day_in_oslo() {
        let tz = parse_timezone("Europe/Oslo").unwrap();
        // 20:00 UTC on Feb 1 is 21:00 in Oslo (UTC+1); the day ends 22:59:59 UTC.
        let end = end_of_local_day(utc("2026-02-01T20:00:00Z"), &tz);
        assert_eq!(end, utc("2026-02-01T22:59:59Z"));
    }

    #[test]
    fn test_same_local_day_depends_on_zone() {
        let a = utc("2026-02-01T22:30:00Z");
        let b = utc("2026-02-01T23:30:00Z");
        assert!(same_local_day(a, b, &Tz::UTC));
        let oslo = parse_timezone("Europe/Oslo").unwrap();
        // 23:30 Oslo vs 00:30 Oslo the next day
        assert!(!same_local_day(a, b, &oslo));
    }

    #[test]
    fn test_format_human_duration() {
        assert_eq!(format_human_duration(Duration::hours(2)), "2 hours");
        assert_eq!(
            format_human_duration(Duration::minutes(90)),
            "1 hour, 30 minutes"
        );
        assert_eq!(format_human_duration(Duration::days(1)), "1 day");
        assert_eq!(format_human_duration(Duration::seconds(10)), "0 minutes");
    }
}
