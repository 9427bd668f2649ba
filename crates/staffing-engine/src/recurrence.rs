//! Recurrence rule evaluation: RRULE text → ordered occurrence starts.
//!
//! Rule text is parsed into a [`RecurrenceRule`] first. Parsing is where
//! malformed or unsupported rules are rejected, and the parsed rule prints
//! back as canonical RRULE text. Expansion hands the canonical text to the
//! `rrule` crate with the event's anchor as `DTSTART`.
//!
//! # Supported rule parts
//!
//! - `FREQ`: `DAILY`, `WEEKLY`, `MONTHLY`, `YEARLY` (required)
//! - `INTERVAL`: positive multiplier of the frequency
//! - `COUNT` / `UNTIL`: termination (mutually exclusive)
//! - `BYDAY`: weekday codes; ordinals (`1MO`, `-1FR`) for monthly and yearly rules
//! - `BYMONTHDAY`, `BYMONTH`
//!
//! # Functions
//!
//! - [`validate`]: Is the rule text acceptable?
//! - [`expand`]: Candidate starts, failing closed to an empty list
//! - [`describe`]: Human-readable sentence for a rule

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::temporal::{format_rrule_utc, parse_rrule_datetime, truncate_to_second};

/// Default cap on the number of candidates produced by one expansion.
pub const DEFAULT_EXPANSION_LIMIT: usize = 100;

// ── Rule model ──────────────────────────────────────────────────────────────

/// Base frequency of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "DAILY" => Some(Self::Daily),
            "WEEKLY" => Some(Self::Weekly),
            "MONTHLY" => Some(Self::Monthly),
            "YEARLY" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }

    fn unit(&self) -> &'static str {
        match self {
            Self::Daily => "day",
            Self::Weekly => "week",
            Self::Monthly => "month",
            Self::Yearly => "year",
        }
    }
}

/// One `BYDAY` entry, e.g. `MO` or `-1FR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByDay {
    /// Nth occurrence within the month/year (negative counts from the end).
    pub ordinal: Option<i8>,
    pub weekday: Weekday,
}

impl ByDay {
    pub fn every(weekday: Weekday) -> Self {
        Self {
            ordinal: None,
            weekday,
        }
    }
}

impl fmt::Display for ByDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.ordinal {
            write!(f, "{n}")?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

/// A parsed, validated recurrence rule.
///
/// `Display` produces canonical RRULE text (without the `RRULE:` prefix),
/// so rules assembled in code serialize the same way parsed ones do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub by_day: Vec<ByDay>,
    pub by_month_day: Vec<i8>,
    pub by_month: Vec<u8>,
}

impl RecurrenceRule {
    /// A rule repeating every period of `frequency`, forever.
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Terminate after `count` occurrences. Clears any `UNTIL` bound.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self.until = None;
        self
    }

    /// Terminate at `until` (inclusive). Clears any `COUNT` bound.
    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self.count = None;
        self
    }

    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.by_day = weekdays.into_iter().map(ByDay::every).collect();
        self
    }

    /// Expand the rule from `anchor` forward.
    ///
    /// Stops at whichever comes first: `limit` candidates, the rule's own
    /// `COUNT`/`UNTIL`, or the first candidate after `horizon_end`. The
    /// result is strictly ascending.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRule`] if the `rrule` crate rejects the
    /// rule together with this anchor (for example an `UNTIL` before it).
    pub fn expand(
        &self,
        anchor: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        self.expand_from(anchor, anchor, horizon_end, limit)
    }

    /// Like [`expand`](Self::expand), but candidates before `from` are
    /// skipped and do not count toward `limit`. `COUNT` still counts from
    /// the anchor.
    ///
    /// # Errors
    ///
    /// Same as [`expand`](Self::expand).
    pub fn expand_from(
        &self,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let anchor = truncate_to_second(anchor);
        let from = from.max(anchor);
        if limit == 0 || horizon_end < from {
            return Ok(Vec::new());
        }

        let set = self.to_rrule_set(anchor)?;
        let mut starts: Vec<DateTime<Utc>> = Vec::new();

        for candidate in &set {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > horizon_end {
                break;
            }
            if candidate < from {
                continue;
            }
            if starts.last().is_some_and(|last| *last >= candidate) {
                continue;
            }
            starts.push(candidate);
            if starts.len() >= limit {
                break;
            }
        }

        Ok(starts)
    }

    /// Human-readable sentence, e.g. "Every 2 weeks on Monday and Friday, 4 times".
    pub fn describe(&self) -> String {
        let mut text = if self.interval <= 1 {
            format!("Every {}", self.frequency.unit())
        } else {
            format!("Every {} {}s", self.interval, self.frequency.unit())
        };

        if !self.by_day.is_empty() {
            let days: Vec<String> = self.by_day.iter().map(describe_by_day).collect();
            text.push_str(" on ");
            text.push_str(&join_words(&days));
        }

        if !self.by_month_day.is_empty() {
            let days: Vec<String> = self.by_month_day.iter().map(|d| d.to_string()).collect();
            text.push_str(" on day ");
            text.push_str(&join_words(&days));
            text.push_str(" of the month");
        }

        if !self.by_month.is_empty() {
            let months: Vec<String> = self
                .by_month
                .iter()
                .map(|m| month_name(*m).to_string())
                .collect();
            text.push_str(" in ");
            text.push_str(&join_words(&months));
        }

        if let Some(count) = self.count {
            if count == 1 {
                text.push_str(", once");
            } else {
                text.push_str(&format!(", {count} times"));
            }
        } else if let Some(until) = self.until {
            text.push_str(&format!(", until {}", until.format("%B %-d, %Y")));
        }

        text
    }

    fn to_rrule_set(&self, anchor: DateTime<Utc>) -> Result<RRuleSet> {
        let text = format!("DTSTART:{}\nRRULE:{}", format_rrule_utc(anchor), self);
        text.parse::<RRuleSet>()
            .map_err(|e| EngineError::InvalidRule(format!("'{}': {}", self, e)))
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={}", self.frequency.as_str())?;
        if self.interval > 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", format_rrule_utc(until))?;
        }
        if !self.by_day.is_empty() {
            let days: Vec<String> = self.by_day.iter().map(ToString::to_string).collect();
            write!(f, ";BYDAY={}", days.join(","))?;
        }
        if !self.by_month_day.is_empty() {
            let days: Vec<String> = self.by_month_day.iter().map(ToString::to_string).collect();
            write!(f, ";BYMONTHDAY={}", days.join(","))?;
        }
        if !self.by_month.is_empty() {
            let months: Vec<String> = self.by_month.iter().map(ToString::to_string).collect();
            write!(f, ";BYMONTH={}", months.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for RecurrenceRule {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let body = s.trim();
        let body = body
            .strip_prefix("RRULE:")
            .or_else(|| body.strip_prefix("rrule:"))
            .unwrap_or(body);
        if body.is_empty() {
            return Err(EngineError::InvalidRule("empty rule".to_string()));
        }

        let mut frequency = None;
        let mut interval = None;
        let mut count = None;
        let mut until = None;
        let mut by_day = None;
        let mut by_month_day = None;
        let mut by_month = None;

        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(s, format!("expected KEY=VALUE, got '{part}'")))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim().to_ascii_uppercase();

            let duplicate = match key.as_str() {
                "FREQ" => frequency
                    .replace(
                        Frequency::parse(&value)
                            .ok_or_else(|| invalid(s, format!("unsupported FREQ '{value}'")))?,
                    )
                    .is_some(),
                "INTERVAL" => interval
                    .replace(parse_positive(s, "INTERVAL", &value)?)
                    .is_some(),
                "COUNT" => count.replace(parse_positive(s, "COUNT", &value)?).is_some(),
                "UNTIL" => until
                    .replace(parse_rrule_datetime(&value).map_err(|e| invalid(s, e.to_string()))?)
                    .is_some(),
                "BYDAY" => by_day.replace(parse_by_day_list(s, &value)?).is_some(),
                "BYMONTHDAY" => by_month_day
                    .replace(parse_list(s, "BYMONTHDAY", &value, |d: i8| {
                        d != 0 && (-31..=31).contains(&d)
                    })?)
                    .is_some(),
                "BYMONTH" => by_month
                    .replace(parse_list(s, "BYMONTH", &value, |m: u8| {
                        (1..=12).contains(&m)
                    })?)
                    .is_some(),
                other => return Err(invalid(s, format!("unsupported rule part '{other}'"))),
            };
            if duplicate {
                return Err(invalid(s, format!("{key} given more than once")));
            }
        }

        let frequency = frequency.ok_or_else(|| invalid(s, "missing FREQ".to_string()))?;
        if count.is_some() && until.is_some() {
            return Err(invalid(s, "COUNT and UNTIL are mutually exclusive".to_string()));
        }

        let by_day: Vec<ByDay> = by_day.unwrap_or_default();
        let ordinal_allowed = matches!(frequency, Frequency::Monthly | Frequency::Yearly);
        if !ordinal_allowed && by_day.iter().any(|d| d.ordinal.is_some()) {
            return Err(invalid(
                s,
                format!("ordinal BYDAY is not allowed with FREQ={}", frequency.as_str()),
            ));
        }

        Ok(Self {
            frequency,
            interval: interval.unwrap_or(1),
            count,
            until,
            by_day,
            by_month_day: by_month_day.unwrap_or_default(),
            by_month: by_month.unwrap_or_default(),
        })
    }
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Whether `rule` is acceptable rule text.
///
/// Callers must validate a rule before storing it; [`expand`] assumes a
/// validated rule and degrades to an empty result otherwise.
pub fn validate(rule: &str) -> bool {
    rule.parse::<RecurrenceRule>().is_ok()
}

/// Expand `rule` from `anchor` into at most `limit` candidate starts, none
/// after `horizon_end`.
///
/// Invalid input yields an empty sequence rather than an error: callers
/// already treat "no instances" as a legitimate degenerate case.
///
/// # Examples
///
/// ```
/// use staffing_engine::recurrence::expand;
/// use staffing_engine::temporal::parse_rfc3339;
///
/// let anchor = parse_rfc3339("2026-02-01T10:00:00Z").unwrap();
/// let horizon = parse_rfc3339("2026-12-31T00:00:00Z").unwrap();
/// let starts = expand("FREQ=WEEKLY;COUNT=4", anchor, horizon, 100);
/// assert_eq!(starts.len(), 4);
/// assert!(expand("FREQ=SOMETIMES", anchor, horizon, 100).is_empty());
/// ```
pub fn expand(
    rule: &str,
    anchor: DateTime<Utc>,
    horizon_end: DateTime<Utc>,
    limit: usize,
) -> Vec<DateTime<Utc>> {
    rule.parse::<RecurrenceRule>()
        .and_then(|parsed| parsed.expand(anchor, horizon_end, limit))
        .unwrap_or_default()
}

/// [`expand`], restricted to candidates at or after `from`.
pub fn expand_from(
    rule: &str,
    anchor: DateTime<Utc>,
    from: DateTime<Utc>,
    horizon_end: DateTime<Utc>,
    limit: usize,
) -> Vec<DateTime<Utc>> {
    rule.parse::<RecurrenceRule>()
        .and_then(|parsed| parsed.expand_from(anchor, from, horizon_end, limit))
        .unwrap_or_default()
}

/// Human-readable description of `rule`, or "Invalid recurrence rule".
pub fn describe(rule: &str) -> String {
    rule.parse::<RecurrenceRule>()
        .map(|parsed| parsed.describe())
        .unwrap_or_else(|_| "Invalid recurrence rule".to_string())
}

// ── Internal helpers ────────────────────────────────────────────────────────

fn invalid(rule: &str, reason: String) -> EngineError {
    EngineError::InvalidRule(format!("'{}': {}", rule.trim(), reason))
}

fn parse_positive(rule: &str, key: &str, value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(invalid(
            rule,
            format!("{key} must be a positive integer, got '{value}'"),
        )),
    }
}

fn parse_list<T: FromStr>(
    rule: &str,
    key: &str,
    value: &str,
    accept: impl Fn(T) -> bool,
) -> Result<Vec<T>>
where
    T: Copy,
{
    value
        .split(',')
        .map(|item| {
            item.trim()
                .parse::<T>()
                .ok()
                .filter(|n| accept(*n))
                .ok_or_else(|| invalid(rule, format!("bad {key} value '{item}'")))
        })
        .collect()
}

fn parse_by_day_list(rule: &str, value: &str) -> Result<Vec<ByDay>> {
    value
        .split(',')
        .map(|item| parse_by_day(item.trim()).ok_or_else(|| invalid(rule, format!("bad BYDAY value '{item}'"))))
        .collect()
}

fn parse_by_day(item: &str) -> Option<ByDay> {
    let split = item.len().checked_sub(2)?;
    let (prefix, code) = (item.get(..split)?, item.get(split..)?);
    let weekday = parse_weekday_code(code)?;
    let ordinal = if prefix.is_empty() {
        None
    } else {
        let n: i8 = prefix.strip_prefix('+').unwrap_or(prefix).parse().ok()?;
        if n == 0 || !(-53..=53).contains(&n) {
            return None;
        }
        Some(n)
    };
    Some(ByDay { ordinal, weekday })
}

fn parse_weekday_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn month_name(month: u8) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        _ => "December",
    }
}

fn describe_by_day(day: &ByDay) -> String {
    let name = weekday_name(day.weekday);
    match day.ordinal {
        None => name.to_string(),
        Some(-1) => format!("the last {name}"),
        Some(n) if n < 0 => format!("the {} to last {name}", ordinal_word(n.unsigned_abs())),
        Some(n) => format!("the {} {name}", ordinal_word(n.unsigned_abs())),
    }
}

fn ordinal_word(n: u8) -> String {
    match n {
        1 => "first".to_string(),
        2 => "second".to_string(),
        3 => "third".to_string(),
        4 => "fourth".to_string(),
        5 => "fifth".to_string(),
        _ => format!("{n}th"),
    }
}

/// "a", "a and b", "a, b and c".
fn join_words(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
