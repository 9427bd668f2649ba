//! Events and sections as the engine sees them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{EventId, SectionId};
use crate::occurrence::{self, next_future_occurrence, OccurrenceSet, OccurrenceWindow, WindowQuery};
use crate::recurrence;

/// Where the event's staffing summary lives in the chat system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_id: String,
    /// Recorded by the bot after the first publish.
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Anchor start. Also the single occurrence of a non-recurring event.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub recurrence_rule: Option<String>,
    #[serde(default)]
    pub cancelled: OccurrenceSet,
    #[serde(default)]
    pub notified: OccurrenceSet,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
}

impl Event {
    pub fn new(id: EventId, title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            start,
            end,
            recurrence_rule: None,
            cancelled: OccurrenceSet::new(),
            notified: OccurrenceSet::new(),
            channel: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.recurrence_rule = Some(rule.into());
        self
    }

    /// Fixed occurrence length. A malformed anchor (end before start) is zero.
    pub fn duration(&self) -> Duration {
        (self.end - self.start).max(Duration::zero())
    }

    /// The rule text, if non-blank.
    pub fn rule(&self) -> Option<&str> {
        self.recurrence_rule
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    pub fn is_recurring(&self) -> bool {
        self.rule().is_some()
    }

    pub fn anchor_window(&self) -> OccurrenceWindow {
        OccurrenceWindow {
            start: self.start,
            end: self.start + self.duration(),
            cancelled: false,
        }
    }

    /// Occurrence windows for `query`.
    ///
    /// A non-recurring event has exactly one window, its own start/end,
    /// regardless of the query bounds.
    pub fn windows(&self, query: &WindowQuery) -> Vec<OccurrenceWindow> {
        match self.rule() {
            Some(rule) => occurrence::windows(rule, self.start, self.duration(), &self.cancelled, query),
            None => vec![self.anchor_window()],
        }
    }

    /// Next live window after `now`, else the anchor window.
    pub fn next_occurrence(&self, now: DateTime<Utc>, query: &WindowQuery) -> OccurrenceWindow {
        let windows = self.windows(query);
        next_future_occurrence(&windows, now)
            .copied()
            .unwrap_or_else(|| self.anchor_window())
    }

    pub fn describe_recurrence(&self) -> Option<String> {
        self.rule().map(recurrence::describe)
    }

    pub fn summary_message_id(&self) -> Option<&str> {
        self.channel.as_ref().and_then(|c| c.message_id.as_deref())
    }
}

/// Ordered grouping of positions under an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub event_id: EventId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i32,
    /// Last successful aggregate sync.
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Sort sections by `order`, ties broken by id. Bot section indices are
/// 1-based positions in this order.
pub fn order_sections(sections: &mut [Section]) {
    sections.sort_by_key(|s| (s.order, s.id));
}
