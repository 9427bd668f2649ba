//! Read model the chat bot renders into its staffing message.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use staffing_engine::booking::{EventId, Position, PositionId};
use staffing_engine::event::{Event, Section};
use staffing_engine::occurrence::WindowQuery;

/// The bot shows at most this many section headings.
pub const MAX_SECTION_TITLES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffingSummary {
    pub event_id: EventId,
    pub title: String,
    pub description: String,
    pub recurrence: Option<String>,
    pub next_start: DateTime<Utc>,
    pub next_end: DateTime<Utc>,
    /// `next_end` clamped to the end of the start's day in the display zone.
    pub display_end: DateTime<Utc>,
    pub channel_id: Option<String>,
    pub message_id: Option<String>,
    pub section_titles: Vec<String>,
    pub sections: Vec<SectionSummary>,
    pub positions: Vec<PositionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
    /// 1-based, as the bot addresses sections.
    pub index: usize,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionSummary {
    pub id: PositionId,
    pub section: usize,
    pub slot: String,
    pub name: String,
    pub is_local: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub booked: bool,
    pub occupant: Option<String>,
    pub channel_user_id: Option<String>,
}

/// Summarise `event` as of `now`. `sections` must be in display order;
/// positions whose section is not listed are left out.
pub fn build_summary(
    event: &Event,
    sections: &[Section],
    positions: &[Position],
    now: DateTime<Utc>,
    tz: &Tz,
) -> StaffingSummary {
    let next = event.next_occurrence(now, &WindowQuery::upcoming(now));

    let positions = positions
        .iter()
        .filter_map(|p| {
            let index = sections.iter().position(|s| s.id == p.section_id)? + 1;
            let occupant = p.occupant();
            Some(PositionSummary {
                id: p.id,
                section: index,
                slot: p.slot_id.to_string(),
                name: p.name.clone(),
                is_local: p.is_local,
                start_time: p.shift.map(|s| s.start.format("%H:%M").to_string()),
                end_time: p.shift.map(|s| s.end.format("%H:%M").to_string()),
                booked: p.is_booked(),
                occupant: occupant.map(|o| o.label()),
                channel_user_id: occupant.and_then(|o| o.channel_user_id()).map(str::to_string),
            })
        })
        .collect();

    StaffingSummary {
        event_id: event.id,
        title: event.title.clone(),
        description: event.description.clone(),
        recurrence: event.describe_recurrence(),
        next_start: next.start,
        next_end: next.end,
        display_end: next.display_end(tz),
        channel_id: event.channel.as_ref().map(|c| c.channel_id.clone()),
        message_id: event.summary_message_id().map(str::to_string),
        section_titles: sections
            .iter()
            .take(MAX_SECTION_TITLES)
            .map(|s| s.name.clone())
            .collect(),
        sections: sections
            .iter()
            .enumerate()
            .map(|(i, s)| SectionSummary {
                index: i + 1,
                name: s.name.clone(),
                description: s.description.clone(),
            })
            .collect(),
        positions,
    }
}
