//! Request surface used by the chat bot and the CLI.
//!
//! Every mutating operation performs its local write first and then queues
//! side effects; nothing here waits on an external system.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use staffing_engine::booking::{self, EventId, Occupancy, Occupant, Position, PositionId, SectionId};
use staffing_engine::event::Event;
use staffing_engine::occurrence::{self, OccurrenceKey, OccurrenceSet};
use staffing_engine::EngineError;
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::orchestrator::{Task, TaskQueue};
use crate::store::StaffingStore;
use crate::summary::{build_summary, StaffingSummary};

/// Result of clearing an event's positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub cleared: Vec<PositionId>,
    pub failed: Vec<(PositionId, String)>,
}

impl ResetReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct StaffingService {
    store: Arc<dyn StaffingStore>,
    queue: TaskQueue,
    display_tz: Tz,
}

impl StaffingService {
    pub fn new(store: Arc<dyn StaffingStore>, queue: TaskQueue) -> Self {
        Self {
            store,
            queue,
            display_tz: Tz::UTC,
        }
    }

    /// Zone used for the display end of summaries.
    pub fn with_display_timezone(mut self, tz: Tz) -> Self {
        self.display_tz = tz;
        self
    }

    pub fn store(&self) -> &Arc<dyn StaffingStore> {
        &self.store
    }

    pub async fn list_events(&self) -> Result<Vec<Event>> {
        self.store.events().await
    }

    pub async fn event(&self, id: EventId) -> Result<Event> {
        self.store
            .event(id)
            .await?
            .ok_or_else(|| SyncError::not_found("event", id))
    }

    // ── Booking ─────────────────────────────────────────────────────────

    /// Book `position_id` for `occupant`.
    ///
    /// The write only lands if the position is still available at that
    /// moment; of two concurrent bookings exactly one succeeds.
    pub async fn book(&self, position_id: PositionId, occupant: Occupant) -> Result<Position> {
        let position = self
            .store
            .position(position_id)
            .await?
            .ok_or_else(|| SyncError::not_found("position", position_id))?;
        let event_id = self.event_for(position_id).await?;

        let transition = booking::book(&position, event_id, occupant)?;
        let written = self
            .store
            .compare_and_set_occupancy(position_id, &Occupancy::Available, transition.position.occupancy.clone())
            .await?;
        if !written {
            return Err(EngineError::AlreadyBooked(position_id).into());
        }

        info!(
            event_id = %event_id,
            position_id = %position_id,
            slot = %position.slot_id,
            "Position booked"
        );
        self.queue.enqueue_effects(transition.effects);
        Ok(transition.position)
    }

    /// Clear `position_id`. Its external booking, if any, is deleted in the
    /// background.
    pub async fn unbook(&self, position_id: PositionId) -> Result<Position> {
        let event_id = self.event_for(position_id).await?;
        let previous = self
            .store
            .take_occupancy(position_id)
            .await?
            .ok_or_else(|| SyncError::not_found("position", position_id))?;

        let transition = booking::unbook(&previous, event_id)?;
        info!(event_id = %event_id, position_id = %position_id, "Position unbooked");
        self.queue.enqueue_effects(transition.effects);
        Ok(transition.position)
    }

    /// Unbook every booked position of `event_id`.
    ///
    /// Each position is cleared on its own; a storage failure on one is
    /// reported and the rest still proceed.
    pub async fn reset_event(&self, event_id: EventId) -> Result<ResetReport> {
        let positions = self.store.positions_for_event(event_id).await?;
        let mut taken = Vec::new();
        let mut failed = Vec::new();

        for position in positions.iter().filter(|p| p.is_booked()) {
            match self.store.take_occupancy(position.id).await {
                Ok(Some(previous)) => taken.push(previous),
                Ok(None) => {}
                Err(e) => {
                    warn!(event_id = %event_id, position_id = %position.id, error = %e, "Failed to clear position");
                    failed.push((position.id, e.to_string()));
                }
            }
        }

        let outcome = booking::reset(&taken, event_id);
        self.queue.enqueue_effects(outcome.effects);
        info!(
            event_id = %event_id,
            cleared = outcome.cleared.len(),
            failed = failed.len(),
            "Event positions reset"
        );
        Ok(ResetReport {
            cleared: outcome.cleared,
            failed,
        })
    }

    /// Manual reset, offered for recurring events only.
    pub async fn trigger_reset(&self, event_id: EventId) -> Result<ResetReport> {
        let event = self.event(event_id).await?;
        if !event.is_recurring() {
            return Err(SyncError::NotRecurring(event_id.to_string()));
        }
        self.reset_event(event_id).await
    }

    // ── Bot surface: slots addressed through the summary message ────────

    pub async fn event_by_message(&self, message_id: &str) -> Result<Event> {
        self.store
            .event_by_message(message_id)
            .await?
            .ok_or_else(|| SyncError::not_found("event", message_id))
    }

    /// The first position of `event_id` staffing `slot`, optionally limited
    /// to the 1-based `section`.
    pub async fn resolve_slot(&self, event_id: EventId, slot: &str, section: Option<usize>) -> Result<Position> {
        let section_id = match section {
            Some(index) => Some(self.section_at(event_id, index).await?),
            None => None,
        };

        self.store
            .positions_for_event(event_id)
            .await?
            .into_iter()
            .find(|p| p.slot_id.as_str() == slot && section_id.map_or(true, |id| p.section_id == id))
            .ok_or_else(|| SyncError::not_found("position", slot))
    }

    pub async fn book_slot(
        &self,
        message_id: &str,
        slot: &str,
        section: Option<usize>,
        occupant: Occupant,
    ) -> Result<Position> {
        let event = self.event_by_message(message_id).await?;
        let position = self.resolve_slot(event.id, slot, section).await?;
        self.book(position.id, occupant).await
    }

    /// Unbook every position `channel_user_id` holds on the event, narrowed
    /// by slot and 1-based section when given.
    pub async fn unbook_slot(
        &self,
        message_id: &str,
        slot: Option<&str>,
        section: Option<usize>,
        channel_user_id: &str,
    ) -> Result<Vec<Position>> {
        let event = self.event_by_message(message_id).await?;
        let section_id = match section {
            Some(index) => Some(self.section_at(event.id, index).await?),
            None => None,
        };

        let held: Vec<Position> = self
            .store
            .positions_for_event(event.id)
            .await?
            .into_iter()
            .filter(|p| p.occupant().and_then(Occupant::channel_user_id) == Some(channel_user_id))
            .filter(|p| slot.map_or(true, |s| p.slot_id.as_str() == s))
            .filter(|p| section_id.map_or(true, |id| p.section_id == id))
            .collect();

        let mut unbooked = Vec::with_capacity(held.len());
        for position in held {
            match self.unbook(position.id).await {
                Ok(p) => unbooked.push(p),
                // Someone else got there first
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        if unbooked.is_empty() {
            return Err(SyncError::not_found("booking", channel_user_id));
        }
        Ok(unbooked)
    }

    pub async fn staffing_summary(&self, event_id: EventId, now: DateTime<Utc>) -> Result<StaffingSummary> {
        let event = self.event(event_id).await?;
        let sections = self.store.sections(event_id).await?;
        let positions = self.store.positions_for_event(event_id).await?;
        Ok(build_summary(&event, &sections, &positions, now, &self.display_tz))
    }

    /// Ask the bot to post the summary message for the first time.
    pub async fn setup(&self, event_id: EventId) -> Result<()> {
        let event = self.event(event_id).await?;
        if event.channel.is_none() {
            return Err(SyncError::NoChannel(event_id.to_string()));
        }
        self.queue.enqueue(Task::SetupSummary { event_id });
        Ok(())
    }

    /// Record the chat message the bot posted for the event owning
    /// `section_id`. Later refreshes update that message.
    pub async fn record_summary_message(&self, section_id: SectionId, message_id: impl Into<String>) -> Result<EventId> {
        let section = self
            .store
            .section(section_id)
            .await?
            .ok_or_else(|| SyncError::not_found("section", section_id))?;
        let message_id = message_id.into();
        self.store
            .set_summary_message(section.event_id, message_id.clone())
            .await?;
        info!(event_id = %section.event_id, message_id = %message_id, "Summary message recorded");
        Ok(section.event_id)
    }

    // ── Occurrences and aggregate sync ──────────────────────────────────

    pub async fn cancel_occurrence(&self, event_id: EventId, key: OccurrenceKey) -> Result<OccurrenceSet> {
        let event = self.event(event_id).await?;
        let cancelled = occurrence::cancel_occurrence(&event.cancelled, key);
        self.store.set_cancelled(event_id, cancelled.clone()).await?;
        info!(event_id = %event_id, occurrence = %key, "Occurrence cancelled");
        self.queue.enqueue(Task::Effect(booking::SideEffect::RefreshSummary { event_id }));
        Ok(cancelled)
    }

    pub async fn uncancel_occurrence(&self, event_id: EventId, key: OccurrenceKey) -> Result<OccurrenceSet> {
        let event = self.event(event_id).await?;
        let cancelled = occurrence::uncancel_occurrence(&event.cancelled, key);
        self.store.set_cancelled(event_id, cancelled.clone()).await?;
        info!(event_id = %event_id, occurrence = %key, "Occurrence restored");
        self.queue.enqueue(Task::Effect(booking::SideEffect::RefreshSummary { event_id }));
        Ok(cancelled)
    }

    pub async fn queue_section_sync(&self, section_id: SectionId) -> Result<()> {
        if self.store.section(section_id).await?.is_none() {
            return Err(SyncError::not_found("section", section_id));
        }
        self.queue.enqueue(Task::SyncSection {
            section_id,
            attempt: 1,
        });
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    async fn event_for(&self, position_id: PositionId) -> Result<EventId> {
        self.store
            .event_for_position(position_id)
            .await?
            .ok_or_else(|| SyncError::not_found("position", position_id))
    }

    async fn section_at(&self, event_id: EventId, index: usize) -> Result<SectionId> {
        let sections = self.store.sections(event_id).await?;
        index
            .checked_sub(1)
            .and_then(|i| sections.get(i))
            .map(|s| s.id)
            .ok_or(SyncError::SectionNotFound {
                index,
                available: sections.len(),
            })
    }
}
