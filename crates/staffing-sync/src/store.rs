//! Storage seam for events, sections and positions.
//!
//! The booking path needs exactly two atomic primitives from storage:
//! [`StaffingStore::compare_and_set_occupancy`] for `book`, and
//! [`StaffingStore::take_occupancy`] for `unbook`/`reset`. Everything else is
//! plain reads and single-field writes.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use staffing_engine::booking::{BookingRef, EventId, Occupancy, Occupant, Position, PositionId, SectionId};
use staffing_engine::event::{order_sections, Event, Section};
use staffing_engine::occurrence::OccurrenceSet;
use tokio::sync::RwLock;

use crate::error::{Result, SyncError};

#[async_trait]
pub trait StaffingStore: Send + Sync {
    async fn events(&self) -> Result<Vec<Event>>;

    async fn event(&self, id: EventId) -> Result<Option<Event>>;

    /// The event whose staffing summary lives in chat message `message_id`.
    async fn event_by_message(&self, message_id: &str) -> Result<Option<Event>>;

    /// Sections of an event ordered by `order`, then id.
    async fn sections(&self, event_id: EventId) -> Result<Vec<Section>>;

    async fn section(&self, id: SectionId) -> Result<Option<Section>>;

    /// Positions of an event, in section order and then position order.
    async fn positions_for_event(&self, event_id: EventId) -> Result<Vec<Position>>;

    async fn positions_for_section(&self, section_id: SectionId) -> Result<Vec<Position>>;

    async fn position(&self, id: PositionId) -> Result<Option<Position>>;

    async fn event_for_position(&self, id: PositionId) -> Result<Option<EventId>>;

    /// Replace the occupancy of `id` with `next` only if it currently equals
    /// `expected`. Returns whether the write happened. The external booking
    /// reference is not touched.
    async fn compare_and_set_occupancy(&self, id: PositionId, expected: &Occupancy, next: Occupancy) -> Result<bool>;

    /// Atomically clear a booked position's occupancy and external
    /// reference, returning the position as it was. An available position is
    /// returned untouched. `None` if the position does not exist.
    async fn take_occupancy(&self, id: PositionId) -> Result<Option<Position>>;

    /// Store `booking_ref` on `id` if it is still held by `occupant` and has
    /// no reference yet.
    async fn attach_booking_ref(&self, id: PositionId, occupant: &Occupant, booking_ref: BookingRef) -> Result<bool>;

    async fn set_cancelled(&self, event_id: EventId, cancelled: OccurrenceSet) -> Result<()>;

    async fn set_notified(&self, event_id: EventId, notified: OccurrenceSet) -> Result<()>;

    /// Record the chat message holding the event's summary. The event must
    /// have a channel.
    async fn set_summary_message(&self, event_id: EventId, message_id: String) -> Result<()>;

    async fn mark_section_synced(&self, section_id: SectionId, at: DateTime<Utc>) -> Result<()>;
}

// ── In-memory store ─────────────────────────────────────────────────────────

/// Serializable contents of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub positions: Vec<Position>,
}

#[derive(Debug, Default)]
struct StoreState {
    events: BTreeMap<EventId, Event>,
    sections: BTreeMap<SectionId, Section>,
    positions: BTreeMap<PositionId, Position>,
}

impl StoreState {
    fn ordered_sections(&self, event_id: EventId) -> Vec<Section> {
        let mut sections: Vec<Section> = self
            .sections
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        order_sections(&mut sections);
        sections
    }

    fn ordered_positions(&self, section_id: SectionId) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .values()
            .filter(|p| p.section_id == section_id)
            .cloned()
            .collect();
        positions.sort_by_key(|p| (p.order, p.id));
        positions
    }

    fn event_mut(&mut self, id: EventId) -> Result<&mut Event> {
        self.events
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found("event", id))
    }
}

/// Store backed by process memory, loadable from and savable to a JSON
/// snapshot.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let state = StoreState {
            events: snapshot.events.into_iter().map(|e| (e.id, e)).collect(),
            sections: snapshot.sections.into_iter().map(|s| (s.id, s)).collect(),
            positions: snapshot.positions.into_iter().map(|p| (p.id, p)).collect(),
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Snapshot(format!("cannot read {}: {}", path.display(), e)))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)
            .map_err(|e| SyncError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            events: state.events.values().cloned().collect(),
            sections: state.sections.values().cloned().collect(),
            positions: state.positions.values().cloned().collect(),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot().await)
            .map_err(|e| SyncError::Snapshot(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| SyncError::Snapshot(format!("cannot write {}: {}", path.display(), e)))
    }

    pub async fn insert_event(&self, event: Event) {
        self.state.write().await.events.insert(event.id, event);
    }

    pub async fn insert_section(&self, section: Section) {
        self.state.write().await.sections.insert(section.id, section);
    }

    pub async fn insert_position(&self, position: Position) {
        self.state.write().await.positions.insert(position.id, position);
    }
}

#[async_trait]
impl StaffingStore for InMemoryStore {
    async fn events(&self) -> Result<Vec<Event>> {
        Ok(self.state.read().await.events.values().cloned().collect())
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.state.read().await.events.get(&id).cloned())
    }

    async fn event_by_message(&self, message_id: &str) -> Result<Option<Event>> {
        Ok(self
            .state
            .read()
            .await
            .events
            .values()
            .find(|e| e.summary_message_id() == Some(message_id))
            .cloned())
    }

    async fn sections(&self, event_id: EventId) -> Result<Vec<Section>> {
        Ok(self.state.read().await.ordered_sections(event_id))
    }

    async fn section(&self, id: SectionId) -> Result<Option<Section>> {
        Ok(self.state.read().await.sections.get(&id).cloned())
    }

    async fn positions_for_event(&self, event_id: EventId) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        Ok(state
            .ordered_sections(event_id)
            .iter()
            .flat_map(|s| state.ordered_positions(s.id))
            .collect())
    }

    async fn positions_for_section(&self, section_id: SectionId) -> Result<Vec<Position>> {
        Ok(self.state.read().await.ordered_positions(section_id))
    }

    async fn position(&self, id: PositionId) -> Result<Option<Position>> {
        Ok(self.state.read().await.positions.get(&id).cloned())
    }

    async fn event_for_position(&self, id: PositionId) -> Result<Option<EventId>> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .get(&id)
            .and_then(|p| state.sections.get(&p.section_id))
            .map(|s| s.event_id))
    }

    async fn compare_and_set_occupancy(&self, id: PositionId, expected: &Occupancy, next: Occupancy) -> Result<bool> {
        let mut state = self.state.write().await;
        let position = state
            .positions
            .get_mut(&id)
            .ok_or_else(|| SyncError::not_found("position", id))?;
        if &position.occupancy != expected {
            return Ok(false);
        }
        position.occupancy = next;
        Ok(true)
    }

    async fn take_occupancy(&self, id: PositionId) -> Result<Option<Position>> {
        let mut state = self.state.write().await;
        Ok(state.positions.get_mut(&id).map(|position| {
            let previous = position.clone();
            if position.is_booked() {
                position.occupancy = Occupancy::Available;
                position.external_booking_ref = None;
            }
            previous
        }))
    }

    async fn attach_booking_ref(&self, id: PositionId, occupant: &Occupant, booking_ref: BookingRef) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.positions.get_mut(&id) {
            Some(position) if position.occupant() == Some(occupant) && position.external_booking_ref.is_none() => {
                position.external_booking_ref = Some(booking_ref);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_cancelled(&self, event_id: EventId, cancelled: OccurrenceSet) -> Result<()> {
        self.state.write().await.event_mut(event_id)?.cancelled = cancelled;
        Ok(())
    }

    async fn set_notified(&self, event_id: EventId, notified: OccurrenceSet) -> Result<()> {
        self.state.write().await.event_mut(event_id)?.notified = notified;
        Ok(())
    }

    async fn set_summary_message(&self, event_id: EventId, message_id: String) -> Result<()> {
        let mut state = self.state.write().await;
        let event = state.event_mut(event_id)?;
        let channel = event
            .channel
            .as_mut()
            .ok_or_else(|| SyncError::NoChannel(event_id.to_string()))?;
        channel.message_id = Some(message_id);
        Ok(())
    }

    async fn mark_section_synced(&self, section_id: SectionId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let section = state
            .sections
            .get_mut(&section_id)
            .ok_or_else(|| SyncError::not_found("section", section_id))?;
        section.synced_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture_store, EVENT, TOWER};
    use staffing_engine::booking::UserId;

    #[tokio::test]
    async fn test_positions_follow_section_order() {
        let store = fixture_store().await;
        let slots: Vec<String> = store
            .positions_for_event(EVENT)
            .await
            .unwrap()
            .iter()
            .map(|p| p.slot_id.to_string())
            .collect();
        assert_eq!(slots, vec!["ENGM_DEL", "ENGM_TWR", "ENGM_APP", "ENGM_TWR"]);
    }

    #[tokio::test]
    async fn test_compare_and_set_only_from_expected() {
        let store = fixture_store().await;
        let occupant = Occupancy::Booked(Occupant::local(UserId(1)));

        assert!(store
            .compare_and_set_occupancy(TOWER, &Occupancy::Available, occupant.clone())
            .await
            .unwrap());
        assert!(!store
            .compare_and_set_occupancy(TOWER, &Occupancy::Available, occupant)
            .await
            .unwrap());

        let missing = store
            .compare_and_set_occupancy(PositionId(999), &Occupancy::Available, Occupancy::Available)
            .await;
        assert!(missing.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_take_occupancy_clears_reference() {
        let store = fixture_store().await;
        let occupant = Occupant::external(5, "d5");
        store
            .compare_and_set_occupancy(TOWER, &Occupancy::Available, Occupancy::Booked(occupant.clone()))
            .await
            .unwrap();
        assert!(store.attach_booking_ref(TOWER, &occupant, BookingRef(77)).await.unwrap());

        let previous = store.take_occupancy(TOWER).await.unwrap().unwrap();
        assert_eq!(previous.external_booking_ref, Some(BookingRef(77)));
        let now = store.position(TOWER).await.unwrap().unwrap();
        assert_eq!(now.occupancy, Occupancy::Available);
        assert_eq!(now.external_booking_ref, None);

        // Reference for a departed occupant is refused
        assert!(!store.attach_booking_ref(TOWER, &occupant, BookingRef(78)).await.unwrap());
    }

    #[tokio::test]
    async fn test_attach_keeps_existing_reference() {
        let store = fixture_store().await;
        let occupant = Occupant::external(5, "d5");
        store
            .compare_and_set_occupancy(TOWER, &Occupancy::Available, Occupancy::Booked(occupant.clone()))
            .await
            .unwrap();
        assert!(store.attach_booking_ref(TOWER, &occupant, BookingRef(77)).await.unwrap());
        assert!(!store.attach_booking_ref(TOWER, &occupant, BookingRef(78)).await.unwrap());

        let position = store.position(TOWER).await.unwrap().unwrap();
        assert_eq!(position.external_booking_ref, Some(BookingRef(77)));
    }

    #[tokio::test]
    async fn test_take_occupancy_leaves_available_position() {
        let store = fixture_store().await;
        let mut stale = store.position(TOWER).await.unwrap().unwrap();
        stale.external_booking_ref = Some(BookingRef(77));
        store.insert_position(stale).await;

        let previous = store.take_occupancy(TOWER).await.unwrap().unwrap();
        assert_eq!(previous.occupancy, Occupancy::Available);
        let after = store.position(TOWER).await.unwrap().unwrap();
        assert_eq!(after.external_booking_ref, Some(BookingRef(77)));
    }

    #[tokio::test]
    async fn test_summary_message_lookup() {
        let store = fixture_store().await;
        store.set_summary_message(EVENT, "msg-1".to_string()).await.unwrap();
        let event = store.event_by_message("msg-1").await.unwrap().unwrap();
        assert_eq!(event.id, EVENT);
        assert!(store.event_by_message("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_file_round_trip() {
        let store = fixture_store().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        store.save(&path).await.unwrap();

        let reloaded = InMemoryStore::load(&path).unwrap();
        assert_eq!(reloaded.snapshot().await, store.snapshot().await);
        assert!(InMemoryStore::load(dir.path().join("missing.json")).is_err());
    }
}
