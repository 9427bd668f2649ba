//! Fixtures and recording test doubles shared by the unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use staffing_engine::booking::{BookingRef, EventId, Position, PositionId, SectionId, ShiftTimes, SlotId};
use staffing_engine::event::{ChannelRef, Event, Section};

use crate::clients::{AggregateSyncApi, BookingRequest, ChatNotifier, ResourceBookingApi, SectionSyncRequest, SummaryAction};
use crate::error::{Result, SyncError};
use crate::store::{InMemoryStore, StaffingStore};

pub const EVENT: EventId = EventId(1);
pub const SINGLE_EVENT: EventId = EventId(2);
pub const OSLO: SectionId = SectionId(10);
pub const APPROACH_SECTION: SectionId = SectionId(20);
pub const DELIVERY: PositionId = PositionId(101);
pub const TOWER: PositionId = PositionId(102);
pub const APPROACH: PositionId = PositionId(201);
pub const TOWER_LATE: PositionId = PositionId(202);

pub fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Weekly on Sundays from 2030-06-02, 17:00-20:00 UTC, with a chat channel.
pub fn weekly_event() -> Event {
    let mut event = Event::new(
        EVENT,
        "Sunday Ops",
        utc("2030-06-02T17:00:00Z"),
        utc("2030-06-02T20:00:00Z"),
    )
    .with_rule("FREQ=WEEKLY");
    event.description = "Weekly Oslo staffing".to_string();
    event.channel = Some(ChannelRef {
        channel_id: "chan-1".to_string(),
        message_id: None,
    });
    event
}

fn section(id: SectionId, event_id: EventId, name: &str, order: i32) -> Section {
    Section {
        id,
        event_id,
        name: name.to_string(),
        description: None,
        order,
        synced_at: None,
    }
}

fn position(id: PositionId, section_id: SectionId, slot: &str, name: &str, order: i32) -> Position {
    let mut p = Position::new(id, section_id, SlotId::new(slot), name);
    p.order = order;
    p
}

/// One recurring event with two sections:
/// Oslo (DEL, TWR) and Approach (APP, TWR with a late shift, local).
/// Plus a one-off event without sections.
pub async fn fixture_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    store.insert_event(weekly_event()).await;
    store
        .insert_event(Event::new(
            SINGLE_EVENT,
            "Fly-in",
            utc("2030-07-01T12:00:00Z"),
            utc("2030-07-01T16:00:00Z"),
        ))
        .await;

    // Inserted out of order on purpose
    store.insert_section(section(APPROACH_SECTION, EVENT, "Approach", 1)).await;
    store.insert_section(section(OSLO, EVENT, "Oslo", 0)).await;

    store.insert_position(position(TOWER, OSLO, "ENGM_TWR", "Oslo Tower", 1)).await;
    store.insert_position(position(DELIVERY, OSLO, "ENGM_DEL", "Oslo Delivery", 0)).await;
    store
        .insert_position(position(APPROACH, APPROACH_SECTION, "ENGM_APP", "Oslo Approach", 0))
        .await;
    let mut late = position(TOWER_LATE, APPROACH_SECTION, "ENGM_TWR", "Oslo Tower (late)", 1);
    late.is_local = true;
    late.shift = Some(ShiftTimes {
        start: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
    });
    store.insert_position(late).await;

    Arc::new(store)
}

// ── Recording doubles ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingBookings {
    pub created: Mutex<Vec<BookingRequest>>,
    pub deleted: Mutex<Vec<BookingRef>>,
    pub next_ref: Mutex<u64>,
    pub fail_create: Mutex<bool>,
    pub fail_delete: Mutex<bool>,
    pub disabled: bool,
    /// Unbook this position while a create call is in flight.
    pub unbook_during_create: Mutex<Option<(Arc<InMemoryStore>, PositionId)>>,
}

impl RecordingBookings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_ref: Mutex::new(500),
            ..Self::default()
        })
    }
}

#[async_trait]
impl ResourceBookingApi for RecordingBookings {
    async fn create_booking(&self, request: &BookingRequest) -> Result<Option<BookingRef>> {
        if self.disabled {
            return Ok(None);
        }
        if *self.fail_create.lock() {
            return Err(SyncError::mirror("control_center", "HTTP 500"));
        }
        let race = self.unbook_during_create.lock().take();
        if let Some((store, position_id)) = race {
            store.take_occupancy(position_id).await?;
        }
        self.created.lock().push(request.clone());
        let mut next = self.next_ref.lock();
        *next += 1;
        Ok(Some(BookingRef(*next)))
    }

    async fn delete_booking(&self, booking_ref: BookingRef) -> Result<bool> {
        if self.disabled {
            return Ok(false);
        }
        if *self.fail_delete.lock() {
            return Err(SyncError::mirror("control_center", "HTTP 404"));
        }
        self.deleted.lock().push(booking_ref);
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingChat {
    pub published: Mutex<Vec<(EventId, Option<SectionId>, SummaryAction)>>,
    pub reminders: Mutex<Vec<(EventId, DateTime<Utc>)>>,
    /// Reminders for this event fail.
    pub failing_event: Mutex<Option<EventId>>,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ChatNotifier for RecordingChat {
    async fn publish_summary(&self, event: &Event, first_section: Option<SectionId>, action: SummaryAction) -> Result<bool> {
        self.published.lock().push((event.id, first_section, action));
        Ok(true)
    }

    async fn send_reminder(&self, event: &Event, occurrence_start: DateTime<Utc>) -> Result<bool> {
        if *self.failing_event.lock() == Some(event.id) {
            return Err(SyncError::mirror("discord", "HTTP 502"));
        }
        self.reminders.lock().push((event.id, occurrence_start));
        Ok(true)
    }
}

#[derive(Default)]
pub struct RecordingAggregate {
    pub requests: Mutex<Vec<(SectionId, SectionSyncRequest)>>,
    /// Number of upcoming calls that fail.
    pub failures_left: Mutex<u32>,
}

impl RecordingAggregate {
    pub fn failing(times: u32) -> Arc<Self> {
        let aggregate = Self::default();
        *aggregate.failures_left.lock() = times;
        Arc::new(aggregate)
    }
}

#[async_trait]
impl AggregateSyncApi for RecordingAggregate {
    async fn sync_section(&self, section: &Section, request: &SectionSyncRequest) -> Result<bool> {
        {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(SyncError::mirror("vatsim_booking", "HTTP 503"));
            }
        }
        self.requests.lock().push((section.id, request.clone()));
        Ok(true)
    }
}
