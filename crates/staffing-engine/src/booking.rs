//! Position booking state machine.
//!
//! A position is either [`Occupancy::Available`] or booked by exactly one
//! [`Occupant`]. The transitions [`book`], [`unbook`] and [`reset`] are pure:
//! each returns the next position value plus the [`SideEffect`]s the caller
//! must enqueue. Nothing here performs I/O or touches storage.
//!
//! There is no direct `Local` → `External` transition. Changing occupant
//! means `unbook` then `book`.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::occurrence::OccurrenceWindow;
use crate::temporal::on_date;

// ── Identifiers ─────────────────────────────────────────────────────────────

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(EventId);
numeric_id!(SectionId);
numeric_id!(PositionId);
numeric_id!(
    /// A local member. Members are keyed by their community CID.
    UserId
);
numeric_id!(
    /// Identifier of a booking in the external resource-booking system.
    BookingRef
);

/// The real-world role a position staffs, e.g. `ENGM_TWR`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(pub String);

impl SlotId {
    pub fn new(slot: impl Into<String>) -> Self {
        Self(slot.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Occupancy ───────────────────────────────────────────────────────────────

/// Who holds a booked position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Occupant {
    /// A member with a local user record.
    Local { user_id: UserId },
    /// Known only by external values: community CID and chat user id.
    External { cid: u64, channel_user_id: String },
}

impl Occupant {
    pub fn local(user_id: UserId) -> Self {
        Self::Local { user_id }
    }

    pub fn external(cid: u64, channel_user_id: impl Into<String>) -> Self {
        Self::External {
            cid,
            channel_user_id: channel_user_id.into(),
        }
    }

    /// Community CID sent to the resource-booking system.
    pub fn cid(&self) -> u64 {
        match self {
            Self::Local { user_id } => user_id.0,
            Self::External { cid, .. } => *cid,
        }
    }

    pub fn channel_user_id(&self) -> Option<&str> {
        match self {
            Self::Local { .. } => None,
            Self::External {
                channel_user_id, ..
            } => Some(channel_user_id),
        }
    }

    /// Short label for summaries ("CID 123" or "user 7").
    pub fn label(&self) -> String {
        match self {
            Self::Local { user_id } => format!("user {user_id}"),
            Self::External { cid, .. } => format!("CID {cid}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "occupant", rename_all = "snake_case")]
pub enum Occupancy {
    #[default]
    Available,
    Booked(Occupant),
}

impl Occupancy {
    pub fn is_booked(&self) -> bool {
        matches!(self, Self::Booked(_))
    }

    pub fn occupant(&self) -> Option<&Occupant> {
        match self {
            Self::Available => None,
            Self::Booked(occupant) => Some(occupant),
        }
    }
}

// ── Position ────────────────────────────────────────────────────────────────

/// Times of day (UTC) that override the occurrence window for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTimes {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Concrete interval booked in the resource-booking system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub section_id: SectionId,
    pub slot_id: SlotId,
    pub name: String,
    /// Local-only position (reported in summaries, otherwise ordinary).
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub shift: Option<ShiftTimes>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub occupancy: Occupancy,
    /// Set only after a successful external mirror.
    #[serde(default)]
    pub external_booking_ref: Option<BookingRef>,
}

impl Position {
    pub fn new(id: PositionId, section_id: SectionId, slot_id: SlotId, name: impl Into<String>) -> Self {
        Self {
            id,
            section_id,
            slot_id,
            name: name.into(),
            is_local: false,
            shift: None,
            order: 0,
            occupancy: Occupancy::Available,
            external_booking_ref: None,
        }
    }

    pub fn is_booked(&self) -> bool {
        self.occupancy.is_booked()
    }

    pub fn occupant(&self) -> Option<&Occupant> {
        self.occupancy.occupant()
    }

    /// The interval to book externally for `occurrence`.
    ///
    /// Shift times, when set, are placed on the occurrence's start date; an
    /// end that is not after the start moves to the following day.
    pub fn booking_window(&self, occurrence: &OccurrenceWindow) -> BookingWindow {
        match self.shift {
            None => BookingWindow {
                start: occurrence.start,
                end: occurrence.end,
            },
            Some(shift) => {
                let date = occurrence.start.date_naive();
                let start = on_date(date, shift.start);
                let mut end = on_date(date, shift.end);
                if end <= start {
                    end += Duration::days(1);
                }
                BookingWindow { start, end }
            }
        }
    }
}

// ── Transitions ─────────────────────────────────────────────────────────────

/// Work a transition asks the caller to schedule. Consumers must treat each
/// intent as idempotent: delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    /// Create the external booking for a freshly booked position.
    MirrorBooking {
        event_id: EventId,
        position_id: PositionId,
        occupant: Occupant,
    },
    /// Delete an external booking that the position no longer holds.
    UnmirrorBooking {
        event_id: EventId,
        position_id: PositionId,
        booking_ref: BookingRef,
    },
    /// Re-publish the event's staffing summary.
    RefreshSummary { event_id: EventId },
}

impl SideEffect {
    pub fn event_id(&self) -> EventId {
        match self {
            Self::MirrorBooking { event_id, .. }
            | Self::UnmirrorBooking { event_id, .. }
            | Self::RefreshSummary { event_id } => *event_id,
        }
    }
}

/// A successful transition: the position to store and the intents to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub position: Position,
    pub effects: Vec<SideEffect>,
}

/// Book an available position.
///
/// The stored `external_booking_ref` is left as is; the mirror intent fills
/// it in once the external call succeeds.
///
/// # Errors
///
/// [`EngineError::AlreadyBooked`] if the position has any occupant.
pub fn book(position: &Position, event_id: EventId, occupant: Occupant) -> Result<Transition> {
    if position.is_booked() {
        return Err(EngineError::AlreadyBooked(position.id));
    }

    let mut next = position.clone();
    next.occupancy = Occupancy::Booked(occupant.clone());

    Ok(Transition {
        effects: vec![
            SideEffect::MirrorBooking {
                event_id,
                position_id: position.id,
                occupant,
            },
            SideEffect::RefreshSummary { event_id },
        ],
        position: next,
    })
}

/// Clear a booked position and its external reference.
///
/// The reference is dropped locally whether or not the resulting delete
/// later succeeds.
///
/// # Errors
///
/// [`EngineError::NotBooked`] if the position is available.
pub fn unbook(position: &Position, event_id: EventId) -> Result<Transition> {
    if !position.is_booked() {
        return Err(EngineError::NotBooked(position.id));
    }
    let (next, unmirror) = clear(position, event_id);
    Ok(Transition {
        position: next,
        effects: unmirror
            .into_iter()
            .chain([SideEffect::RefreshSummary { event_id }])
            .collect(),
    })
}

/// Outcome of a bulk reset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResetOutcome {
    /// Every input position after the reset, in input order.
    pub positions: Vec<Position>,
    /// Positions that were booked before the reset.
    pub cleared: Vec<PositionId>,
    pub effects: Vec<SideEffect>,
}

/// Unbook every booked position; available ones pass through unchanged.
///
/// Never fails. Emits one unmirror per held external reference and a single
/// summary refresh if anything was cleared.
pub fn reset(positions: &[Position], event_id: EventId) -> ResetOutcome {
    let mut outcome = ResetOutcome::default();

    for position in positions {
        if !position.is_booked() {
            outcome.positions.push(position.clone());
            continue;
        }
        let (next, unmirror) = clear(position, event_id);
        outcome.cleared.push(position.id);
        outcome.effects.extend(unmirror);
        outcome.positions.push(next);
    }

    if !outcome.cleared.is_empty() {
        outcome.effects.push(SideEffect::RefreshSummary { event_id });
    }
    outcome
}

fn clear(position: &Position, event_id: EventId) -> (Position, Option<SideEffect>) {
    let mut next = position.clone();
    next.occupancy = Occupancy::Available;
    let unmirror = next
        .external_booking_ref
        .take()
        .map(|booking_ref| SideEffect::UnmirrorBooking {
            event_id,
            position_id: position.id,
            booking_ref,
        });
    (next, unmirror)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::parse_rfc3339;
    use proptest::prelude::*;

    const EVENT: EventId = EventId(1);

    fn position(id: u64) -> Position {
        Position::new(PositionId(id), SectionId(10), SlotId::new("ENGM_TWR"), "Oslo Tower")
    }

    fn booked(id: u64, booking_ref: Option<u64>) -> Position {
        let mut p = position(id);
        p.occupancy = Occupancy::Booked(Occupant::external(100 + id, format!("d{id}")));
        p.external_booking_ref = booking_ref.map(BookingRef);
        p
    }

    #[test]
    fn test_book_available_position() {
        let occupant = Occupant::external(123, "abc");
        let t = book(&position(1), EVENT, occupant.clone()).unwrap();
        assert_eq!(t.position.occupant(), Some(&occupant));
        assert_eq!(t.position.external_booking_ref, None);
        assert_eq!(
            t.effects,
            vec![
                SideEffect::MirrorBooking {
                    event_id: EVENT,
                    position_id: PositionId(1),
                    occupant,
                },
                SideEffect::RefreshSummary { event_id: EVENT },
            ]
        );
    }

    #[test]
    fn test_external_book_then_unbook_scenario() {
        let first = book(&position(1), EVENT, Occupant::external(123, "abc")).unwrap();
        let mut stored = first.position;

        let err = book(&stored, EVENT, Occupant::local(UserId(9))).unwrap_err();
        assert_eq!(err, EngineError::AlreadyBooked(PositionId(1)));
        assert!(err.is_conflict());
        let err = book(&stored, EVENT, Occupant::external(123, "abc")).unwrap_err();
        assert_eq!(err, EngineError::AlreadyBooked(PositionId(1)));

        // Mirror succeeded in the meantime
        stored.external_booking_ref = Some(BookingRef(555));

        let t = unbook(&stored, EVENT).unwrap();
        assert_eq!(t.position.occupancy, Occupancy::Available);
        assert_eq!(t.position.external_booking_ref, None);
        assert_eq!(
            t.effects,
            vec![
                SideEffect::UnmirrorBooking {
                    event_id: EVENT,
                    position_id: PositionId(1),
                    booking_ref: BookingRef(555),
                },
                SideEffect::RefreshSummary { event_id: EVENT },
            ]
        );
    }

    #[test]
    fn test_book_keeps_existing_reference() {
        let mut p = position(1);
        p.external_booking_ref = Some(BookingRef(7));
        let t = book(&p, EVENT, Occupant::local(UserId(5))).unwrap();
        assert_eq!(t.position.external_booking_ref, Some(BookingRef(7)));
    }

    #[test]
    fn test_unbook_available_is_not_booked() {
        let err = unbook(&position(4), EVENT).unwrap_err();
        assert_eq!(err, EngineError::NotBooked(PositionId(4)));
        assert_eq!(err.to_string(), "Position 4 is not booked");
    }

    #[test]
    fn test_unbook_without_reference_only_refreshes() {
        let t = unbook(&booked(2, None), EVENT).unwrap();
        assert_eq!(t.effects, vec![SideEffect::RefreshSummary { event_id: EVENT }]);
    }

    #[test]
    fn test_reset_mixed_positions() {
        let positions = vec![booked(1, Some(11)), position(2), booked(3, None)];
        let outcome = reset(&positions, EVENT);

        assert_eq!(outcome.cleared, vec![PositionId(1), PositionId(3)]);
        assert!(outcome.positions.iter().all(|p| !p.is_booked()));
        assert!(outcome.positions.iter().all(|p| p.external_booking_ref.is_none()));
        assert_eq!(outcome.positions[1], positions[1]);
        assert_eq!(
            outcome.effects,
            vec![
                SideEffect::UnmirrorBooking {
                    event_id: EVENT,
                    position_id: PositionId(1),
                    booking_ref: BookingRef(11),
                },
                SideEffect::RefreshSummary { event_id: EVENT },
            ]
        );
    }

    #[test]
    fn test_reset_nothing_booked_is_quiet() {
        let outcome = reset(&[position(1), position(2)], EVENT);
        assert!(outcome.cleared.is_empty());
        assert!(outcome.effects.is_empty());
    }

    #[test]
    fn test_occupant_labels() {
        assert_eq!(Occupant::external(123, "abc").label(), "CID 123");
        assert_eq!(Occupant::local(UserId(7)).label(), "user 7");
        assert_eq!(Occupant::local(UserId(7)).cid(), 7);
        assert_eq!(Occupant::local(UserId(7)).channel_user_id(), None);
    }

    #[test]
    fn test_occupancy_serde_shape() {
        let json = serde_json::to_value(Occupancy::Booked(Occupant::external(1, "x"))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "state": "booked",
                "occupant": {"kind": "external", "cid": 1, "channel_user_id": "x"}
            })
        );
        let available: Occupancy = serde_json::from_str(r#"{"state":"available"}"#).unwrap();
        assert_eq!(available, Occupancy::Available);
    }

    #[test]
    fn test_booking_window_uses_shift_times() {
        let occurrence = OccurrenceWindow {
            start: parse_rfc3339("2026-02-15T17:00:00Z").unwrap(),
            end: parse_rfc3339("2026-02-15T21:00:00Z").unwrap(),
            cancelled: false,
        };
        let mut p = position(1);
        assert_eq!(p.booking_window(&occurrence).start, occurrence.start);

        p.shift = Some(ShiftTimes {
            start: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(20, 30, 0).unwrap(),
        });
        let w = p.booking_window(&occurrence);
        assert_eq!(w.start, parse_rfc3339("2026-02-15T18:00:00Z").unwrap());
        assert_eq!(w.end, parse_rfc3339("2026-02-15T20:30:00Z").unwrap());

        p.shift = Some(ShiftTimes {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        });
        let w = p.booking_window(&occurrence);
        assert_eq!(w.end, parse_rfc3339("2026-02-16T01:00:00Z").unwrap());
    }

    // ── properties ──────────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    enum Op {
        Book(usize, Occupant),
        Unbook(usize),
        Mirror(usize, u64),
    }

    fn arb_occupant() -> impl Strategy<Value = Occupant> {
        prop_oneof![
            (1u64..1000).prop_map(|u| Occupant::local(UserId(u))),
            (1u64..1000, "[a-z]{1,6}").prop_map(|(cid, d)| Occupant::external(cid, d)),
        ]
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..6, arb_occupant()).prop_map(|(i, o)| Op::Book(i, o)),
            (0usize..6).prop_map(Op::Unbook),
            (0usize..6, 1u64..10_000).prop_map(|(i, r)| Op::Mirror(i, r)),
        ]
    }

    proptest! {
        #[test]
        fn prop_reset_after_any_sequence_clears_everything(ops in proptest::collection::vec(arb_op(), 0..60)) {
            let mut positions: Vec<Position> = (0..6).map(position).collect();

            for op in ops {
                match op {
                    Op::Book(i, occupant) => {
                        if let Ok(t) = book(&positions[i], EVENT, occupant) {
                            positions[i] = t.position;
                        }
                    }
                    Op::Unbook(i) => {
                        if let Ok(t) = unbook(&positions[i], EVENT) {
                            positions[i] = t.position;
                        }
                    }
                    Op::Mirror(i, r) => {
                        if positions[i].is_booked() {
                            positions[i].external_booking_ref = Some(BookingRef(r));
                        }
                    }
                }
            }

            let refs_held = positions.iter().filter(|p| p.external_booking_ref.is_some()).count();
            let outcome = reset(&positions, EVENT);

            prop_assert!(outcome.positions.iter().all(|p| p.occupancy == Occupancy::Available));
            prop_assert!(outcome.positions.iter().all(|p| p.external_booking_ref.is_none()));
            let unmirrors = outcome
                .effects
                .iter()
                .filter(|e| matches!(e, SideEffect::UnmirrorBooking { .. }))
                .count();
            prop_assert_eq!(unmirrors, refs_held);

            // Reset is idempotent
            let again = reset(&outcome.positions, EVENT);
            prop_assert!(again.cleared.is_empty());
            prop_assert_eq!(again.positions, outcome.positions);
        }

        #[test]
        fn prop_booked_position_rejects_every_occupant(first in arb_occupant(), second in arb_occupant()) {
            let t = book(&position(1), EVENT, first).unwrap();
            prop_assert_eq!(
                book(&t.position, EVENT, second),
                Err(EngineError::AlreadyBooked(PositionId(1)))
            );
        }
    }
}
