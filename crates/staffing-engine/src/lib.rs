//! # staffing-engine
//!
//! Deterministic core of the event staffing scheduler.
//!
//! Turns a recurrence rule, an anchor and an exception list into concrete
//! occurrence windows, and runs the per-position booking state machine. No
//! function in this crate performs I/O or reads the system clock: callers
//! pass "now" and persist the values handed back.
//!
//! ## Modules
//!
//! - [`recurrence`]: RRULE text → ordered occurrence starts
//! - [`occurrence`]: Occurrence keys, exception sets and windows
//! - [`event`]: Events and sections
//! - [`booking`]: Position occupancy and the book/unbook/reset transitions
//! - [`schedule`]: Reminder and post-occurrence reset decisions
//! - [`temporal`]: Time helpers
//! - [`error`]: Error types

pub mod booking;
pub mod error;
pub mod event;
pub mod occurrence;
pub mod recurrence;
pub mod schedule;
pub mod temporal;

pub use booking::{
    book, reset, unbook, BookingRef, BookingWindow, EventId, Occupancy, Occupant, Position,
    PositionId, ResetOutcome, SectionId, ShiftTimes, SideEffect, SlotId, Transition, UserId,
};
pub use error::EngineError;
pub use event::{order_sections, ChannelRef, Event, Section};
pub use occurrence::{
    cancel_occurrence, next_future_occurrence, uncancel_occurrence, windows, OccurrenceKey,
    OccurrenceSet, OccurrenceWindow, WindowQuery,
};
pub use recurrence::{describe, expand, validate, Frequency, RecurrenceRule, DEFAULT_EXPANSION_LIMIT};
pub use schedule::{reminder_candidates, reset_decision, ReminderPolicy, ResetDecision, ResetPolicy};
