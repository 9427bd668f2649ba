//! Error types for staffing-engine operations.

use thiserror::Error;

use crate::booking::PositionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Position {0} is already booked")]
    AlreadyBooked(PositionId),

    #[error("Position {0} is not booked")]
    NotBooked(PositionId),
}

impl EngineError {
    /// Whether this error is a booking precondition violation (surfaced to
    /// callers as a conflict rather than a bad request).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyBooked(_) | Self::NotBooked(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
