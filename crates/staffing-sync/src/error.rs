//! Error types for the staffing service layer.

use staffing_engine::booking::SectionId;
use staffing_engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Section {index} not found ({available} available)")]
    SectionNotFound { index: usize, available: usize },

    #[error("Event {0} is not recurring")]
    NotRecurring(String),

    #[error("Event {0} has no chat channel configured")]
    NoChannel(String),

    #[error("External mirror to {service} failed: {reason}")]
    ExternalMirror { service: &'static str, reason: String },

    #[error("Aggregate sync of section {section_id} gave up after {attempts} attempts")]
    SyncRetriesExhausted { section_id: SectionId, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn mirror(service: &'static str, reason: impl ToString) -> Self {
        Self::ExternalMirror {
            service,
            reason: reason.to_string(),
        }
    }

    /// Booking precondition violations (already booked / not booked).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Engine(e) if e.is_conflict())
    }

    /// Lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::SectionNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
