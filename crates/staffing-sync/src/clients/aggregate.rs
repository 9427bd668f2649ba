//! Network-wide booking API (aggregate sync of a whole section).

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::Serialize;
use staffing_engine::booking::Position;
use staffing_engine::event::{Event, Section};
use staffing_engine::occurrence::OccurrenceWindow;
use tracing::{info, warn};

use crate::config::AggregateSyncConfig;
use crate::error::{Result, SyncError};

const SERVICE: &str = "vatsim_booking";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSyncRequest {
    pub event: SyncedEvent,
    pub positions: Vec<SyncedPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedEvent {
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncedPosition {
    pub position: String,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
}

impl SectionSyncRequest {
    /// Request for `positions` of one section, booked for `window`.
    pub fn new(event: &Event, window: &OccurrenceWindow, positions: &[Position]) -> Self {
        let ts = |dt: chrono::DateTime<chrono::Utc>| dt.to_rfc3339_opts(SecondsFormat::Secs, true);
        Self {
            event: SyncedEvent {
                title: event.title.clone(),
                description: event.description.clone(),
                start_time: ts(window.start),
                end_time: ts(window.end),
            },
            positions: positions
                .iter()
                .map(|p| {
                    let booked = p.booking_window(window);
                    SyncedPosition {
                        position: p.slot_id.to_string(),
                        name: p.name.clone(),
                        start_time: ts(booked.start),
                        end_time: ts(booked.end),
                    }
                })
                .collect(),
        }
    }
}

#[async_trait]
pub trait AggregateSyncApi: Send + Sync {
    /// Push one section. `Ok(false)` means skipped (not configured).
    async fn sync_section(&self, section: &Section, request: &SectionSyncRequest) -> Result<bool>;
}

pub struct VatsimBookingClient {
    client: Client,
    api_url: Option<String>,
    api_key: Option<String>,
}

impl VatsimBookingClient {
    pub fn new(config: &AggregateSyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("staffing-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: config
                .api_url
                .clone()
                .filter(|u| !u.is_empty())
                .map(|u| u.trim_end_matches('/').to_string()),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl AggregateSyncApi for VatsimBookingClient {
    async fn sync_section(&self, section: &Section, request: &SectionSyncRequest) -> Result<bool> {
        let (Some(api_url), Some(api_key)) = (&self.api_url, &self.api_key) else {
            warn!(section_id = %section.id, "VATSIM booking API not configured");
            return Ok(false);
        };

        let response = self
            .client
            .post(format!("{api_url}/bookings"))
            .bearer_auth(api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::mirror(SERVICE, format!("HTTP {status}: {body}")));
        }

        info!(section_id = %section.id, event_id = %section.event_id, "Section synced to VATSIM");
        Ok(true)
    }
}
