//! Resource-booking system ("Control Center") client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use staffing_engine::booking::{BookingRef, BookingWindow, SlotId};
use tracing::{info, warn};

use crate::config::ControlCenterConfig;
use crate::error::{Result, SyncError};

const SERVICE: &str = "control_center";

/// Body of `POST {api}/bookings/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingRequest {
    pub cid: u64,
    /// `dd/mm/YYYY`
    pub date: String,
    pub position: String,
    /// `HH:MM`
    pub start_at: String,
    /// `HH:MM`
    pub end_at: String,
    pub tag: u32,
    pub source: String,
}

impl BookingRequest {
    pub fn new(slot: &SlotId, cid: u64, window: &BookingWindow, tag: u32, source: impl Into<String>) -> Self {
        Self {
            cid,
            date: window.start.format("%d/%m/%Y").to_string(),
            position: slot.to_string(),
            start_at: window.start.format("%H:%M").to_string(),
            end_at: window.end.format("%H:%M").to_string(),
            tag,
            source: source.into(),
        }
    }
}

#[async_trait]
pub trait ResourceBookingApi: Send + Sync {
    /// Create a booking. `Ok(None)` means the call was skipped (not
    /// configured).
    async fn create_booking(&self, request: &BookingRequest) -> Result<Option<BookingRef>>;

    /// Delete a booking. `Ok(false)` means the call was skipped.
    async fn delete_booking(&self, booking_ref: BookingRef) -> Result<bool>;
}

pub struct ControlCenterClient {
    client: Client,
    api_url: String,
    api_token: Option<String>,
}

impl ControlCenterClient {
    pub fn new(config: &ControlCenterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("staffing-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl ResourceBookingApi for ControlCenterClient {
    async fn create_booking(&self, request: &BookingRequest) -> Result<Option<BookingRef>> {
        let Some(token) = &self.api_token else {
            warn!("Control Center API token not configured, skipping booking creation");
            return Ok(None);
        };

        let response = self
            .client
            .post(format!("{}/bookings/create", self.api_url))
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::mirror(SERVICE, format!("HTTP {status}: {body}")));
        }

        let body: Value = response.json().await?;
        let booking_ref = extract_booking_id(&body)
            .map(BookingRef)
            .ok_or_else(|| SyncError::mirror(SERVICE, "response carried no booking id"))?;

        info!(
            cid = request.cid,
            position = %request.position,
            booking_ref = %booking_ref,
            "Control Center booking created"
        );
        Ok(Some(booking_ref))
    }

    async fn delete_booking(&self, booking_ref: BookingRef) -> Result<bool> {
        let Some(token) = &self.api_token else {
            warn!("Control Center API token not configured, skipping booking deletion");
            return Ok(false);
        };

        let response = self
            .client
            .delete(format!("{}/bookings/{}", self.api_url, booking_ref))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::mirror(SERVICE, format!("HTTP {status}: {body}")));
        }

        info!(booking_ref = %booking_ref, "Control Center booking deleted");
        Ok(true)
    }
}

/// The id sits at `booking.id`, `id` or `data.id`, as a number or numeric
/// string.
fn extract_booking_id(body: &Value) -> Option<u64> {
    [
        body.pointer("/booking/id"),
        body.pointer("/id"),
        body.pointer("/data/id"),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
}
