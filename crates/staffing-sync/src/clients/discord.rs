//! Chat side: the staffing bot's summary endpoints and the reminder webhook.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use staffing_engine::booking::SectionId;
use staffing_engine::event::Event;
use staffing_engine::temporal::format_human_duration;
use tracing::{debug, info};

use crate::config::DiscordConfig;
use crate::error::{Result, SyncError};

const SERVICE: &str = "discord";

/// Embed colour for reminders (orange).
const REMINDER_COLOR: u32 = 0xff9800;

/// Which bot endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryAction {
    /// First publish: the bot posts a new message.
    Setup,
    /// The bot edits the message it posted before.
    Update,
}

impl SummaryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Update => "update",
        }
    }

    /// `Setup` until the bot has recorded a summary message for the event.
    pub fn for_event(event: &Event) -> Self {
        if event.summary_message_id().is_some() {
            Self::Update
        } else {
            Self::Setup
        }
    }
}

#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Ask the bot to (re)publish the event's staffing summary. The bot keys
    /// summaries by the event's first section. `Ok(false)` means skipped.
    async fn publish_summary(&self, event: &Event, first_section: Option<SectionId>, action: SummaryAction) -> Result<bool>;

    /// Post a pre-event reminder. `Ok(false)` means skipped.
    async fn send_reminder(&self, event: &Event, occurrence_start: DateTime<Utc>) -> Result<bool>;
}

pub struct DiscordClient {
    client: Client,
    bot_api_url: Option<String>,
    bot_api_token: Option<String>,
    webhook_url: Option<String>,
    mention_role_id: Option<String>,
    reminder_lead: Duration,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig, reminder_lead: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("staffing-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Ok(Self {
            client,
            bot_api_url: non_empty(&config.bot_api_url).map(|u| u.trim_end_matches('/').to_string()),
            bot_api_token: non_empty(&config.bot_api_token),
            webhook_url: non_empty(&config.webhook_url),
            mention_role_id: non_empty(&config.mention_role_id),
            reminder_lead,
        })
    }
}

#[async_trait]
impl ChatNotifier for DiscordClient {
    async fn publish_summary(&self, event: &Event, first_section: Option<SectionId>, action: SummaryAction) -> Result<bool> {
        let Some(bot_api_url) = &self.bot_api_url else {
            info!(event_id = %event.id, "Discord bot API URL not configured, skipping notification");
            return Ok(false);
        };
        if event.channel.is_none() {
            debug!(event_id = %event.id, "Event has no chat channel, skipping notification");
            return Ok(false);
        }
        let Some(section_id) = first_section else {
            debug!(event_id = %event.id, "Event has no sections, skipping notification");
            return Ok(false);
        };

        let mut request = self
            .client
            .post(format!("{}/staffings/{}", bot_api_url, action.as_str()))
            .form(&[("id", section_id.to_string())]);
        if let Some(token) = &self.bot_api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::mirror(SERVICE, format!("HTTP {status}: {body}")));
        }

        info!(event_id = %event.id, action = action.as_str(), "Discord bot notified");
        Ok(true)
    }

    async fn send_reminder(&self, event: &Event, occurrence_start: DateTime<Utc>) -> Result<bool> {
        let Some(webhook_url) = &self.webhook_url else {
            info!(event_id = %event.id, "Discord webhook URL not configured, skipping reminder");
            return Ok(false);
        };

        let payload = reminder_payload(
            event,
            occurrence_start,
            self.mention_role_id.as_deref(),
            self.reminder_lead,
        );
        let response = self.client.post(webhook_url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::mirror(SERVICE, format!("HTTP {status}: {body}")));
        }

        info!(
            event_id = %event.id,
            occurrence_start = %occurrence_start,
            "Pre-event reminder sent"
        );
        Ok(true)
    }
}

/// Webhook body for a reminder about `occurrence_start`.
pub fn reminder_payload(event: &Event, occurrence_start: DateTime<Utc>, mention_role_id: Option<&str>, lead: Duration) -> Value {
    let mention = match mention_role_id {
        Some(role) => format!("<@&{role}>"),
        None => "@everyone".to_string(),
    };
    let lead = format_human_duration(lead);

    json!({
        "content": format!("{mention} An event is starting in {lead}!"),
        "embeds": [{
            "title": format!("⏰ Event Starting Soon: {}", event.title),
            "description": format!("{}\n\n🕐 **Starting in {lead}!**", event.description),
            "color": REMINDER_COLOR,
            "timestamp": occurrence_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            "footer": { "text": "Event starts at" },
        }],
    })
}
