//! Service configuration.
//!
//! Loaded from TOML. Every section has defaults, so an empty file is a valid
//! configuration. Credentials and endpoints can also come from the
//! environment, which takes precedence over the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use staffing_engine::schedule::{ReminderPolicy, ResetPolicy};
use staffing_engine::temporal::parse_timezone;

use crate::error::{Result, SyncError};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "staffing.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub control_center: ControlCenterConfig,
    pub discord: DiscordConfig,
    pub aggregate_sync: AggregateSyncConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub display: DisplayConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        content.parse()
    }

    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] if present, or use
    /// defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    tracing::info!(path = %default_path.display(), "Loading config");
                    Self::from_file(&default_path)?
                } else {
                    tracing::info!("No config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override endpoints and secrets from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CONTROL_CENTER_API_URL") {
            self.control_center.api_url = v;
        }
        if let Some(v) = get("CONTROL_CENTER_API_TOKEN") {
            self.control_center.api_token = Some(v);
        }
        if let Some(v) = get("DISCORD_API_URL") {
            self.discord.bot_api_url = Some(v);
        }
        if let Some(v) = get("DISCORD_API_TOKEN") {
            self.discord.bot_api_token = Some(v);
        }
        if let Some(v) = get("DISCORD_WEBHOOK_URL") {
            self.discord.webhook_url = Some(v);
        }
        if let Some(v) = get("DISCORD_MENTION_ROLE_ID") {
            self.discord.mention_role_id = Some(v);
        }
        if let Some(v) = get("VATSIM_BOOKING_API_URL") {
            self.aggregate_sync.api_url = Some(v);
        }
        if let Some(v) = get("VATSIM_BOOKING_API_KEY") {
            self.aggregate_sync.api_key = Some(v);
        }
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.reminder_interval_secs == 0 || s.reset_interval_secs == 0 {
            return Err(SyncError::Config("scheduler intervals must be > 0".to_string()));
        }
        if s.reset_min_elapsed_hours > s.reset_max_elapsed_hours {
            return Err(SyncError::Config(
                "scheduler.reset_min_elapsed_hours must not exceed reset_max_elapsed_hours".to_string(),
            ));
        }
        if self.aggregate_sync.max_attempts == 0 {
            return Err(SyncError::Config("aggregate_sync.max_attempts must be > 0".to_string()));
        }
        if self.aggregate_sync.backoff_secs.is_empty() {
            return Err(SyncError::Config("aggregate_sync.backoff_secs must not be empty".to_string()));
        }
        if self.worker.max_concurrent == 0 {
            return Err(SyncError::Config("worker.max_concurrent must be > 0".to_string()));
        }
        self.display.tz()?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = SyncError;

    /// Parse and validate a TOML document. Environment overrides are not
    /// applied.
    fn from_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Resource-booking system ("Control Center").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCenterConfig {
    pub api_url: String,
    /// Without a token booking calls are skipped.
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub booking_tag: u32,
    pub booking_source: String,
}

impl Default for ControlCenterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://cc.vatsim-scandinavia.org/api".to_string(),
            api_token: None,
            timeout_secs: 10,
            booking_tag: 3,
            booking_source: "Discord".to_string(),
        }
    }
}

impl ControlCenterConfig {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs)
    }
}

/// Chat bot (summary publishing) and webhook (reminders).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Without a URL summary refreshes are skipped.
    pub bot_api_url: Option<String>,
    pub bot_api_token: Option<String>,
    /// Without a URL reminders are not sent.
    pub webhook_url: Option<String>,
    /// Role mentioned in reminders; `@everyone` when unset.
    pub mention_role_id: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_api_url: None,
            bot_api_token: None,
            webhook_url: None,
            mention_role_id: None,
            timeout_secs: 10,
        }
    }
}

impl DiscordConfig {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs)
    }
}

/// Network-wide booking API fed by the per-section sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateSyncConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// Delay before attempt 2, 3, ...; the last entry repeats.
    pub backoff_secs: Vec<u64>,
}

impl Default for AggregateSyncConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            timeout_secs: 30,
            max_attempts: 3,
            backoff_secs: vec![60, 300, 900],
        }
    }
}

impl AggregateSyncConfig {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub reminder_interval_secs: u64,
    pub reminder_lead_minutes: i64,
    pub reminder_buffer_minutes: i64,
    pub reminder_lookahead_days: i64,
    pub reminder_scan_limit: usize,
    pub reset_interval_secs: u64,
    pub reset_min_elapsed_hours: i64,
    pub reset_max_elapsed_hours: i64,
    pub reset_horizon_months: u32,
    pub reset_scan_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reminder_interval_secs: 300,
            reminder_lead_minutes: 120,
            reminder_buffer_minutes: 5,
            reminder_lookahead_days: 7,
            reminder_scan_limit: 50,
            reset_interval_secs: 3600,
            reset_min_elapsed_hours: 1,
            reset_max_elapsed_hours: 24,
            reset_horizon_months: 3,
            reset_scan_limit: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn reminder_policy(&self) -> ReminderPolicy {
        ReminderPolicy {
            lead: Duration::minutes(self.reminder_lead_minutes),
            buffer: Duration::minutes(self.reminder_buffer_minutes),
            lookahead: Duration::days(self.reminder_lookahead_days),
            scan_limit: self.reminder_scan_limit,
        }
    }

    pub fn reset_policy(&self) -> ResetPolicy {
        ResetPolicy {
            min_elapsed: Duration::hours(self.reset_min_elapsed_hours),
            max_elapsed: Duration::hours(self.reset_max_elapsed_hours),
            horizon_months: self.reset_horizon_months,
            scan_limit: self.reset_scan_limit,
        }
    }

    pub fn reminder_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.reminder_interval_secs)
    }

    pub fn reset_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.reset_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Background tasks handled at once.
    pub max_concurrent: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// IANA zone used when rendering times for people.
    pub timezone: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

impl DisplayConfig {
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone).map_err(SyncError::from)
    }
}
