//! `staffing`: command-line front end for the event staffing scheduler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use staffing_engine::booking::EventId;
use staffing_engine::occurrence::{windows, OccurrenceKey, OccurrenceSet, OccurrenceWindow, WindowQuery};
use staffing_engine::recurrence::{RecurrenceRule, DEFAULT_EXPANSION_LIMIT};
use staffing_engine::temporal::{parse_rfc3339, parse_timezone};
use staffing_sync::clients::{ControlCenterClient, DiscordClient, VatsimBookingClient};
use staffing_sync::{
    Automation, Config, InMemoryStore, Reconciler, RetryPolicy, StaffingService, TaskQueue, Worker,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "staffing", version, about = "Event staffing scheduler")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a recurrence rule and print its canonical form
    Validate {
        /// Rule text, e.g. "FREQ=WEEKLY;BYDAY=SU"
        rule: String,
    },
    /// List the occurrence windows of a rule
    Expand {
        rule: String,
        /// Anchor start (RFC 3339)
        #[arg(long)]
        start: String,
        /// Occurrence length in minutes
        #[arg(long, default_value_t = 120)]
        duration_minutes: i64,
        /// Last admissible start (RFC 3339); defaults to one year after the anchor
        #[arg(long)]
        until: Option<String>,
        #[arg(long, default_value_t = DEFAULT_EXPANSION_LIMIT)]
        limit: usize,
        /// Cancelled occurrence key ("YYYY-MM-DD HH:MM"), repeatable
        #[arg(long = "exclude")]
        excluded: Vec<String>,
        /// Keep cancelled windows in the output, flagged
        #[arg(long)]
        show_cancelled: bool,
        /// Print times in this IANA timezone
        #[arg(long)]
        tz: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print an event's staffing summary from a snapshot file as JSON
    Summary {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        event: u64,
        /// Evaluate as of this instant (RFC 3339) instead of now
        #[arg(long)]
        now: Option<String>,
        /// IANA timezone for the display end
        #[arg(long, default_value = "UTC")]
        tz: String,
    },
    /// Run the worker pool and scheduled tasks over a snapshot file
    Run {
        #[arg(long)]
        snapshot: PathBuf,
        /// TOML config; defaults to ./staffing.toml when present
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Validate { rule } => validate(&rule),
        Command::Expand {
            rule,
            start,
            duration_minutes,
            until,
            limit,
            excluded,
            show_cancelled,
            tz,
            json,
        } => {
            let anchor = parse_rfc3339(&start)?;
            let horizon = match until {
                Some(until) => parse_rfc3339(&until)?,
                None => anchor + Duration::days(365),
            };
            let exceptions = excluded
                .iter()
                .map(|k| k.parse::<OccurrenceKey>())
                .collect::<Result<OccurrenceSet, _>>()?;
            let mut query = WindowQuery::new(horizon, limit);
            if show_cancelled {
                query = query.including_cancelled();
            }
            let duration = Duration::minutes(duration_minutes);

            rule.parse::<RecurrenceRule>()
                .with_context(|| format!("Invalid recurrence rule: {rule}"))?;
            let expanded = windows(&rule, anchor, duration, &exceptions, &query);
            print_windows(&expanded, tz.as_deref(), json)
        }
        Command::Summary {
            snapshot,
            event,
            now,
            tz,
        } => {
            let now = match now {
                Some(now) => parse_rfc3339(&now)?,
                None => Utc::now(),
            };
            let store = Arc::new(load_snapshot(&snapshot)?);
            let (queue, _receiver) = TaskQueue::new();
            let service = StaffingService::new(store, queue).with_display_timezone(parse_timezone(&tz)?);
            let summary = service.staffing_summary(EventId(event), now).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Run { snapshot, config } => run(&snapshot, config.as_deref()).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn validate(rule: &str) -> Result<()> {
    let parsed: RecurrenceRule = rule.parse().with_context(|| format!("Invalid recurrence rule: {rule}"))?;
    println!("{parsed}");
    println!("{}", parsed.describe());
    Ok(())
}

fn print_windows(windows: &[OccurrenceWindow], tz: Option<&str>, json: bool) -> Result<()> {
    let tz = tz.map(parse_timezone).transpose()?;
    let format = |dt: DateTime<Utc>| match tz {
        Some(tz) => dt.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string(),
        None => dt.format("%Y-%m-%d %H:%M").to_string(),
    };

    if json {
        let rows: Vec<serde_json::Value> = windows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "key": w.key().to_string(),
                    "start": format(w.start),
                    "end": format(w.end),
                    "cancelled": w.cancelled,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for w in windows {
        let flag = if w.cancelled { "  (cancelled)" } else { "" };
        println!("{} - {}{}", format(w.start), format(w.end), flag);
    }
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<InMemoryStore> {
    InMemoryStore::load(path).with_context(|| format!("Failed to load snapshot {}", path.display()))
}

async fn run(snapshot: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let store = Arc::new(load_snapshot(snapshot)?);

    let scheduler = &config.scheduler;
    let reminder_policy = scheduler.reminder_policy();
    let bookings = Arc::new(ControlCenterClient::new(&config.control_center)?);
    let chat = Arc::new(DiscordClient::new(&config.discord, reminder_policy.lead)?);
    let aggregate = Arc::new(VatsimBookingClient::new(&config.aggregate_sync)?);

    let (queue, receiver) = TaskQueue::new();
    let reconciler = Reconciler::new(store.clone(), bookings, chat.clone(), aggregate, queue.clone())
        .with_retry(RetryPolicy::from_config(&config.aggregate_sync))
        .with_booking_defaults(
            config.control_center.booking_tag,
            config.control_center.booking_source.clone(),
        );
    let service = StaffingService::new(store.clone(), queue).with_display_timezone(config.display.tz()?);

    let (worker_stop_tx, worker_stop_rx) = watch::channel(false);
    let (automation_stop_tx, automation_stop_rx) = watch::channel(false);
    let worker = Worker::new(Arc::new(reconciler), receiver, config.worker.max_concurrent);
    let worker_handle = tokio::spawn(worker.run(worker_stop_rx));

    let automation_handle = if scheduler.enabled {
        let automation = Arc::new(
            Automation::new(service.clone(), chat).with_policies(reminder_policy, scheduler.reset_policy()),
        );
        Some(automation.spawn(
            scheduler.reminder_interval(),
            scheduler.reset_interval(),
            automation_stop_rx,
        ))
    } else {
        info!("Scheduled tasks disabled");
        None
    };

    let events = service.list_events().await?.len();
    info!(events, snapshot = %snapshot.display(), "Staffing service running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    // Stop producers first so the worker drains everything they queued.
    // Receivers may already be gone if a task exited early.
    let _ = automation_stop_tx.send(true);
    if let Some(handle) = automation_handle {
        handle.await.context("Automation task panicked")?;
    }
    let _ = worker_stop_tx.send(true);
    worker_handle.await.context("Worker task panicked")?;

    store
        .save(snapshot)
        .await
        .with_context(|| format!("Failed to save snapshot {}", snapshot.display()))?;
    info!(snapshot = %snapshot.display(), "Snapshot saved");
    Ok(())
}
