//! Periodic tasks: pre-event reminders and post-occurrence resets.
//!
//! Each task is single-flight per name: a run that starts while the previous
//! one is still going is skipped. Failures are isolated per event; the batch
//! always continues.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use staffing_engine::schedule::{record_notified, reminder_candidates, reset_decision, ReminderPolicy, ResetPolicy};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clients::ChatNotifier;
use crate::service::StaffingService;

pub const REMINDER_TASK: &str = "pre_event_reminder";
pub const RESET_TASK: &str = "post_occurrence_reset";

// ── Single-flight guard ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<Mutex<HashSet<&'static str>>>,
}

impl SingleFlight {
    /// `None` while another holder of `name` is alive.
    pub fn try_acquire(&self, name: &'static str) -> Option<FlightGuard> {
        if !self.running.lock().insert(name) {
            return None;
        }
        Some(FlightGuard {
            running: self.running.clone(),
            name,
        })
    }
}

pub struct FlightGuard {
    running: Arc<Mutex<HashSet<&'static str>>>,
    name: &'static str,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running.lock().remove(self.name);
    }
}

// ── Tasks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task: &'static str,
    /// Events examined.
    pub processed: usize,
    /// Reminders sent, or events reset.
    pub acted: usize,
    pub failures: usize,
}

impl TaskReport {
    fn new(task: &'static str) -> Self {
        Self {
            task,
            processed: 0,
            acted: 0,
            failures: 0,
        }
    }
}

pub struct Automation {
    service: StaffingService,
    chat: Arc<dyn ChatNotifier>,
    reminder_policy: ReminderPolicy,
    reset_policy: ResetPolicy,
    flights: SingleFlight,
}

impl Automation {
    pub fn new(service: StaffingService, chat: Arc<dyn ChatNotifier>) -> Self {
        Self {
            service,
            chat,
            reminder_policy: ReminderPolicy::default(),
            reset_policy: ResetPolicy::default(),
            flights: SingleFlight::default(),
        }
    }

    pub fn with_policies(mut self, reminder: ReminderPolicy, reset: ResetPolicy) -> Self {
        self.reminder_policy = reminder;
        self.reset_policy = reset;
        self
    }

    pub fn flights(&self) -> &SingleFlight {
        &self.flights
    }

    /// Remind about every occurrence starting roughly one lead time from
    /// `now` that has not been announced yet. `None` if a run is in progress.
    pub async fn send_pre_event_reminders(&self, now: chrono::DateTime<Utc>) -> Option<TaskReport> {
        let Some(_guard) = self.flights.try_acquire(REMINDER_TASK) else {
            info!(task = REMINDER_TASK, "Previous run still in progress, skipping");
            return None;
        };
        let mut report = TaskReport::new(REMINDER_TASK);
        let store = self.service.store();

        let events = match store.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(task = REMINDER_TASK, error = %e, "Failed to load events");
                report.failures += 1;
                return Some(report);
            }
        };

        for event in events {
            report.processed += 1;
            let mut notified = event.notified.clone();

            for window in reminder_candidates(&event, now, &self.reminder_policy) {
                match self.chat.send_reminder(&event, window.start).await {
                    Ok(true) => {
                        notified = record_notified(&notified, window.key());
                        match store.set_notified(event.id, notified.clone()).await {
                            Ok(()) => report.acted += 1,
                            Err(e) => {
                                warn!(event_id = %event.id, error = %e, "Failed to record reminder");
                                report.failures += 1;
                            }
                        }
                    }
                    Ok(false) => debug!(event_id = %event.id, "Reminder skipped"),
                    Err(e) => {
                        warn!(
                            event_id = %event.id,
                            occurrence = %window.key(),
                            error = %e,
                            "Failed to send reminder"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        info!(
            task = REMINDER_TASK,
            processed = report.processed,
            sent = report.acted,
            failures = report.failures,
            "Reminder run finished"
        );
        Some(report)
    }

    /// Clear the positions of recurring events whose last occurrence has
    /// just completed. `None` if a run is in progress.
    pub async fn reset_completed_events(&self, now: chrono::DateTime<Utc>) -> Option<TaskReport> {
        let Some(_guard) = self.flights.try_acquire(RESET_TASK) else {
            info!(task = RESET_TASK, "Previous run still in progress, skipping");
            return None;
        };
        let mut report = TaskReport::new(RESET_TASK);
        let store = self.service.store();

        let events = match store.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(task = RESET_TASK, error = %e, "Failed to load events");
                report.failures += 1;
                return Some(report);
            }
        };

        for event in events.iter().filter(|e| e.is_recurring()) {
            report.processed += 1;

            let has_bookings = match store.positions_for_event(event.id).await {
                Ok(positions) => positions.iter().any(|p| p.is_booked()),
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Failed to load positions");
                    report.failures += 1;
                    continue;
                }
            };
            if !has_bookings {
                continue;
            }

            let decision = reset_decision(event, now, &self.reset_policy);
            if !decision.should_reset() {
                debug!(event_id = %event.id, decision = ?decision, "No reset");
                continue;
            }

            match self.service.reset_event(event.id).await {
                Ok(outcome) => {
                    if !outcome.cleared.is_empty() {
                        report.acted += 1;
                    }
                    report.failures += outcome.failed.len();
                }
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Failed to reset event");
                    report.failures += 1;
                }
            }
        }

        info!(
            task = RESET_TASK,
            processed = report.processed,
            reset = report.acted,
            failures = report.failures,
            "Reset run finished"
        );
        Some(report)
    }

    /// Run both tasks on their intervals until `shutdown` flips to `true`.
    pub fn spawn(
        self: Arc<Self>,
        reminder_interval: Duration,
        reset_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reminders = tokio::time::interval(reminder_interval);
            reminders.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut resets = tokio::time::interval(reset_interval);
            resets.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();

            loop {
                while runs.try_join_next().is_some() {}
                tokio::select! {
                    _ = reminders.tick() => {
                        let this = self.clone();
                        runs.spawn(async move { this.send_pre_event_reminders(Utc::now()).await; });
                    }
                    _ = resets.tick() => {
                        let this = self.clone();
                        runs.spawn(async move { this.reset_completed_events(Utc::now()).await; });
                    }
                    _ = shutdown.changed() => break,
                }
            }

            // Let runs already under way finish queueing their effects
            while runs.join_next().await.is_some() {}
            info!("Automation stopped");
        })
    }
}
