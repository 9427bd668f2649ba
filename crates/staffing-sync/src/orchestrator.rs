//! Background reconciliation of local booking state with external systems.
//!
//! Side-effect intents produced by the booking state machine are queued as
//! [`Task`]s and handled by a [`Worker`] pool. Local state is never rolled
//! back: external failures are logged and leave the external reference
//! empty until the next state change.
//!
//! Failed section syncs are re-queued after a delay. On shutdown the
//! [`Worker`] handles whatever is still queued and cuts pending retry delays
//! short, so nothing accepted before shutdown is dropped.
//!
//! Summary refreshes are coalesced per event. While a refresh for an event
//! is queued, further requests for it are absorbed; the refresh reads the
//! latest state when it runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use staffing_engine::booking::{BookingRef, EventId, Occupant, PositionId, SectionId, SideEffect};
use staffing_engine::occurrence::WindowQuery;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::clients::{AggregateSyncApi, BookingRequest, ChatNotifier, ResourceBookingApi, SectionSyncRequest, SummaryAction};
use crate::config::{AggregateSyncConfig, ControlCenterConfig};
use crate::error::{Result, SyncError};
use crate::store::StaffingStore;

// ── Tasks and queue ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Effect(SideEffect),
    /// Explicit first publish of an event's summary.
    SetupSummary { event_id: EventId },
    /// Push one section to the aggregate booking API. `attempt` starts at 1.
    SyncSection { section_id: SectionId, attempt: u32 },
}

impl Task {
    fn coalesce_key(&self) -> Option<EventId> {
        match self {
            Self::Effect(SideEffect::RefreshSummary { event_id }) => Some(*event_id),
            _ => None,
        }
    }
}

/// Sending half of the task queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
    pending_refresh: Arc<Mutex<HashSet<EventId>>>,
}

impl TaskQueue {
    pub fn new() -> (Self, TaskReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending_refresh = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                tx,
                pending_refresh: pending_refresh.clone(),
            },
            TaskReceiver { rx, pending_refresh },
        )
    }

    /// Queue `task`. Returns `false` if it was absorbed by a pending refresh
    /// or the receiver is gone.
    pub fn enqueue(&self, task: Task) -> bool {
        let key = task.coalesce_key();
        if let Some(event_id) = key {
            if !self.pending_refresh.lock().insert(event_id) {
                debug!(event_id = %event_id, "Summary refresh already pending");
                return false;
            }
        }
        if self.tx.send(task).is_err() {
            warn!("Task queue closed, dropping task");
            if let Some(event_id) = key {
                self.pending_refresh.lock().remove(&event_id);
            }
            return false;
        }
        true
    }

    pub fn enqueue_effects(&self, effects: impl IntoIterator<Item = SideEffect>) {
        for effect in effects {
            self.enqueue(Task::Effect(effect));
        }
    }
}

/// Receiving half of the task queue.
pub struct TaskReceiver {
    rx: mpsc::UnboundedReceiver<Task>,
    pending_refresh: Arc<Mutex<HashSet<EventId>>>,
}

impl TaskReceiver {
    pub async fn recv(&mut self) -> Option<Task> {
        let task = self.rx.recv().await?;
        self.started(&task);
        Some(task)
    }

    pub fn try_recv(&mut self) -> Option<Task> {
        let task = self.rx.try_recv().ok()?;
        self.started(&task);
        Some(task)
    }

    /// A refresh leaves the pending set as soon as it is picked up, so a
    /// change made while it runs queues a new one.
    fn started(&self, task: &Task) {
        if let Some(event_id) = task.coalesce_key() {
            self.pending_refresh.lock().remove(&event_id);
        }
    }
}

// ── Retry policy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt 2, 3, ...; the last entry repeats.
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: [60, 300, 900].into_iter().map(Duration::from_secs).collect(),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AggregateSyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    pub fn delay_before(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(2) as usize;
        self.backoff
            .get(index)
            .or(self.backoff.last())
            .copied()
            .unwrap_or_default()
    }
}

// ── Reconciler ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Skipped(&'static str),
    Failed(String),
    Retrying { next_attempt: u32, delay: Duration },
    Exhausted,
}

/// Handles one task at a time against the store and the external clients.
pub struct Reconciler {
    store: Arc<dyn StaffingStore>,
    bookings: Arc<dyn ResourceBookingApi>,
    chat: Arc<dyn ChatNotifier>,
    aggregate: Arc<dyn AggregateSyncApi>,
    queue: TaskQueue,
    retry: RetryPolicy,
    booking_tag: u32,
    booking_source: String,
    /// Delayed re-enqueues of failed section syncs.
    retries: Mutex<JoinSet<()>>,
    /// Flipped to `true` to end every retry delay early.
    flush: watch::Sender<bool>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StaffingStore>,
        bookings: Arc<dyn ResourceBookingApi>,
        chat: Arc<dyn ChatNotifier>,
        aggregate: Arc<dyn AggregateSyncApi>,
        queue: TaskQueue,
    ) -> Self {
        let defaults = ControlCenterConfig::default();
        Self {
            store,
            bookings,
            chat,
            aggregate,
            queue,
            retry: RetryPolicy::default(),
            booking_tag: defaults.booking_tag,
            booking_source: defaults.booking_source,
            retries: Mutex::new(JoinSet::new()),
            flush: watch::Sender::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_booking_defaults(mut self, tag: u32, source: impl Into<String>) -> Self {
        self.booking_tag = tag;
        self.booking_source = source.into();
        self
    }

    pub async fn handle(&self, task: Task) -> TaskOutcome {
        let result = match &task {
            Task::Effect(SideEffect::MirrorBooking {
                event_id,
                position_id,
                occupant,
            }) => self.mirror(*event_id, *position_id, occupant).await,
            Task::Effect(SideEffect::UnmirrorBooking {
                position_id,
                booking_ref,
                ..
            }) => self.unmirror(*position_id, *booking_ref).await,
            Task::Effect(SideEffect::RefreshSummary { event_id }) => self.refresh(*event_id, None).await,
            Task::SetupSummary { event_id } => self.refresh(*event_id, Some(SummaryAction::Setup)).await,
            Task::SyncSection { section_id, attempt } => return self.sync_section(*section_id, *attempt).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(task = ?task, error = %e, "Background task failed");
                TaskOutcome::Failed(e.to_string())
            }
        }
    }

    /// Handle everything currently queued, without waiting for more.
    pub async fn run_pending(&self, receiver: &mut TaskReceiver) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while let Some(task) = receiver.try_recv() {
            outcomes.push(self.handle(task).await);
        }
        outcomes
    }

    async fn mirror(&self, event_id: EventId, position_id: PositionId, occupant: &Occupant) -> Result<TaskOutcome> {
        let Some(event) = self.store.event(event_id).await? else {
            return Ok(TaskOutcome::Skipped("event no longer exists"));
        };
        let Some(position) = self.store.position(position_id).await? else {
            return Ok(TaskOutcome::Skipped("position no longer exists"));
        };
        if position.occupant() != Some(occupant) {
            debug!(position_id = %position_id, "Occupant changed before mirror, skipping");
            return Ok(TaskOutcome::Skipped("occupant changed"));
        }
        if position.external_booking_ref.is_some() {
            debug!(position_id = %position_id, "Position already mirrored, skipping");
            return Ok(TaskOutcome::Skipped("already mirrored"));
        }

        let now = Utc::now();
        let occurrence = event.next_occurrence(now, &WindowQuery::upcoming(now));
        let request = BookingRequest::new(
            &position.slot_id,
            occupant.cid(),
            &position.booking_window(&occurrence),
            self.booking_tag,
            self.booking_source.as_str(),
        );

        let Some(booking_ref) = self.bookings.create_booking(&request).await? else {
            return Ok(TaskOutcome::Skipped("resource booking not configured"));
        };

        if self.store.attach_booking_ref(position_id, occupant, booking_ref).await? {
            info!(
                event_id = %event_id,
                position_id = %position_id,
                booking_ref = %booking_ref,
                "External booking stored"
            );
            return Ok(TaskOutcome::Completed);
        }

        warn!(
            position_id = %position_id,
            booking_ref = %booking_ref,
            "Position changed or was mirrored while booking was created, deleting orphaned booking"
        );
        if let Err(e) = self.bookings.delete_booking(booking_ref).await {
            warn!(booking_ref = %booking_ref, error = %e, "Failed to delete orphaned booking");
        }
        Ok(TaskOutcome::Completed)
    }

    async fn unmirror(&self, position_id: PositionId, booking_ref: BookingRef) -> Result<TaskOutcome> {
        if self.bookings.delete_booking(booking_ref).await? {
            debug!(position_id = %position_id, booking_ref = %booking_ref, "External booking removed");
            Ok(TaskOutcome::Completed)
        } else {
            Ok(TaskOutcome::Skipped("resource booking not configured"))
        }
    }

    async fn refresh(&self, event_id: EventId, forced: Option<SummaryAction>) -> Result<TaskOutcome> {
        let Some(event) = self.store.event(event_id).await? else {
            return Ok(TaskOutcome::Skipped("event no longer exists"));
        };
        if event.channel.is_none() {
            return Ok(TaskOutcome::Skipped("no chat channel"));
        }
        let first_section = self.store.sections(event_id).await?.first().map(|s| s.id);
        let action = forced.unwrap_or_else(|| SummaryAction::for_event(&event));

        if self.chat.publish_summary(&event, first_section, action).await? {
            Ok(TaskOutcome::Completed)
        } else {
            Ok(TaskOutcome::Skipped("chat bot not configured"))
        }
    }

    async fn sync_section(&self, section_id: SectionId, attempt: u32) -> TaskOutcome {
        info!(section_id = %section_id, attempt, "Starting aggregate sync");

        match self.try_sync_section(section_id).await {
            Ok(outcome) => outcome,
            Err(e) if attempt < self.retry.max_attempts => {
                let next_attempt = attempt + 1;
                let delay = self.retry.delay_before(next_attempt);
                warn!(
                    section_id = %section_id,
                    attempt,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "Aggregate sync failed, retrying"
                );
                self.schedule_retry(
                    Task::SyncSection {
                        section_id,
                        attempt: next_attempt,
                    },
                    delay,
                );
                TaskOutcome::Retrying { next_attempt, delay }
            }
            Err(e) => {
                let exhausted = SyncError::SyncRetriesExhausted {
                    section_id,
                    attempts: attempt,
                };
                error!(section_id = %section_id, last_error = %e, "{exhausted}");
                TaskOutcome::Exhausted
            }
        }
    }

    fn schedule_retry(&self, task: Task, delay: Duration) {
        let queue = self.queue.clone();
        let mut flush = self.flush.subscribe();
        let mut retries = self.retries.lock();
        while retries.try_join_next().is_some() {}
        retries.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = flush.wait_for(|flushed| *flushed) => {}
            }
            queue.enqueue(task);
        });
    }

    /// Re-enqueue every delayed retry now, and any scheduled from here on
    /// immediately. Returns once they are all back in the queue, with the
    /// number flushed.
    pub async fn flush_retries(&self) -> usize {
        self.flush.send_replace(true);
        let mut pending = std::mem::take(&mut *self.retries.lock());
        let mut flushed = 0;
        while pending.join_next().await.is_some() {
            flushed += 1;
        }
        flushed
    }

    async fn try_sync_section(&self, section_id: SectionId) -> Result<TaskOutcome> {
        let Some(section) = self.store.section(section_id).await? else {
            return Ok(TaskOutcome::Skipped("section no longer exists"));
        };
        let Some(event) = self.store.event(section.event_id).await? else {
            return Ok(TaskOutcome::Skipped("event no longer exists"));
        };
        let positions = self.store.positions_for_section(section_id).await?;

        let now = Utc::now();
        let occurrence = event.next_occurrence(now, &WindowQuery::upcoming(now));
        let request = SectionSyncRequest::new(&event, &occurrence, &positions);

        if !self.aggregate.sync_section(&section, &request).await? {
            return Ok(TaskOutcome::Skipped("aggregate booking API not configured"));
        }
        self.store.mark_section_synced(section_id, Utc::now()).await?;
        Ok(TaskOutcome::Completed)
    }
}

// ── Worker pool ─────────────────────────────────────────────────────────────

/// Drains the queue, handling up to `max_concurrent` tasks at once.
pub struct Worker {
    reconciler: Arc<Reconciler>,
    receiver: TaskReceiver,
    max_concurrent: u32,
    permits: Arc<Semaphore>,
}

impl Worker {
    pub fn new(reconciler: Arc<Reconciler>, receiver: TaskReceiver, max_concurrent: u32) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            reconciler,
            receiver,
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent as usize)),
        }
    }

    /// Run until `shutdown` flips to `true` or every sender is dropped.
    ///
    /// Before returning, everything still queued is handled, including
    /// section sync retries whose delay has not yet elapsed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(max_concurrent = self.max_concurrent, "Worker started");

        loop {
            let task = tokio::select! {
                task = self.receiver.recv() => task,
                _ = shutdown.changed() => None,
            };
            let Some(task) = task else { break };
            if !self.dispatch(task).await {
                break;
            }
        }

        info!("Worker draining queue");
        loop {
            let mut drained = 0;
            while let Some(task) = self.receiver.try_recv() {
                self.dispatch(task).await;
                drained += 1;
            }
            if !self.wait_idle().await {
                break;
            }
            let flushed = self.reconciler.flush_retries().await;
            if drained == 0 && flushed == 0 {
                break;
            }
        }
        info!("Worker stopped");
    }

    async fn dispatch(&self, task: Task) -> bool {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return false;
        };
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            reconciler.handle(task).await;
        });
        true
    }

    /// Wait until no task is in flight.
    async fn wait_idle(&self) -> bool {
        self.permits.acquire_many(self.max_concurrent).await.is_ok()
    }
}
