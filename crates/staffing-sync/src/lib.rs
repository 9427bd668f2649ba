//! # staffing-sync
//!
//! Service layer around `staffing-engine`.
//!
//! Local booking state is the source of truth. Every confirmed change is
//! written to the store first; mirroring it into the resource-booking system,
//! refreshing the chat summary and syncing the network-wide booking API then
//! happen on a background worker that never rolls local state back.
//!
//! ## Modules
//!
//! - [`service`]: Request surface: book, unbook, reset, summaries, occurrences
//! - [`orchestrator`]: Task queue, reconciler and worker pool
//! - [`automation`]: Pre-event reminders and post-occurrence resets
//! - [`store`]: Storage trait and the in-memory snapshot store
//! - [`clients`]: HTTP clients for the external systems
//! - [`summary`]: Staffing summary read model
//! - [`config`]: TOML/env configuration
//! - [`error`]: Error types

pub mod automation;
pub mod clients;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod service;
pub mod store;
pub mod summary;

#[cfg(test)]
pub(crate) mod testing;

pub use automation::{Automation, SingleFlight, TaskReport};
pub use config::Config;
pub use error::SyncError;
pub use orchestrator::{Reconciler, RetryPolicy, Task, TaskOutcome, TaskQueue, TaskReceiver, Worker};
pub use service::{ResetReport, StaffingService};
pub use store::{InMemoryStore, StaffingStore, StoreSnapshot};
pub use summary::{build_summary, StaffingSummary};
