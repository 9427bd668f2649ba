//! HTTP clients for the external systems, each behind a trait so the
//! reconciler can be driven by test doubles.

pub mod aggregate;
pub mod control_center;
pub mod discord;

pub use aggregate::{AggregateSyncApi, SectionSyncRequest, VatsimBookingClient};
pub use control_center::{BookingRequest, ControlCenterClient, ResourceBookingApi};
pub use discord::{ChatNotifier, DiscordClient, SummaryAction};
