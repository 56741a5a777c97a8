//! Scheduled background jobs.
//!
//! Currently a single job: poll the price source during the afternoon
//! window and announce tomorrow's prices once per day.

pub mod jobs;
pub mod notifier;
pub mod window;

pub use jobs::{Scheduler, TickOutcome, PRICE_POLL_WORKER};
pub use notifier::{AvailabilityCheck, BrokerNotifier, Notifier};
pub use window::{PollingState, PollingWindow};
