//! Spotwatch - electricity spot price worker.
//!
//! This library provides the modules behind the `spotwatch` binary:
//! - price lookups with day-aware caching
//! - a scheduler announcing tomorrow's prices once they are published
//! - RabbitMQ consumers keeping per-user price settings in sync
//! - a small HTTP API over prices and settings
//!
//! ## Architecture
//!
//! ```text
//! spot price API → PriceService (+ ExpiringCache) → HTTP API
//!                                                 → Scheduler → push_notifications_exchange
//! user_notifications_exchange → Consumers → SettingsStore
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod price;
pub mod queue;
pub mod scheduler;
pub mod settings;
pub mod web;

// Re-export commonly used types
pub use cache::{Expiration, ExpiringCache};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use price::{PriceService, SpotPriceClient, SpotPriceSource, TodayTomorrowPrice};
pub use queue::{ConnectionManager, Consumer, Producer, QueueBinding};
pub use scheduler::Scheduler;
pub use settings::{MemorySettingsStore, SettingsStore};
pub use web::AppState;
