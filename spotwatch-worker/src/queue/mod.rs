//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - Connection lifecycle with bounded reconnects
//! - A producer for one-off notifications
//! - Consumers that keep price settings in sync with user lifecycle events
//!
//! ## Architecture
//!
//! ```text
//! user service → user_notifications_exchange → user_{creation,deletion}_queue → Consumer → settings store
//! Scheduler → Producer → push_notifications_exchange → notification service
//! ```

pub mod connection;
pub mod consumer;
pub mod handler;
pub mod publisher;
pub mod topology;
pub mod types;

pub use connection::{ConnectionManager, Reconnect, ReconnectPolicy};
pub use consumer::{
    process_deliveries, report, run_consumer, Consumer, Inbound, ListenExit, Settle,
};
pub use handler::{Disposition, MessageHandler, SettingsSyncHandler};
pub use publisher::Producer;
pub use types::{
    NotificationMessage, QueueBinding, UserEvent, PRICE_READY_KEY, PUSH_NOTIFICATIONS_EXCHANGE,
    USER_CREATED_KEY, USER_CREATION_QUEUE, USER_DELETED_KEY, USER_DELETION_QUEUE,
    USER_NOTIFICATIONS_EXCHANGE,
};
