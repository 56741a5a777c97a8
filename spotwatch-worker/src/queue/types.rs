//! Exchange, queue and routing key names plus the message formats carried
//! over them.
//!
//! - `user_notifications_exchange` (topic): user lifecycle events consumed
//!   here to keep price settings in sync.
//! - `push_notifications_exchange` (topic): "tomorrow's price is ready"
//!   notifications produced by the scheduler.

use crate::error::{Error, Result};
use crate::price::PriceSettings;

/// Exchange carrying user lifecycle events.
pub const USER_NOTIFICATIONS_EXCHANGE: &str = "user_notifications_exchange";

/// Exchange carrying push notifications for end users.
pub const PUSH_NOTIFICATIONS_EXCHANGE: &str = "push_notifications_exchange";

pub const USER_CREATED_KEY: &str = "user.created";
pub const USER_DELETED_KEY: &str = "user.deleted";
pub const PRICE_READY_KEY: &str = "notification.price.tomorrow";

pub const USER_CREATION_QUEUE: &str = "user_creation_queue";
pub const USER_DELETION_QUEUE: &str = "user_deletion_queue";

/// Body of the price readiness notification.
pub const PRICE_READY_MESSAGE: &str = "electricity price notification";

// =============================================================================
// Queue Bindings
// =============================================================================

/// One queue bound to one exchange with one routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

impl QueueBinding {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
        }
    }

    /// Bindings of the user lifecycle consumers.
    pub fn user_lifecycle() -> Vec<QueueBinding> {
        vec![
            QueueBinding::new(USER_NOTIFICATIONS_EXCHANGE, USER_CREATED_KEY, USER_CREATION_QUEUE),
            QueueBinding::new(USER_NOTIFICATIONS_EXCHANGE, USER_DELETED_KEY, USER_DELETION_QUEUE),
        ]
    }

    /// Correlation id of the worker consuming this binding.
    pub fn worker_id(&self) -> String {
        format!("consumer:{}", self.queue)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub content_type: &'static str,
}

impl NotificationMessage {
    pub fn price_ready() -> Self {
        Self {
            routing_key: PRICE_READY_KEY.to_string(),
            payload: PRICE_READY_MESSAGE.as_bytes().to_vec(),
            content_type: "text/plain",
        }
    }
}

/// A decoded user lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// JSON price settings for a newly created user
    Created(PriceSettings),
    /// Raw id of a deleted user
    Deleted(String),
}

impl UserEvent {
    /// Decode a delivery by its routing key.
    pub fn decode(routing_key: &str, payload: &[u8]) -> Result<Self> {
        match routing_key {
            USER_CREATED_KEY => Ok(UserEvent::Created(serde_json::from_slice(payload)?)),
            USER_DELETED_KEY => {
                let user_id = std::str::from_utf8(payload)
                    .map_err(|e| Error::Validation(format!("user id is not valid UTF-8: {e}")))?;
                if user_id.is_empty() {
                    return Err(Error::Validation("deleted user id is empty".to_string()));
                }
                Ok(UserEvent::Deleted(user_id.to_string()))
            }
            other => Err(Error::UnroutableMessage(other.to_string())),
        }
    }
}
