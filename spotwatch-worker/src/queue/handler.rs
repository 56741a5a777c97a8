//! Delivery handlers and settlement decisions.
//!
//! Deliveries are processed before they are settled. The outcome of the
//! handler decides how the broker is told about it:
//!
//! | outcome                          | settlement              |
//! |----------------------------------|-------------------------|
//! | `Ok`                             | ack                     |
//! | transient error (I/O, upstream)  | nack, requeue           |
//! | any other error                  | nack, no requeue (drop) |

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::types::UserEvent;
use crate::error::{Error, Result};
use crate::settings::SettingsStore;

/// Processes one delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<()>;
}

/// How a processed delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Drop,
}

impl Disposition {
    pub fn for_outcome(outcome: &Result<()>) -> Self {
        match outcome {
            Ok(()) => Disposition::Ack,
            Err(e) if e.is_transient() => Disposition::Requeue,
            Err(_) => Disposition::Drop,
        }
    }
}

/// Mirrors user lifecycle events into the settings store.
///
/// Redelivery is expected, so both operations are idempotent: a duplicate
/// insert and a delete of an absent user count as already applied.
pub struct SettingsSyncHandler {
    store: Arc<dyn SettingsStore>,
}

impl SettingsSyncHandler {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MessageHandler for SettingsSyncHandler {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        match UserEvent::decode(routing_key, payload)? {
            UserEvent::Created(settings) => {
                let user_id = settings.user_id.clone();
                info!(user_id = %user_id, "user_created_received");
                match self.store.insert_price_settings(settings).await {
                    Err(Error::Conflict(_)) => {
                        debug!(user_id = %user_id, "user_created_already_applied");
                        Ok(())
                    }
                    other => other,
                }
            }
            UserEvent::Deleted(user_id) => {
                info!(user_id = %user_id, "user_deleted_received");
                match self.store.delete_price_settings(&user_id).await {
                    Err(Error::NotFound(_)) => {
                        debug!(user_id = %user_id, "user_deleted_already_applied");
                        Ok(())
                    }
                    other => other,
                }
            }
        }
    }
}
