//! Message producer.
//!
//! A [`Producer`] publishes on one channel taken from the
//! [`ConnectionManager`]. It never retries: a failed publish is returned to
//! the caller, which decides whether a later attempt makes sense.

use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use tracing::{error, info};

use super::connection::ConnectionManager;
use super::topology::declare_topic_exchange;
use super::types::{NotificationMessage, PUSH_NOTIFICATIONS_EXCHANGE};
use crate::error::{Error, Result};

pub struct Producer {
    channel: Channel,
    worker: String,
}

impl Producer {
    /// Open a producer channel on the manager's current connection.
    pub async fn open(connections: &ConnectionManager, worker: impl Into<String>) -> Result<Self> {
        let channel = connections.create_channel().await?;
        Ok(Self {
            channel,
            worker: worker.into(),
        })
    }

    /// Publish `message` to `exchange` under the message's routing key.
    ///
    /// Succeeds once the broker accepted the publish; this is not a consumer
    /// acknowledgement.
    pub async fn publish(&self, exchange: &str, message: &NotificationMessage) -> Result<()> {
        self.ensure_channel()?;

        self.channel
            .basic_publish(
                exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                BasicProperties::default()
                    .with_content_type(message.content_type.into())
                    .with_app_id(self.worker.clone().into()),
            )
            .await
            .map_err(|e| {
                error!(
                    worker = %self.worker,
                    exchange = %exchange,
                    routing_key = %message.routing_key,
                    error = %e,
                    "rabbitmq_publish_failed"
                );
                Error::Broker(e)
            })?;

        info!(
            worker = %self.worker,
            exchange = %exchange,
            routing_key = %message.routing_key,
            body_length = message.payload.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }

    /// Announce tomorrow's prices on the push notification exchange,
    /// declaring the exchange first.
    pub async fn publish_price_ready(&self) -> Result<()> {
        self.ensure_channel()?;
        declare_topic_exchange(&self.channel, PUSH_NOTIFICATIONS_EXCHANGE).await?;
        self.publish(PUSH_NOTIFICATIONS_EXCHANGE, &NotificationMessage::price_ready())
            .await
    }

    fn ensure_channel(&self) -> Result<()> {
        if self.channel.status().connected() {
            Ok(())
        } else {
            Err(Error::Invariant(format!(
                "[{}] producer channel is closed, ensure the connection is established",
                self.worker
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::connection::ReconnectPolicy;

    #[tokio::test]
    async fn test_open_without_connection_fails() {
        let manager = ConnectionManager::new("amqp://localhost:5672", ReconnectPolicy::default());
        let result = Producer::open(&manager, "scheduler:test").await;
        assert!(matches!(result, Err(Error::Invariant(_))));
    }
}
