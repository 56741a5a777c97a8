//! Exchange declarations shared by producers and consumers.

use lapin::{options::ExchangeDeclareOptions, types::FieldTable, Channel, ExchangeKind};
use tracing::info;

use crate::error::Result;

/// Declare a durable topic exchange. Idempotent when the exchange already
/// exists with the same arguments.
pub async fn declare_topic_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    info!(exchange = %exchange, kind = "topic", "rabbitmq_exchange_declared");
    Ok(())
}
