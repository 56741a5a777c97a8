//! Queue consumer using lapin.
//!
//! A [`Consumer`] owns one channel, one queue binding and one delivery loop.
//! Deliveries are handled one at a time in arrival order, then settled
//! according to the handler outcome (see [`Disposition`]).
//!
//! The loop itself lives in [`process_deliveries`], which only needs a
//! stream of [`Inbound`] deliveries and something that can [`Settle`] them.
//!
//! [`run_consumer`] wraps the consumer in a restart loop: when the delivery
//! stream fails or ends, or the [`ConnectionManager`] reports a reconnect, it
//! declares the binding again on the new connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Channel,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::connection::ConnectionManager;
use super::handler::{Disposition, MessageHandler};
use super::topology::declare_topic_exchange;
use super::types::QueueBinding;
use crate::error::{Error, Result};

/// Unacknowledged deliveries the broker may push ahead of processing.
const PREFETCH_COUNT: u16 = 16;

/// Pause before redeclaring after a failure on a live connection.
const RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    Declaring,
    Bound,
    Listening,
    Stopped,
}

/// Why a delivery loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenExit {
    /// The stop signal fired.
    Stopped,
    /// The delivery stream failed or ended.
    StreamClosed,
    /// The connection manager replaced the connection under the stream.
    Reconnected,
}

/// One delivery, detached from the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub data: Vec<u8>,
}

impl From<Delivery> for Inbound {
    fn from(delivery: Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            data: delivery.data,
        }
    }
}

/// Tells the broker what happened to a delivery.
#[async_trait]
pub trait Settle: Send + Sync {
    async fn settle(&self, delivery_tag: u64, disposition: Disposition) -> Result<()>;
}

#[async_trait]
impl Settle for Channel {
    async fn settle(&self, delivery_tag: u64, disposition: Disposition) -> Result<()> {
        match disposition {
            Disposition::Ack => {
                self.basic_ack(delivery_tag, BasicAckOptions::default())
                    .await?
            }
            Disposition::Requeue | Disposition::Drop => {
                self.basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue: disposition == Disposition::Requeue,
                        ..Default::default()
                    },
                )
                .await?
            }
        }
        Ok(())
    }
}

pub struct Consumer {
    channel: Channel,
    exchange: String,
    queue: Option<String>,
    worker: String,
    state: ConsumerState,
}

impl Consumer {
    /// Open a channel and declare the topic exchange the queue binds to.
    pub async fn open(
        connections: &ConnectionManager,
        exchange: impl Into<String>,
        worker: impl Into<String>,
    ) -> Result<Self> {
        let exchange = exchange.into();
        let worker = worker.into();

        let channel = connections.create_channel().await?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;
        declare_topic_exchange(&channel, &exchange).await?;

        info!(worker = %worker, exchange = %exchange, "rabbitmq_consumer_opened");

        Ok(Self {
            channel,
            exchange,
            queue: None,
            worker,
            state: ConsumerState::Declaring,
        })
    }

    /// Declare a non-durable, non-exclusive queue.
    ///
    /// Losing the queue on a broker restart is acceptable: downstream state
    /// is rebuilt from the settings store.
    pub async fn declare_queue(&mut self, name: &str) -> Result<()> {
        self.ensure_channel()?;

        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: false,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(
            worker = %self.worker,
            queue = %queue.name().as_str(),
            messages = queue.message_count(),
            "rabbitmq_queue_declared"
        );

        self.queue = Some(queue.name().as_str().to_string());
        Ok(())
    }

    /// Bind the declared queue to the exchange with `routing_key`.
    pub async fn bind_queue(&mut self, routing_key: &str) -> Result<()> {
        self.ensure_channel()?;
        let queue = self.queue.as_deref().ok_or_else(|| {
            Error::Invariant(format!(
                "[{}] queue must be declared before binding",
                self.worker
            ))
        })?;

        info!(
            worker = %self.worker,
            queue = %queue,
            exchange = %self.exchange,
            routing_key = %routing_key,
            "rabbitmq_queue_binding"
        );

        self.channel
            .queue_bind(
                queue,
                &self.exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        self.state = ConsumerState::Bound;
        Ok(())
    }

    /// Consume deliveries until `stop` fires, the broker ends or fails the
    /// stream, or `reconnects` reports a new connection.
    pub async fn listen<H>(
        &mut self,
        handler: &H,
        stop: &CancellationToken,
        reconnects: &mut watch::Receiver<u64>,
        errors: &mpsc::Sender<Error>,
    ) -> Result<ListenExit>
    where
        H: MessageHandler + ?Sized,
    {
        if self.state != ConsumerState::Bound {
            return Err(Error::Invariant(format!(
                "[{}] consumer must be bound before listening",
                self.worker
            )));
        }
        let queue = self.queue.clone().unwrap_or_default();

        let deliveries = self
            .channel
            .basic_consume(
                &queue,
                &self.worker,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.state = ConsumerState::Listening;
        info!(worker = %self.worker, queue = %queue, "rabbitmq_consumer_listening");

        let deliveries = deliveries.map(|delivery| {
            delivery
                .map(Inbound::from)
                .map_err(Error::Broker)
        });
        let exit = process_deliveries(
            deliveries,
            handler,
            &self.channel,
            stop,
            reconnects,
            errors,
            &self.worker,
        )
        .await;

        self.state = ConsumerState::Stopped;
        exit
    }

    fn ensure_channel(&self) -> Result<()> {
        if self.channel.status().connected() {
            Ok(())
        } else {
            Err(Error::Invariant(format!(
                "[{}] consumer channel is closed, ensure the connection is established",
                self.worker
            )))
        }
    }
}

/// Handle deliveries one at a time, settling each after its handler ran.
///
/// Handler failures are reported on `errors` and never end the loop. A
/// delivery error is terminal: the client yields one error when the
/// connection drops and then nothing, so the loop reports it and returns
/// [`ListenExit::StreamClosed`]. A failed settle means the channel is gone
/// and is returned as an error.
pub async fn process_deliveries<S, H, A>(
    deliveries: S,
    handler: &H,
    settler: &A,
    stop: &CancellationToken,
    reconnects: &mut watch::Receiver<u64>,
    errors: &mpsc::Sender<Error>,
    worker: &str,
) -> Result<ListenExit>
where
    S: Stream<Item = Result<Inbound>>,
    H: MessageHandler + ?Sized,
    A: Settle + ?Sized,
{
    tokio::pin!(deliveries);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!(worker = %worker, "rabbitmq_consumer_stopping");
                return Ok(ListenExit::Stopped);
            }
            Ok(()) = reconnects.changed() => {
                warn!(worker = %worker, "rabbitmq_consumer_connection_replaced");
                return Ok(ListenExit::Reconnected);
            }
            delivery = deliveries.next() => {
                let delivery = match delivery {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        error!(worker = %worker, error = %e, "rabbitmq_delivery_error");
                        report(errors, worker, e);
                        return Ok(ListenExit::StreamClosed);
                    }
                    None => {
                        warn!(worker = %worker, "rabbitmq_consumer_closed");
                        return Ok(ListenExit::StreamClosed);
                    }
                };

                info!(
                    worker = %worker,
                    routing_key = %delivery.routing_key,
                    delivery_tag = delivery.delivery_tag,
                    redelivered = delivery.redelivered,
                    body_length = delivery.data.len(),
                    "rabbitmq_message_received"
                );

                let outcome = handler.handle(&delivery.routing_key, &delivery.data).await;
                let disposition = Disposition::for_outcome(&outcome);

                match outcome {
                    Ok(()) => {}
                    Err(Error::UnroutableMessage(key)) => {
                        info!(worker = %worker, routing_key = %key, "rabbitmq_message_unroutable");
                    }
                    Err(e) => report(errors, worker, e),
                }

                if let Err(e) = settler.settle(delivery.delivery_tag, disposition).await {
                    error!(
                        worker = %worker,
                        delivery_tag = delivery.delivery_tag,
                        disposition = ?disposition,
                        error = %e,
                        "rabbitmq_settle_failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Forward a component error to the shared error channel.
///
/// Never blocks: when the channel is full or closed the error is logged here
/// instead.
pub fn report(errors: &mpsc::Sender<Error>, worker: &str, err: Error) {
    if let Err(e) = errors.try_send(err) {
        let err = match e {
            mpsc::error::TrySendError::Full(err) | mpsc::error::TrySendError::Closed(err) => err,
        };
        error!(worker = %worker, error = %err, "error_channel_unavailable");
    }
}

/// Declare, bind and listen on `binding` until `stop` fires, restarting the
/// consumer after every broker reconnect.
pub async fn run_consumer(
    connections: Arc<ConnectionManager>,
    binding: QueueBinding,
    handler: Arc<dyn MessageHandler>,
    stop: CancellationToken,
    errors: mpsc::Sender<Error>,
) {
    let worker = binding.worker_id();
    let mut reconnects = connections.subscribe_reconnects();

    loop {
        reconnects.borrow_and_update();

        let exit = consume_once(
            &connections,
            &binding,
            handler.as_ref(),
            &stop,
            &mut reconnects,
            &errors,
        )
        .await;

        match exit {
            Ok(ListenExit::Stopped) => break,
            Ok(ListenExit::Reconnected) => {
                info!(worker = %worker, "rabbitmq_consumer_restarting");
                continue;
            }
            Ok(ListenExit::StreamClosed) => {
                warn!(worker = %worker, "rabbitmq_consumer_waiting_for_reconnect");
            }
            Err(e) => {
                error!(worker = %worker, error = %e, "rabbitmq_consumer_failed");
                report(&errors, &worker, e);
            }
        }

        // A live connection will not bump the generation, so retry on a timer.
        let connected = connections.is_connected().await;

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            changed = reconnects.changed() => {
                if changed.is_err() {
                    break;
                }
                info!(worker = %worker, "rabbitmq_consumer_restarting");
            }
            _ = tokio::time::sleep(RESTART_DELAY), if connected => {
                info!(worker = %worker, "rabbitmq_consumer_retrying");
            }
        }
    }

    info!(worker = %worker, "rabbitmq_consumer_stopped");
}

async fn consume_once(
    connections: &ConnectionManager,
    binding: &QueueBinding,
    handler: &dyn MessageHandler,
    stop: &CancellationToken,
    reconnects: &mut watch::Receiver<u64>,
    errors: &mpsc::Sender<Error>,
) -> Result<ListenExit> {
    let mut consumer = Consumer::open(connections, &binding.exchange, binding.worker_id()).await?;
    consumer.declare_queue(&binding.queue).await?;
    consumer.bind_queue(&binding.routing_key).await?;
    consumer.listen(handler, stop, reconnects, errors).await
}
