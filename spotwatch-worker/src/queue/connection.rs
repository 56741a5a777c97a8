//! Broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the single process-wide AMQP connection and
//! every channel derived from it. When the connection drops unexpectedly,
//! [`monitor`] reconnects after a fixed delay, giving up after a bounded
//! number of attempts. Consumers watch the connection generation to know
//! when to redeclare their queues.

use std::time::Duration;

use async_trait::async_trait;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Fixed-delay, bounded reconnect schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 12,
        }
    }
}

/// Something that can be (re)connected and reports unexpected closure.
#[async_trait]
pub trait Reconnect: Send + Sync {
    async fn connect(&self) -> Result<()>;

    /// Resolves with the reason once the current connection is lost.
    /// Resolves with `None` if it was closed deliberately or never opened.
    async fn closed(&self) -> Option<String>;
}

/// Watch `target` and reconnect it whenever it drops, until `stop` fires.
///
/// Returns [`Error::ReconnectExhausted`] when every attempt of one reconnect
/// round fails.
pub async fn monitor<R>(target: &R, policy: ReconnectPolicy, stop: &CancellationToken) -> Result<()>
where
    R: Reconnect + ?Sized,
{
    loop {
        let lost = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                info!("rabbitmq_monitor_stopping");
                return Ok(());
            }
            lost = target.closed() => lost,
        };

        let Some(reason) = lost else {
            info!("rabbitmq_monitor_connection_closed");
            return Ok(());
        };

        warn!(reason = %reason, "rabbitmq_connection_lost");

        if !reconnect(target, policy, stop).await? {
            info!("rabbitmq_monitor_stopping");
            return Ok(());
        }
    }
}

/// One reconnect round. `Ok(false)` means `stop` fired first.
async fn reconnect<R>(target: &R, policy: ReconnectPolicy, stop: &CancellationToken) -> Result<bool>
where
    R: Reconnect + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(false),
            _ = sleep(policy.delay) => {}
        }

        match target.connect().await {
            Ok(()) => {
                info!(attempt = attempt, "rabbitmq_reconnected");
                return Ok(true);
            }
            Err(e) => {
                warn!(
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    retry_in_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "rabbitmq_reconnect_failed"
                );
            }
        }
    }

    error!(attempts = policy.max_attempts, "rabbitmq_reconnect_exhausted");
    Err(Error::ReconnectExhausted {
        attempts: policy.max_attempts,
    })
}

/// Owner of the broker connection and its channels.
pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    connection: RwLock<Option<Connection>>,
    channels: Mutex<Vec<Channel>>,
    close_notice: Mutex<Option<oneshot::Receiver<lapin::Error>>>,
    generation: watch::Sender<u64>,
    closing: CancellationToken,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            url: url.into(),
            policy,
            connection: RwLock::new(None),
            channels: Mutex::new(Vec::new()),
            close_notice: Mutex::new(None),
            generation,
            closing: CancellationToken::new(),
        }
    }

    /// Dial the broker once, without retrying.
    pub async fn connect(&self) -> Result<()> {
        info!(url_length = self.url.len(), "rabbitmq_connecting");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| {
                error!(error = %e, "rabbitmq_connect_failed");
                Error::Broker(e)
            })?;

        let (notice_tx, notice_rx) = oneshot::channel();
        let mut notice_tx = Some(notice_tx);
        connection.on_error(move |err| {
            if let Some(tx) = notice_tx.take() {
                let _ = tx.send(err);
            }
        });

        // Channels of a previous connection are dead.
        self.channels.lock().await.clear();
        *self.connection.write().await = Some(connection);
        *self.close_notice.lock().await = Some(notice_rx);
        self.generation.send_modify(|generation| *generation += 1);

        info!(generation = *self.generation.borrow(), "rabbitmq_connected");
        Ok(())
    }

    /// Reconnect on unexpected closure until `stop` fires.
    pub async fn monitor(&self, stop: &CancellationToken) -> Result<()> {
        monitor(self, self.policy, stop).await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .read()
            .await
            .as_ref()
            .is_some_and(|connection| connection.status().connected())
    }

    /// Receiver that changes every time a new connection is established.
    pub fn subscribe_reconnects(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Open a channel on the current connection.
    pub async fn create_channel(&self) -> Result<Channel> {
        let connection = self.connection.read().await;
        let connection = connection
            .as_ref()
            .filter(|connection| connection.status().connected())
            .ok_or_else(|| Error::Invariant("broker connection is not established".to_string()))?;

        let channel = connection.create_channel().await?;
        self.channels.lock().await.push(channel.clone());

        info!(channel_id = channel.id(), "rabbitmq_channel_created");
        Ok(channel)
    }

    /// Close every channel opened through this manager, then the connection.
    ///
    /// Failures are logged, never returned.
    pub async fn close(&self) {
        self.closing.cancel();

        let channels = std::mem::take(&mut *self.channels.lock().await);
        for channel in channels {
            if !channel.status().connected() {
                continue;
            }
            if let Err(e) = channel.close(200, "Normal shutdown").await {
                warn!(channel_id = channel.id(), error = %e, "rabbitmq_channel_close_error");
            }
        }
        info!("rabbitmq_channels_closed");

        if let Some(connection) = self.connection.write().await.take() {
            if connection.status().connected() {
                if let Err(e) = connection.close(200, "Normal shutdown").await {
                    warn!(error = %e, "rabbitmq_connection_close_error");
                }
            }
        }
        self.close_notice.lock().await.take();

        info!("rabbitmq_connection_closed");
    }
}

#[async_trait]
impl Reconnect for ConnectionManager {
    async fn connect(&self) -> Result<()> {
        ConnectionManager::connect(self).await
    }

    async fn closed(&self) -> Option<String> {
        let notice = self.close_notice.lock().await.take()?;

        tokio::select! {
            _ = self.closing.cancelled() => None,
            result = notice => {
                if self.closing.is_cancelled() {
                    return None;
                }
                Some(match result {
                    Ok(err) => err.to_string(),
                    Err(_) => "connection error handler dropped".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Connection double driven by scripted close events and connect results.
    struct FakeBroker {
        close_events: Mutex<mpsc::UnboundedReceiver<Option<String>>>,
        connect_results: std::sync::Mutex<VecDeque<bool>>,
        attempts: AtomicU32,
    }

    impl FakeBroker {
        fn new(connect_results: &[bool]) -> (Self, mpsc::UnboundedSender<Option<String>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let broker = Self {
                close_events: Mutex::new(rx),
                connect_results: std::sync::Mutex::new(connect_results.iter().copied().collect()),
                attempts: AtomicU32::new(0),
            };
            (broker, tx)
        }
    }

    #[async_trait]
    impl Reconnect for FakeBroker {
        async fn connect(&self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let ok = self.connect_results.lock().unwrap().pop_front().unwrap_or(false);
            if ok {
                Ok(())
            } else {
                Err(Error::Invariant("dial refused".to_string()))
            }
        }

        async fn closed(&self) -> Option<String> {
            match self.close_events.lock().await.recv().await {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_secs(5),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_triggers_reconnect_and_resumes() {
        let (broker, events) = FakeBroker::new(&[false, true]);
        let stop = CancellationToken::new();

        events.send(Some("connection reset by peer".to_string())).unwrap();
        events.send(None).unwrap();

        monitor(&broker, policy(5), &stop).await.unwrap();
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_keeps_watching_after_reconnect() {
        let (broker, events) = FakeBroker::new(&[true, true]);
        let stop = CancellationToken::new();

        events.send(Some("first drop".to_string())).unwrap();
        events.send(Some("second drop".to_string())).unwrap();
        events.send(None).unwrap();

        monitor(&broker, policy(3), &stop).await.unwrap();
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let (broker, events) = FakeBroker::new(&[]);
        let stop = CancellationToken::new();

        events.send(Some("broker restarted".to_string())).unwrap();

        let err = monitor(&broker, policy(3), &stop).await.unwrap_err();
        assert!(matches!(err, Error::ReconnectExhausted { attempts: 3 }));
        assert_eq!(broker.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_monitor() {
        let (broker, _events) = FakeBroker::new(&[]);
        let stop = CancellationToken::new();

        let task = {
            let stop = stop.clone();
            tokio::spawn(async move { monitor(&broker, policy(3), &stop).await })
        };
        stop.cancel();

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_channel_requires_connection() {
        let manager = ConnectionManager::new("amqp://localhost:5672", ReconnectPolicy::default());
        assert!(!manager.is_connected().await);
        assert!(matches!(
            manager.create_channel().await,
            Err(Error::Invariant(_))
        ));
        assert_eq!(Reconnect::closed(&manager).await, None);
        manager.close().await;
    }
}
