//! LISTEN session on the change notification channel.
//!
//! The session owns a dedicated connection whose asynchronous messages are
//! forwarded to [`NotificationSession::recv`]. When that connection dies the
//! failure is logged and a background supervisor reconnects and re-issues
//! `LISTEN`, waiting a doubling delay between attempts. Notifications
//! published while no session is connected are not replayed.

use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use relay_core::Identifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, Config, NoTls, Notification};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay bounds between reconnection attempts
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

type ClientSlot = Arc<Mutex<Option<Arc<Client>>>>;
type Driver = JoinHandle<Option<tokio_postgres::Error>>;

pub struct NotificationSession {
    channel: Identifier,
    notifications: mpsc::UnboundedReceiver<Notification>,
    /// Client of the live connection, `None` while reconnecting
    client: ClientSlot,
    shutdown: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl NotificationSession {
    /// Connect and `LISTEN` on `channel`. Failing to establish the first
    /// session is an error; later connection losses are handled in the
    /// background.
    pub async fn open(config: Config, channel: Identifier, policy: ReconnectPolicy) -> Result<Self> {
        let (sender, notifications) = mpsc::unbounded_channel();

        let (client, driver) = listen_on(&config, &channel, sender.clone())
            .await
            .with_context(|| format!("Failed to LISTEN on channel {channel}"))?;
        info!("Listening on notification channel {channel}");

        let client: ClientSlot = Arc::new(Mutex::new(Some(Arc::new(client))));
        let shutdown = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(
            config,
            channel.clone(),
            policy,
            sender,
            driver,
            Arc::clone(&client),
            shutdown.clone(),
        ));

        Ok(Self {
            channel,
            notifications,
            client,
            shutdown,
            supervisor: Some(supervisor),
        })
    }

    pub fn channel(&self) -> &Identifier {
        &self.channel
    }

    /// Next notification. Returns `None` only after the session is closed.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// Send a liveness probe on a spawned task so the caller never waits on
    /// a dead connection. A failing probe surfaces the dead connection to
    /// the supervisor, which then reconnects.
    pub fn ping(&self) {
        let slot = Arc::clone(&self.client);
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let client = slot.lock().await.clone();
            match client {
                Some(client) => match client.batch_execute("SELECT 1").await {
                    Ok(()) => debug!("Liveness probe on channel {channel} succeeded"),
                    Err(e) => warn!("Liveness probe on channel {channel} failed: {e}"),
                },
                None => debug!("Liveness probe skipped, channel {channel} is reconnecting"),
            }
        });
    }

    /// Stop the supervisor and drop the session connection. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown.cancel();
        self.client.lock().await.take();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                error!("Notification session supervisor failed: {e}");
            }
        }
        self.notifications.close();
    }
}

/// Open a connection, forward its notifications to `sender`, and `LISTEN`.
/// The returned driver task yields the error that ended the connection.
async fn listen_on(
    config: &Config,
    channel: &Identifier,
    sender: mpsc::UnboundedSender<Notification>,
) -> Result<(Client, Driver)> {
    let (client, mut connection) = config.connect(NoTls).await?;

    let driver = tokio::spawn(async move {
        let messages = stream::poll_fn(move |cx| connection.poll_message(cx));
        tokio::pin!(messages);
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(notification)) => {
                    if sender.send(notification).is_err() {
                        return None;
                    }
                }
                Ok(AsyncMessage::Notice(notice)) => {
                    debug!("PostgreSQL notice: {}", notice.message())
                }
                Ok(_) => {}
                Err(e) => return Some(e),
            }
        }
        None
    });

    client.batch_execute(&format!("LISTEN \"{channel}\"")).await?;
    Ok((client, driver))
}

async fn supervise(
    config: Config,
    channel: Identifier,
    policy: ReconnectPolicy,
    sender: mpsc::UnboundedSender<Notification>,
    mut driver: Driver,
    client: ClientSlot,
    shutdown: CancellationToken,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                driver.abort();
                return;
            }
            outcome = &mut driver => outcome,
        };

        client.lock().await.take();
        match outcome {
            Ok(Some(e)) => error!("Notification session on channel {channel} lost: {e}"),
            Ok(None) => warn!("Notification session on channel {channel} closed"),
            Err(e) => error!("Notification session driver on channel {channel} failed: {e}"),
        }
        if sender.is_closed() {
            return;
        }

        let mut delay = policy.min_delay;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                attempt = listen_on(&config, &channel, sender.clone()) => attempt,
            };
            match attempt {
                Ok((new_client, new_driver)) => {
                    *client.lock().await = Some(Arc::new(new_client));
                    driver = new_driver;
                    info!("Reconnected notification session on channel {channel}");
                    break;
                }
                Err(e) => {
                    delay = policy.next_delay(delay);
                    error!("Reconnecting to channel {channel} failed: {e:#}, next attempt in {delay:?}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_interrupts_a_pending_reconnect() {
        // Non-routable address: connection attempts hang until the timeout
        let mut config = Config::new();
        config
            .host("10.255.255.1")
            .port(5432)
            .user("postgres")
            .connect_timeout(Duration::from_secs(30));
        let policy = ReconnectPolicy {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let (sender, _notifications) = mpsc::unbounded_channel();
        let lost: Driver = tokio::spawn(async { None });
        let shutdown = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(
            config,
            Identifier::new("orders_changes").unwrap(),
            policy,
            sender,
            lost,
            Arc::new(Mutex::new(None)),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), supervisor)
            .await
            .expect("supervisor should stop while reconnecting")
            .unwrap();
    }

    #[test]
    fn test_reconnect_delay_doubles_up_to_max() {
        let policy = ReconnectPolicy::default();
        let mut delay = policy.min_delay;
        let mut seen = vec![delay];
        for _ in 0..4 {
            delay = policy.next_delay(delay);
            seen.push(delay);
        }
        assert_eq!(
            seen,
            [10, 20, 40, 60, 60].map(Duration::from_secs).to_vec()
        );
    }
}
