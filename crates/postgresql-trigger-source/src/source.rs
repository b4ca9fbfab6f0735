//! Push-model capture loop.

use crate::client::{self, pg_config};
use crate::session::{NotificationSession, ReconnectPolicy};
use crate::triggers::TriggerPlan;
use crate::SourceOpts;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use relay_core::{CaptureSource, Cancelled, ChangeEvent, EventQueue, Identifier, QueueFull};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Idle time after which the notification session is probed.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(90);

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PostgresCaptureSource {
    config: Config,
    plan: TriggerPlan,
    installed: Vec<Identifier>,
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
    session: Option<NotificationSession>,
    last_activity: Instant,
    liveness_window: Duration,
    reconnect: ReconnectPolicy,
}

impl PostgresCaptureSource {
    /// Connect and install the trigger function and the triggers for the
    /// enabled operations. Any failure here is fatal.
    pub async fn connect(opts: &SourceOpts) -> Result<Self> {
        let config = pg_config(opts)?;
        let plan = TriggerPlan::new(&opts.table, opts.operations)
            .context("Invalid table name for trigger setup")?;

        let (client, connection) = client::connect(&config)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {}:{}", opts.host, opts.port))?;
        client
            .batch_execute("SELECT 1")
            .await
            .context("Failed to ping PostgreSQL")?;

        let installed = plan.install(&client).await.context("Failed to set up triggers")?;
        info!(
            "PostgreSQL change capture installed on table {} ({} triggers)",
            plan.table(),
            installed.len()
        );

        Ok(Self {
            config,
            plan,
            installed,
            client: Some(client),
            connection: Some(connection),
            session: None,
            last_activity: Instant::now(),
            liveness_window: LIVENESS_WINDOW,
            reconnect: ReconnectPolicy::default(),
        })
    }

    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn channel(&self) -> &Identifier {
        self.plan.channel()
    }

    pub fn installed_triggers(&self) -> &[Identifier] {
        &self.installed
    }

    /// Time of the last notification received, or of construction.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

/// Decode one notification payload and offer it to the queue without
/// blocking. Malformed payloads and a full queue both drop the event.
/// Returns whether the event was enqueued.
pub fn enqueue_payload(payload: &str, queue: &EventQueue) -> bool {
    let event = match ChangeEvent::from_payload(payload) {
        Ok(event) => event,
        Err(e) => {
            error!("Failed to decode notification payload: {e}");
            return false;
        }
    };

    match queue.try_push(event) {
        Ok(()) => true,
        Err(QueueFull(event)) => {
            warn!(
                "Event queue full, dropping {} event on table {}",
                event.operation(),
                event.table()
            );
            false
        }
    }
}

#[async_trait]
impl CaptureSource for PostgresCaptureSource {
    fn source_type(&self) -> &'static str {
        "postgres"
    }

    async fn prepare(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = NotificationSession::open(
            self.config.clone(),
            self.plan.channel().clone(),
            self.reconnect,
        )
        .await?;
        self.session = Some(session);
        self.last_activity = Instant::now();
        Ok(())
    }

    async fn capture(&mut self, queue: &EventQueue, cancel: &CancellationToken) -> Result<()> {
        self.prepare().await?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("No notification session available"))?;
        let channel = session.channel().clone();
        info!("Capturing changes from channel {channel}");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stopping capture on channel {channel}");
                    return Err(Cancelled.into());
                }
                notification = session.recv() => match notification {
                    Some(notification) => {
                        self.last_activity = Instant::now();
                        enqueue_payload(notification.payload(), queue);
                    }
                    None => bail!("Notification session on channel {channel} ended"),
                },
                _ = tokio::time::sleep(self.liveness_window) => {
                    debug!(
                        "No notification for {:?}, probing channel {channel}",
                        self.last_activity.elapsed()
                    );
                    session.ping();
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        // Dropping the client ends its connection task
        self.client.take();
        if let Some(mut connection) = self.connection.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut connection)
                .await
                .is_err()
            {
                connection.abort();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    const INSERT_PAYLOAD: &str = r#"{"operation" : "INSERT", "table" : "orders", "timestamp" : "2024-05-01T10:00:00.000001+00:00", "data" : {"id":1,"status":"new"}}"#;

    #[tokio::test]
    async fn test_enqueue_payload_accepts_well_formed_event() {
        let queue = EventQueue::new(4);
        assert!(enqueue_payload(INSERT_PAYLOAD, &queue));

        let event = queue.pop(&CancellationToken::new()).await.unwrap();
        assert_eq!(event.table(), "orders");
        assert_eq!(event.data()["status"], "new");
    }

    #[tokio::test]
    async fn test_enqueue_payload_drops_malformed_payload() {
        let queue = EventQueue::new(4);
        assert!(!enqueue_payload("{\"operation\": \"INSERT\"", &queue));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_payload_drops_when_queue_full() {
        let queue = EventQueue::new(1);
        assert!(enqueue_payload(INSERT_PAYLOAD, &queue));
        assert!(!enqueue_payload(INSERT_PAYLOAD, &queue));
        assert_eq!(queue.len(), 1);
    }
}
