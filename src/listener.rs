//! Engine selection and the listen/close lifecycle.

use crate::config::{Config, DatabaseType};
use anyhow::{bail, Result};
use db_webhook_relay_mysql_trigger_source::MySQLCaptureSource;
use db_webhook_relay_postgresql_trigger_source::PostgresCaptureSource;
use relay_core::{CaptureSource, EventQueue, Notify, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long workers may keep delivering after capture stops.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns one capture source, the event queue and the worker settings.
///
/// Construction installs the database-side capture objects, so once
/// [`Listener::new`] returns the table is instrumented.
pub struct Listener {
    source: Box<dyn CaptureSource>,
    notifier: Arc<dyn Notify>,
    queue: EventQueue,
    pool_size: usize,
    shutdown_grace: Duration,
    closed: bool,
}

impl Listener {
    /// Connect to the configured engine and install its triggers.
    pub async fn new(config: &Config, notifier: Arc<dyn Notify>) -> Result<Self> {
        let source: Box<dyn CaptureSource> = match config.database.kind {
            DatabaseType::Postgres => {
                Box::new(PostgresCaptureSource::connect(&config.postgres_opts()?).await?)
            }
            DatabaseType::Mysql => {
                Box::new(MySQLCaptureSource::connect(&config.mysql_opts()?).await?)
            }
        };
        Ok(Self::with_source(source, notifier, config.worker.pool_size))
    }

    /// Wrap an already constructed capture source.
    pub fn with_source(
        source: Box<dyn CaptureSource>,
        notifier: Arc<dyn Notify>,
        pool_size: usize,
    ) -> Self {
        Self {
            source,
            notifier,
            queue: EventQueue::default(),
            pool_size,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            closed: false,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue = EventQueue::new(capacity);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn source_type(&self) -> &'static str {
        self.source.source_type()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Start the worker pool and run the capture loop until `cancel` fires
    /// or capture fails. A graceful stop returns
    /// [`Cancelled`](relay_core::Cancelled).
    ///
    /// Workers are stopped when capture ends, whatever the reason. Events
    /// still queued at that point are not delivered.
    pub async fn listen(&mut self, cancel: CancellationToken) -> Result<()> {
        if self.closed {
            bail!("Listener is closed");
        }

        self.source.prepare().await?;

        let workers_cancel = cancel.child_token();
        let pool = WorkerPool::start(
            self.pool_size,
            self.queue.clone(),
            self.notifier.clone(),
            workers_cancel.clone(),
        );
        info!(
            "Listening for {} changes with {} workers",
            self.source.source_type(),
            pool.size()
        );

        let result = self.source.capture(&self.queue, &cancel).await;

        workers_cancel.cancel();
        pool.shutdown(self.shutdown_grace).await;
        if !self.queue.is_empty() {
            warn!("{} queued events were not delivered", self.queue.len());
        }
        result
    }

    /// Release the database connection and any notification session.
    /// Calling it again does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.source.close().await?;
        info!("{} listener closed", self.source.source_type());
        Ok(())
    }
}
