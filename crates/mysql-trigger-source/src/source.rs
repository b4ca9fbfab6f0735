//! Poll-model capture loop.

use crate::client::new_mysql_pool;
use crate::{poll_until_cancelled, setup_mysql_change_tracking, MySQLAuditLog, SourceOpts, TrackingPlan};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use mysql_async::{prelude::*, Pool};
use relay_core::{CaptureSource, EventQueue, Identifier};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct MySQLCaptureSource {
    pool: Option<Pool>,
    plan: TrackingPlan,
    installed: Vec<Identifier>,
    poll_interval: Duration,
}

impl MySQLCaptureSource {
    /// Connect, create the audit table and install the triggers for the
    /// enabled operations. Any failure here is fatal.
    pub async fn connect(opts: &SourceOpts) -> Result<Self> {
        let plan = TrackingPlan::new(&opts.table, opts.operations)
            .context("Invalid table name for change tracking")?;
        let pool = new_mysql_pool(opts);

        let installed = match install(&pool, &plan).await {
            Ok(installed) => installed,
            Err(e) => {
                if let Err(disconnect) = pool.disconnect().await {
                    warn!("Failed to disconnect MySQL pool after setup failure: {disconnect}");
                }
                return Err(e.context(format!(
                    "Failed to set up MySQL change tracking at {}:{}",
                    opts.host, opts.port
                )));
            }
        };
        info!(
            "MySQL change capture installed on table {} ({} triggers, audit table {})",
            plan.table(),
            installed.len(),
            plan.audit_table()
        );

        Ok(Self {
            pool: Some(pool),
            plan,
            installed,
            poll_interval: opts.poll_interval,
        })
    }

    pub fn audit_table(&self) -> &Identifier {
        self.plan.audit_table()
    }

    pub fn installed_triggers(&self) -> &[Identifier] {
        &self.installed
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

async fn install(pool: &Pool, plan: &TrackingPlan) -> Result<Vec<Identifier>> {
    let mut conn = pool.get_conn().await.context("Failed to connect to MySQL")?;
    conn.ping().await.context("Failed to ping MySQL")?;
    setup_mysql_change_tracking(&mut conn, plan).await
}

#[async_trait]
impl CaptureSource for MySQLCaptureSource {
    fn source_type(&self) -> &'static str {
        "mysql"
    }

    async fn capture(&mut self, queue: &EventQueue, cancel: &CancellationToken) -> Result<()> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| anyhow!("MySQL capture source is closed"))?;
        let mut audit = MySQLAuditLog::new(pool.clone(), &self.plan);
        info!(
            "Polling {} every {:?}",
            self.plan.audit_table(),
            self.poll_interval
        );
        poll_until_cancelled(&mut audit, queue, self.poll_interval, cancel).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.disconnect()
                .await
                .context("Failed to disconnect MySQL pool")?;
        }
        Ok(())
    }
}
