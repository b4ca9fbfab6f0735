//! PostgreSQL client utilities
//!
//! This module builds connection settings from [`SourceOpts`] and creates
//! client connections with a spawned connection driver.

use crate::SourceOpts;
use anyhow::{bail, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, Config, NoTls};
use tracing::error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Map a libpq `sslmode` onto the modes a plaintext connector can honour.
pub fn parse_sslmode(mode: &str) -> Result<SslMode> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "" | "disable" => Ok(SslMode::Disable),
        "allow" | "prefer" => Ok(SslMode::Prefer),
        other @ ("require" | "verify-ca" | "verify-full") => {
            bail!("sslmode '{other}' needs a TLS connection, use 'disable' or 'prefer'")
        }
        other => bail!("unknown sslmode '{other}'"),
    }
}

pub(crate) fn pg_config(opts: &SourceOpts) -> Result<Config> {
    let mut config = Config::new();
    config
        .host(&opts.host)
        .port(opts.port)
        .user(&opts.user)
        .password(&opts.password)
        .dbname(&opts.database)
        .ssl_mode(parse_sslmode(&opts.sslmode)?)
        .application_name("db-webhook-relay")
        .connect_timeout(CONNECT_TIMEOUT);
    Ok(config)
}

/// Create a new PostgreSQL client with connection handling
pub async fn connect(config: &Config) -> Result<(Client, JoinHandle<()>)> {
    let (client, connection) = config.connect(NoTls).await?;

    // Spawn connection handler
    let handle = tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("PostgreSQL connection error: {e}");
        }
    });

    Ok((client, handle))
}
