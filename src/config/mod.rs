//! YAML configuration file
//!
//! ```yaml
//! database:
//!   type: postgres          # or mysql
//!   host: localhost
//!   port: 5432
//!   user: app
//!   password: secret
//!   database: shop
//!   table: orders
//!   sslmode: disable
//! listener:
//!   modes: insert,update,delete
//!   poll_interval: 5s       # MySQL only
//! webhook:
//!   url: https://hooks.example.com/orders
//!   timeout: 30s
//!   retry_count: 3
//!   retry_delay: 5s
//! logging:
//!   file: /var/log/db-webhook-relay.log
//!   level: info
//! worker:
//!   pool_size: 5
//! ```

pub mod duration;

use anyhow::{bail, Context, Result};
use db_webhook_relay_mysql_trigger_source::SourceOpts as MySQLSourceOpts;
use db_webhook_relay_postgresql_trigger_source::{
    parse_sslmode, SourceOpts as PostgresSourceOpts,
};
use relay_core::{Identifier, OperationSet};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use webhook_sink::WebhookConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[serde(alias = "postgresql")]
    Postgres,
    Mysql,
}

impl DatabaseType {
    pub fn default_port(self) -> u16 {
        match self {
            DatabaseType::Postgres => 5432,
            DatabaseType::Mysql => 3306,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseType::Postgres => "postgres",
            DatabaseType::Mysql => "mysql",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseSection,
    #[serde(default)]
    pub listener: ListenerSection,
    pub webhook: WebhookSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(rename = "type")]
    pub kind: DatabaseType,
    #[serde(default = "default_host")]
    pub host: String,
    /// Engine default when omitted
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    pub table: String,
    /// PostgreSQL only
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
}

impl DatabaseSection {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.kind.default_port())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSection {
    /// Any combination of `insert`, `update` and `delete`, matched
    /// case-insensitively
    #[serde(default)]
    pub modes: String,
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "duration::deserialize"
    )]
    pub poll_interval: Duration,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            modes: String::new(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSection {
    pub url: String,
    #[serde(default = "default_timeout", deserialize_with = "duration::deserialize")]
    pub timeout: Duration,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "duration::deserialize"
    )]
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            file: None,
            level: default_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_level() -> String {
    "info".to_string()
}

fn default_pool_size() -> usize {
    5
}

impl Config {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.table()?;

        if self.operations().is_empty() {
            bail!(
                "listener.modes '{}' enables no operation, expected insert, update and/or delete",
                self.listener.modes
            );
        }

        if self.worker.pool_size == 0 {
            bail!("worker.pool_size must be at least 1");
        }

        match self.database.kind {
            DatabaseType::Mysql => {
                if self.listener.poll_interval.is_zero() {
                    bail!("listener.poll_interval must be greater than zero");
                }
            }
            DatabaseType::Postgres => {
                parse_sslmode(&self.database.sslmode).context("Invalid database.sslmode")?;
            }
        }

        let url = self.webhook.url.trim();
        if url.is_empty() {
            bail!("webhook.url is required");
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("webhook.url '{url}' must be an http:// or https:// URL");
        }

        Ok(())
    }

    /// Watched table as a validated identifier
    pub fn table(&self) -> Result<Identifier> {
        Identifier::new(self.database.table.trim()).context("Invalid database.table")
    }

    pub fn operations(&self) -> OperationSet {
        OperationSet::from_modes(&self.listener.modes)
    }

    pub fn postgres_opts(&self) -> Result<PostgresSourceOpts> {
        Ok(PostgresSourceOpts {
            host: self.database.host.clone(),
            port: self.database.port(),
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            database: self.database.database.clone(),
            sslmode: self.database.sslmode.clone(),
            table: self.table()?,
            operations: self.operations(),
        })
    }

    pub fn mysql_opts(&self) -> Result<MySQLSourceOpts> {
        Ok(MySQLSourceOpts {
            host: self.database.host.clone(),
            port: self.database.port(),
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            database: self.database.database.clone(),
            table: self.table()?,
            operations: self.operations(),
            poll_interval: self.listener.poll_interval,
        })
    }

    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            url: self.webhook.url.trim().to_string(),
            timeout: self.webhook.timeout,
            retry_count: self.webhook.retry_count,
            retry_delay: self.webhook.retry_delay,
        }
    }

    /// Human-readable settings, one per line. Never includes the password.
    pub fn summary(&self) -> Vec<String> {
        let db = &self.database;
        let mut lines = vec![
            format!("Database type: {}", db.kind),
            format!("Host: {}:{}", db.host, db.port()),
            format!("Database: {}", db.database),
            format!("Table: {}", db.table),
        ];
        match db.kind {
            DatabaseType::Postgres => lines.push(format!("SSL mode: {}", db.sslmode)),
            DatabaseType::Mysql => {
                lines.push(format!("Poll interval: {:?}", self.listener.poll_interval))
            }
        }
        lines.push(format!("Modes: {}", self.operations()));
        lines.push(format!("Webhook URL: {}", self.webhook.url));
        lines.push(format!(
            "Webhook timeout: {:?}, retries: {}, retry delay: {:?}",
            self.webhook.timeout, self.webhook.retry_count, self.webhook.retry_delay
        ));
        lines.push(format!("Workers: {}", self.worker.pool_size));
        lines.push(format!(
            "Log: {} (level {})",
            self.logging
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stderr".to_string()),
            self.logging.level
        ));
        lines
    }

    pub fn log_summary(&self) {
        for line in self.summary() {
            info!("{line}");
        }
    }
}
