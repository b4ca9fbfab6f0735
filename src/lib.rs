//! db-webhook-relay
//!
//! Watches one table of a PostgreSQL or MySQL database and posts every
//! captured row change to a webhook as JSON.
//!
//! # Engines
//!
//! - PostgreSQL: a trigger function publishes each change with `pg_notify`
//!   and the relay LISTENs on `<table>_changes` (push model). Events that
//!   arrive while the queue is full are dropped.
//! - MySQL: triggers append each change to `<table>_audit`, which the relay
//!   polls every `poll_interval` (poll model). Rows stay unprocessed until
//!   their event is queued, so a full queue only delays them.
//!
//! In both cases captured events go through a bounded queue to a fixed
//! pool of workers, each delivering through the retrying
//! [`webhook_sink::WebhookNotifier`].
//!
//! # Database-Specific Crates
//!
//! - `db_webhook_relay_postgresql_trigger_source` - trigger function + LISTEN/NOTIFY
//! - `db_webhook_relay_mysql_trigger_source` - audit table + polling
//!
//! # CLI Usage
//!
//! ```bash
//! db-webhook-relay --config /etc/db-webhook-relay/config.yaml
//!
//! # Validate a configuration file without connecting
//! db-webhook-relay --config config.yaml --check
//! ```

pub mod config;
pub mod listener;
pub mod logging;

pub use config::{Config, DatabaseType};
pub use listener::Listener;
