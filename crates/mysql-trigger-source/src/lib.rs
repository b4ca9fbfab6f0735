//! MySQL change capture for db-webhook-relay
//!
//! MySQL has no push notifications, so AFTER triggers write one row per
//! change into an audit table and the capture loop polls that table.
//! A row is marked processed once its event is accepted by the queue,
//! which makes the audit table an at-least-once staging area.

mod audit;
mod change_tracking;
mod client;
mod poll;
mod source;
pub mod testing;

use relay_core::{Identifier, OperationSet};
use std::time::Duration;

pub use audit::{AuditLog, AuditRecord, MySQLAuditLog};
pub use change_tracking::{setup_mysql_change_tracking, TrackingPlan};
pub use client::new_mysql_pool;
pub use poll::{poll_once, poll_until_cancelled, PollReport, POLL_BATCH_SIZE};
pub use source::MySQLCaptureSource;

/// MySQL source connection options
#[derive(Clone, Debug)]
pub struct SourceOpts {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Watched table
    pub table: Identifier,
    pub operations: OperationSet,
    /// Delay between audit table polls
    pub poll_interval: Duration,
}
