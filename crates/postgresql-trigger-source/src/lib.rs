//! PostgreSQL trigger-based change capture for db-webhook-relay
//!
//! A PL/pgSQL trigger function publishes every captured row change as a
//! JSON notification on the `<table>_changes` channel, and the capture loop
//! LISTENs on that channel (push model). Works with PostgreSQL 11+.
//!
//! There is no durable log on this path: an event dropped because the
//! queue is full, or published while the session is reconnecting, is lost.
//! NOTIFY payloads are limited to 8000 bytes by the server, so very wide
//! rows cannot be captured this way.

mod client;
mod session;
mod source;
mod triggers;

pub use client::{connect, parse_sslmode};
pub use session::{NotificationSession, ReconnectPolicy};
pub use source::{enqueue_payload, PostgresCaptureSource, LIVENESS_WINDOW};
pub use triggers::TriggerPlan;

use relay_core::{Identifier, OperationSet};

/// PostgreSQL source connection options
#[derive(Clone, Debug)]
pub struct SourceOpts {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// libpq-style sslmode; only modes that allow plaintext are accepted
    pub sslmode: String,
    /// Watched table
    pub table: Identifier,
    /// Operations to install triggers for
    pub operations: OperationSet,
}
