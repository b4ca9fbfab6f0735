//! Core types for db-webhook-relay.
//!
//! This crate holds everything the capture sources and the webhook sink
//! share:
//!
//! - [`ChangeEvent`] - the canonical row change, produced by both capture
//!   strategies and consumed by delivery
//! - [`Operation`] / [`OperationSet`] - which row operations are captured
//! - [`Identifier`] - validated SQL identifiers for generated DDL
//! - [`EventQueue`] - bounded, lossy hand-off between capture and delivery
//! - [`WorkerPool`] - a fixed set of consumers draining the queue into a [`Notify`]
//! - [`CaptureSource`] - the engine-specific capture strategy contract
//!
//! # Architecture
//!
//! ```text
//! relay-core (this crate)
//!    │
//!    ├─── postgresql-trigger-source  (push model, LISTEN/NOTIFY)
//!    ├─── mysql-trigger-source       (poll model, audit table)
//!    └─── webhook-sink               (implements Notify over HTTP)
//! ```

mod cancel;
mod event;
mod identifier;
mod operation;
mod queue;
mod source;
mod worker;

pub use cancel::{is_cancelled, Cancelled};
pub use event::{ChangeEvent, RowData};
pub use identifier::{Identifier, IdentifierError, MAX_IDENTIFIER_LEN};
pub use operation::{Operation, OperationParseError, OperationSet};
pub use queue::{EventQueue, QueueFull, DEFAULT_QUEUE_CAPACITY};
pub use source::CaptureSource;
pub use worker::{Notify, WorkerPool};
