//! The canonical row change event.

use crate::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column name to value mapping for one row image.
pub type RowData = serde_json::Map<String, serde_json::Value>;

/// A captured row change.
///
/// The serialized form is the webhook wire format:
///
/// ```json
/// {"operation": "UPDATE", "table": "orders", "timestamp": "2024-05-01T10:00:00Z",
///  "data": {"id": 1, "status": "shipped"}, "old_data": {"id": 1, "status": "new"}}
/// ```
///
/// For `DELETE` the deleted row is carried in `data`. `old_data` is only
/// ever present for `UPDATE` and is omitted from the JSON otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    operation: Operation,
    table: String,
    /// When the database recorded the change, not when it was captured here.
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: RowData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_data: Option<RowData>,
}

impl ChangeEvent {
    pub fn new(
        operation: Operation,
        table: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: RowData,
        old_data: Option<RowData>,
    ) -> Self {
        let old_data = match operation {
            Operation::Update => old_data,
            Operation::Insert | Operation::Delete => None,
        };
        Self {
            operation,
            table: table.into(),
            timestamp,
            data,
            old_data,
        }
    }

    /// Decode a notification payload published by the PostgreSQL trigger
    /// function. The payload has the same shape as the webhook body.
    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        let event: ChangeEvent = serde_json::from_str(payload)?;
        Ok(Self::new(
            event.operation,
            event.table,
            event.timestamp,
            event.data,
            event.old_data,
        ))
    }

    /// Encode the webhook request body.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &RowData {
        &self.data
    }

    pub fn old_data(&self) -> Option<&RowData> {
        self.old_data.as_ref()
    }
}
