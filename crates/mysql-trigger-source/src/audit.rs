//! Reading and acknowledging audit table rows

use crate::TrackingPlan;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mysql_async::{prelude::*, Pool, Row, Value};
use relay_core::{ChangeEvent, Identifier, Operation, RowData};
use tracing::{error, warn};

/// One row of `<table>_audit`, with the JSON columns still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub id: i64,
    pub operation: String,
    pub table_name: String,
    pub changed_at: DateTime<Utc>,
    pub data: Option<String>,
    pub old_data: Option<String>,
    pub processed: bool,
}

impl AuditRecord {
    /// Decode into a [`ChangeEvent`].
    ///
    /// An unknown operation or a missing or non-object `data` column makes
    /// the record malformed. An undecodable `old_data` is only logged and
    /// the event is produced without it.
    pub fn to_event(&self) -> Result<ChangeEvent> {
        let operation: Operation = self
            .operation
            .parse()
            .with_context(|| format!("Audit row {} has an invalid operation", self.id))?;

        let data = self
            .data
            .as_deref()
            .ok_or_else(|| anyhow!("Audit row {} has no data", self.id))?;
        let data: RowData = serde_json::from_str(data)
            .with_context(|| format!("Audit row {} has invalid data", self.id))?;

        let old_data = match self.old_data.as_deref() {
            Some(raw) => match serde_json::from_str::<RowData>(raw) {
                Ok(old) => Some(old),
                Err(e) => {
                    warn!("Audit row {} has invalid old_data, sending without it: {e}", self.id);
                    None
                }
            },
            None => None,
        };

        Ok(ChangeEvent::new(
            operation,
            self.table_name.clone(),
            self.changed_at,
            data,
            old_data,
        ))
    }
}

/// Storage the poll loop reads unprocessed records from.
#[async_trait]
pub trait AuditLog: Send {
    /// Up to `limit` unprocessed records, oldest first.
    async fn fetch_unprocessed(&mut self, limit: usize) -> Result<Vec<AuditRecord>>;

    /// Flag the given records as processed.
    async fn mark_processed(&mut self, ids: &[i64]) -> Result<()>;
}

/// [`AuditLog`] backed by the MySQL audit table. Each call checks a
/// connection out of the pool, so a dropped connection is replaced on the
/// next poll.
pub struct MySQLAuditLog {
    pool: Pool,
    audit_table: Identifier,
}

impl MySQLAuditLog {
    pub fn new(pool: Pool, plan: &TrackingPlan) -> Self {
        Self {
            pool,
            audit_table: plan.audit_table().clone(),
        }
    }

    fn select_sql(&self) -> String {
        format!(
            "SELECT id, operation, table_name, changed_at, data, old_data, processed
             FROM `{}`
             WHERE processed = FALSE
             ORDER BY changed_at ASC, id ASC
             LIMIT ?",
            self.audit_table
        )
    }
}

#[async_trait]
impl AuditLog for MySQLAuditLog {
    async fn fetch_unprocessed(&mut self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(self.select_sql(), (limit as u64,))
            .await
            .with_context(|| format!("Failed to query {}", self.audit_table))?;

        let mut records = Vec::with_capacity(rows.len());
        let mut unreadable = Vec::new();
        for row in rows {
            let id = column::<i64>(&row, 0, "id").ok();
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("Dropping unreadable row of {}: {e:#}", self.audit_table);
                    unreadable.extend(id);
                }
            }
        }

        // Unreadable rows would otherwise be selected first on every poll
        if !unreadable.is_empty() {
            if let Err(e) = conn
                .exec_drop(mark_processed_sql(&self.audit_table, unreadable.len()), unreadable)
                .await
            {
                error!("Failed to mark unreadable rows of {} processed: {e}", self.audit_table);
            }
        }
        Ok(records)
    }

    async fn mark_processed(&mut self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(mark_processed_sql(&self.audit_table, ids.len()), ids.to_vec())
            .await
            .with_context(|| format!("Failed to mark {} rows processed", ids.len()))?;
        Ok(())
    }
}

fn mark_processed_sql(audit_table: &Identifier, count: usize) -> String {
    let placeholders = vec!["?"; count].join(",");
    format!("UPDATE `{audit_table}` SET processed = TRUE WHERE id IN ({placeholders})")
}

fn record_from_row(row: Row) -> Result<AuditRecord> {
    let id: i64 = column(&row, 0, "id")?;
    Ok(AuditRecord {
        id,
        operation: column(&row, 1, "operation")?,
        table_name: column(&row, 2, "table_name")?,
        changed_at: timestamp(
            row.get_opt::<Value, _>(3)
                .ok_or_else(|| anyhow!("Missing changed_at in audit row {id}"))??,
        )?,
        data: column(&row, 4, "data")?,
        old_data: column(&row, 5, "old_data")?,
        processed: column(&row, 6, "processed")?,
    })
}

fn column<T: FromValue>(row: &Row, index: usize, name: &str) -> Result<T> {
    match row.get_opt::<T, _>(index) {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(anyhow!("Invalid {name} column: {e}")),
        None => Err(anyhow!("Missing {name} column")),
    }
}

/// The session runs in UTC, so DATETIME and TIMESTAMP values are UTC
/// wall-clock times.
fn timestamp(value: Value) -> Result<DateTime<Utc>> {
    let naive = match value {
        Value::Date(year, month, day, hour, minute, second, micros) => {
            NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())
                .and_then(|d| {
                    d.and_hms_micro_opt(hour.into(), minute.into(), second.into(), micros)
                })
                .ok_or_else(|| anyhow!("Invalid changed_at value"))?
        }
        Value::Bytes(bytes) => {
            let text = String::from_utf8(bytes).context("changed_at is not UTF-8")?;
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                .with_context(|| format!("Invalid changed_at value '{text}'"))?
        }
        other => bail!("Unexpected changed_at value {other:?}"),
    };
    Ok(naive.and_utc())
}
