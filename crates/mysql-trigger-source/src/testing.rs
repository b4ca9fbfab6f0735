//! In-memory audit log for exercising the poll cycle without a server

use crate::{AuditLog, AuditRecord};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Mirrors the audit table: ids are assigned in insertion order and each
/// record is stamped one millisecond after the previous one.
pub struct MemoryAuditLog {
    table: String,
    records: Vec<AuditRecord>,
    next_id: i64,
    epoch: DateTime<Utc>,
    fail_fetch: bool,
    fail_mark: bool,
}

impl MemoryAuditLog {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            records: Vec::new(),
            next_id: 1,
            epoch: Utc::now(),
            fail_fetch: false,
            fail_mark: false,
        }
    }

    /// Append a record the way a trigger would; returns its id.
    pub fn record_raw(&mut self, operation: &str, data: Option<&str>, old_data: Option<&str>) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(AuditRecord {
            id,
            operation: operation.to_string(),
            table_name: self.table.clone(),
            changed_at: self.epoch + Duration::milliseconds(id),
            data: data.map(str::to_string),
            old_data: old_data.map(str::to_string),
            processed: false,
        });
        id
    }

    pub fn record_insert(&mut self, data: &str) -> i64 {
        self.record_raw("INSERT", Some(data), None)
    }

    pub fn record_update(&mut self, data: &str, old_data: &str) -> i64 {
        self.record_raw("UPDATE", Some(data), Some(old_data))
    }

    pub fn record_delete(&mut self, data: &str) -> i64 {
        self.record_raw("DELETE", Some(data), None)
    }

    pub fn fail_fetching(&mut self, fail: bool) {
        self.fail_fetch = fail;
    }

    pub fn fail_marking(&mut self, fail: bool) {
        self.fail_mark = fail;
    }

    pub fn is_processed(&self, id: i64) -> bool {
        self.records.iter().any(|r| r.id == id && r.processed)
    }

    pub fn unprocessed_ids(&self) -> Vec<i64> {
        self.records
            .iter()
            .filter(|r| !r.processed)
            .map(|r| r.id)
            .collect()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn fetch_unprocessed(&mut self, limit: usize) -> Result<Vec<AuditRecord>> {
        if self.fail_fetch {
            bail!("audit log unavailable");
        }
        let mut pending: Vec<AuditRecord> = self
            .records
            .iter()
            .filter(|r| !r.processed)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.changed_at, r.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&mut self, ids: &[i64]) -> Result<()> {
        if self.fail_mark {
            bail!("audit log unavailable");
        }
        for record in self.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.processed = true;
        }
        Ok(())
    }
}
