//! Audit table and trigger DDL for MySQL change capture
//!
//! Each enabled operation gets an AFTER trigger that copies the affected
//! row into `<table>_audit` as a `JSON_OBJECT` of every column. The
//! column list is read from `INFORMATION_SCHEMA` when the triggers are
//! installed, so triggers must be reinstalled after the table's columns
//! change.

use anyhow::{Context, Result};
use mysql_async::{prelude::*, Conn};
use relay_core::{Identifier, IdentifierError, Operation, OperationSet};
use tracing::{error, info, warn};

/// Audit table, trigger names and operation set for one watched table.
#[derive(Clone, Debug)]
pub struct TrackingPlan {
    table: Identifier,
    audit_table: Identifier,
    triggers: Vec<(Operation, Identifier)>,
    operations: OperationSet,
}

impl TrackingPlan {
    pub fn new(table: &Identifier, operations: OperationSet) -> Result<Self, IdentifierError> {
        let triggers = Operation::ALL
            .into_iter()
            .map(|op| {
                let name = table.derive("", &format!("_{}_trigger", op.name_fragment()))?;
                Ok((op, name))
            })
            .collect::<Result<Vec<_>, IdentifierError>>()?;

        Ok(Self {
            table: table.clone(),
            audit_table: table.derive("", "_audit")?,
            triggers,
            operations,
        })
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// `<table>_audit`
    pub fn audit_table(&self) -> &Identifier {
        &self.audit_table
    }

    pub fn create_audit_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id BIGINT AUTO_INCREMENT PRIMARY KEY,
    operation VARCHAR(10) NOT NULL,
    table_name VARCHAR(255) NOT NULL,
    changed_at TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
    data JSON,
    old_data JSON,
    processed BOOLEAN NOT NULL DEFAULT FALSE,
    INDEX idx_processed (processed, changed_at)
)",
            quote(&self.audit_table)
        )
    }

    /// One statement per operation, enabled or not.
    pub fn drop_triggers_sql(&self) -> Vec<String> {
        self.triggers
            .iter()
            .map(|(_, name)| format!("DROP TRIGGER IF EXISTS {}", quote(name)))
            .collect()
    }

    /// `CREATE TRIGGER` statements for the enabled operations, with row
    /// images built from `columns`.
    pub fn create_triggers_sql(&self, columns: &[Identifier]) -> Vec<(Operation, String)> {
        let table = quote(&self.table);
        let audit = quote(&self.audit_table);
        let new_row = json_object(columns, "NEW");
        let old_row = json_object(columns, "OLD");

        self.triggers
            .iter()
            .filter(|(op, _)| self.operations.contains(*op))
            .map(|(op, name)| {
                let insert = match op {
                    Operation::Insert => format!(
                        "INSERT INTO {audit} (operation, table_name, data) VALUES ('INSERT', '{}', {new_row})",
                        self.table
                    ),
                    Operation::Update => format!(
                        "INSERT INTO {audit} (operation, table_name, data, old_data) VALUES ('UPDATE', '{}', {new_row}, {old_row})",
                        self.table
                    ),
                    Operation::Delete => format!(
                        "INSERT INTO {audit} (operation, table_name, data) VALUES ('DELETE', '{}', {old_row})",
                        self.table
                    ),
                };
                let sql = format!(
                    "CREATE TRIGGER {} AFTER {op} ON {table} FOR EACH ROW {insert}",
                    quote(name)
                );
                (*op, sql)
            })
            .collect()
    }

    pub fn enabled_triggers(&self) -> Vec<Identifier> {
        self.triggers
            .iter()
            .filter(|(op, _)| self.operations.contains(*op))
            .map(|(_, name)| name.clone())
            .collect()
    }
}

/// Create the audit table and (re)install the triggers for the enabled
/// operations. Returns the names of the triggers created.
///
/// Failing to create the audit table or a trigger is fatal. Failing to
/// drop a previous trigger only logs a warning.
pub async fn setup_mysql_change_tracking(
    conn: &mut Conn,
    plan: &TrackingPlan,
) -> Result<Vec<Identifier>> {
    conn.query_drop(plan.create_audit_table_sql())
        .await
        .with_context(|| format!("Failed to create audit table {}", plan.audit_table))?;
    info!("Audit table ready: {}", plan.audit_table);

    for sql in plan.drop_triggers_sql() {
        if let Err(e) = conn.query_drop(sql.as_str()).await {
            warn!("Failed to drop trigger ({sql}): {e}");
        }
    }

    let columns = table_columns(conn, &plan.table).await;

    for (op, sql) in plan.create_triggers_sql(&columns) {
        conn.query_drop(sql)
            .await
            .with_context(|| format!("Failed to create {op} trigger on {}", plan.table))?;
        info!("Created {op} trigger for table {}", plan.table);
    }

    Ok(plan.enabled_triggers())
}

/// Column names of `table` in ordinal order. Introspection failures are
/// logged and yield an empty list, which produces `JSON_OBJECT()` rows.
async fn table_columns(conn: &mut Conn, table: &Identifier) -> Vec<Identifier> {
    let names: Vec<String> = match conn
        .exec(
            "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
             ORDER BY ORDINAL_POSITION",
            (table.as_str(),),
        )
        .await
    {
        Ok(names) => names,
        Err(e) => {
            error!("Failed to read columns of {table}: {e}");
            return Vec::new();
        }
    };

    names
        .into_iter()
        .filter_map(|name| match Identifier::new(name) {
            Ok(column) => Some(column),
            Err(e) => {
                warn!("Column skipped in audit rows of {table}: {e}");
                None
            }
        })
        .collect()
}

/// `JSON_OBJECT('a', NEW.`a`, 'b', NEW.`b`)`
fn json_object(columns: &[Identifier], row: &str) -> String {
    let pairs = columns
        .iter()
        .map(|column| format!("'{column}', {row}.{}", quote(column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("JSON_OBJECT({pairs})")
}

fn quote(ident: &Identifier) -> String {
    format!("`{ident}`")
}
