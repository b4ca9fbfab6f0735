//! Trigger function and per-operation trigger DDL.
//!
//! Every name spliced into the generated SQL is a validated [`Identifier`]
//! and is emitted double-quoted, so the channel name used by `pg_notify`
//! matches the one used by `LISTEN` exactly, case included.

use anyhow::{Context, Result};
use relay_core::{Identifier, IdentifierError, Operation, OperationSet};
use tokio_postgres::Client;
use tracing::info;

/// The database objects that instrument one watched table.
#[derive(Clone, Debug)]
pub struct TriggerPlan {
    table: Identifier,
    function: Identifier,
    channel: Identifier,
    triggers: Vec<(Operation, Identifier)>,
    operations: OperationSet,
}

impl TriggerPlan {
    pub fn new(table: &Identifier, operations: OperationSet) -> Result<Self, IdentifierError> {
        let triggers = Operation::ALL
            .into_iter()
            .map(|op| Ok((op, trigger_name(table, op)?)))
            .collect::<Result<Vec<_>, IdentifierError>>()?;

        Ok(Self {
            table: table.clone(),
            function: table.derive("notify_", "_changes")?,
            channel: table.derive("", "_changes")?,
            triggers,
            operations,
        })
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// Notification channel, `<table>_changes`.
    pub fn channel(&self) -> &Identifier {
        &self.channel
    }

    pub fn function(&self) -> &Identifier {
        &self.function
    }

    /// `CREATE OR REPLACE FUNCTION` publishing
    /// `{operation, table, timestamp, data, old_data?}` for each row.
    pub fn function_sql(&self) -> String {
        let function = quote(&self.function);
        let channel = &self.channel;
        format!(
            r#"CREATE OR REPLACE FUNCTION {function}()
RETURNS TRIGGER AS $$
DECLARE
    payload JSON;
BEGIN
    IF (TG_OP = 'DELETE') THEN
        payload = json_build_object(
            'operation', TG_OP,
            'table', TG_TABLE_NAME,
            'timestamp', NOW(),
            'data', row_to_json(OLD)
        );
    ELSIF (TG_OP = 'UPDATE') THEN
        payload = json_build_object(
            'operation', TG_OP,
            'table', TG_TABLE_NAME,
            'timestamp', NOW(),
            'data', row_to_json(NEW),
            'old_data', row_to_json(OLD)
        );
    ELSE
        payload = json_build_object(
            'operation', TG_OP,
            'table', TG_TABLE_NAME,
            'timestamp', NOW(),
            'data', row_to_json(NEW)
        );
    END IF;

    PERFORM pg_notify('{channel}', payload::text);

    RETURN NULL;
END;
$$ LANGUAGE plpgsql"#
        )
    }

    /// Drops the triggers for every operation, enabled or not, so a changed
    /// operation set leaves no stale trigger behind.
    pub fn drop_triggers_sql(&self) -> String {
        let table = quote(&self.table);
        self.triggers
            .iter()
            .map(|(_, name)| format!("DROP TRIGGER IF EXISTS {} ON {table};", quote(name)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `CREATE TRIGGER` statements for the enabled operations only.
    pub fn create_triggers_sql(&self) -> Vec<(Operation, String)> {
        let table = quote(&self.table);
        let function = quote(&self.function);
        self.triggers
            .iter()
            .filter(|(op, _)| self.operations.contains(*op))
            .map(|(op, name)| {
                let sql = format!(
                    "CREATE TRIGGER {} AFTER {op} ON {table} FOR EACH ROW EXECUTE FUNCTION {function}()",
                    quote(name)
                );
                (*op, sql)
            })
            .collect()
    }

    /// Trigger names that [`install`](Self::install) creates.
    pub fn enabled_triggers(&self) -> Vec<Identifier> {
        self.triggers
            .iter()
            .filter(|(op, _)| self.operations.contains(*op))
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Create or replace the function, then drop and recreate the triggers.
    /// Safe to run repeatedly; the result always reflects the current
    /// operation set.
    pub async fn install(&self, client: &Client) -> Result<Vec<Identifier>> {
        client
            .batch_execute(&self.function_sql())
            .await
            .with_context(|| format!("Failed to create trigger function {}", self.function))?;

        client
            .batch_execute(&self.drop_triggers_sql())
            .await
            .with_context(|| format!("Failed to drop existing triggers on {}", self.table))?;

        for (op, sql) in self.create_triggers_sql() {
            client
                .batch_execute(&sql)
                .await
                .with_context(|| format!("Failed to create {op} trigger on {}", self.table))?;
            info!("Created {op} trigger for table {}", self.table);
        }

        Ok(self.enabled_triggers())
    }
}

fn trigger_name(table: &Identifier, op: Operation) -> Result<Identifier, IdentifierError> {
    table.derive("", &format!("_{}_trigger", op.name_fragment()))
}

fn quote(ident: &Identifier) -> String {
    format!("\"{ident}\"")
}
