//! Integration tests for MySQL audit-table change capture
//!
//! These tests need a running MySQL server. Connection settings come from
//! `MYSQL_TEST_HOST`, `MYSQL_TEST_PORT`, `MYSQL_TEST_USER`,
//! `MYSQL_TEST_PASSWORD` and `MYSQL_TEST_DATABASE`, defaulting to the dev
//! compose service. Run with `cargo test -- --ignored`.

use anyhow::Result;
use db_webhook_relay_mysql_trigger_source::{
    new_mysql_pool, poll_once, AuditLog, MySQLAuditLog, MySQLCaptureSource, SourceOpts,
    TrackingPlan,
};
use mysql_async::{prelude::*, Pool};
use relay_core::{
    is_cancelled, CaptureSource, EventQueue, Identifier, Operation, OperationSet,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn source_opts(table: &str, modes: &str) -> SourceOpts {
    SourceOpts {
        host: env_or("MYSQL_TEST_HOST", "mysql"),
        port: env_or("MYSQL_TEST_PORT", "3306").parse().unwrap(),
        user: env_or("MYSQL_TEST_USER", "root"),
        password: env_or("MYSQL_TEST_PASSWORD", "root"),
        database: env_or("MYSQL_TEST_DATABASE", "testdb"),
        table: Identifier::new(table).unwrap(),
        operations: OperationSet::from_modes(modes),
        poll_interval: Duration::from_millis(200),
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

async fn recreate_tables(pool: &Pool, table: &str) -> Result<()> {
    let mut conn = pool.get_conn().await?;
    conn.query_drop(format!("DROP TABLE IF EXISTS `{table}_audit`"))
        .await?;
    conn.query_drop(format!("DROP TABLE IF EXISTS `{table}`")).await?;
    conn.query_drop(format!(
        "CREATE TABLE `{table}` (id INT PRIMARY KEY, status VARCHAR(32) NOT NULL)"
    ))
    .await?;
    Ok(())
}

async fn trigger_names(pool: &Pool, table: &str) -> Result<Vec<String>> {
    let mut conn = pool.get_conn().await?;
    let names = conn
        .exec(
            "SELECT TRIGGER_NAME FROM INFORMATION_SCHEMA.TRIGGERS
             WHERE EVENT_OBJECT_SCHEMA = DATABASE() AND EVENT_OBJECT_TABLE = ?
             ORDER BY TRIGGER_NAME",
            (table,),
        )
        .await?;
    Ok(names)
}

#[tokio::test]
#[ignore = "requires a running MySQL server"]
async fn test_triggers_follow_enabled_operations() -> Result<()> {
    init_logging();
    let table = "relay_my_trigger_modes";
    let opts = source_opts(table, "insert,update");
    let pool = new_mysql_pool(&opts);
    recreate_tables(&pool, table).await?;

    let mut source = MySQLCaptureSource::connect(&opts).await?;
    assert_eq!(source.audit_table().as_str(), "relay_my_trigger_modes_audit");
    assert_eq!(
        trigger_names(&pool, table).await?,
        vec![
            format!("{table}_insert_trigger"),
            format!("{table}_update_trigger")
        ]
    );
    source.close().await?;

    let mut source = MySQLCaptureSource::connect(&source_opts(table, "delete")).await?;
    assert_eq!(
        trigger_names(&pool, table).await?,
        vec![format!("{table}_delete_trigger")]
    );
    source.close().await?;
    source.close().await?;

    pool.disconnect().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running MySQL server"]
async fn test_audit_rows_become_events_and_are_marked() -> Result<()> {
    init_logging();
    let table = "relay_my_orders";
    let opts = source_opts(table, "insert,update,delete");
    let pool = new_mysql_pool(&opts);
    recreate_tables(&pool, table).await?;

    let mut source = MySQLCaptureSource::connect(&opts).await?;

    {
        let mut conn = pool.get_conn().await?;
        conn.query_drop(format!("INSERT INTO `{table}` VALUES (1, 'new')"))
            .await?;
        conn.query_drop(format!("UPDATE `{table}` SET status = 'shipped' WHERE id = 1"))
            .await?;
        conn.query_drop(format!("DELETE FROM `{table}` WHERE id = 1"))
            .await?;
    }

    let plan = TrackingPlan::new(&opts.table, opts.operations)?;
    let mut audit = MySQLAuditLog::new(pool.clone(), &plan);
    let pending = audit.fetch_unprocessed(10).await?;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|r| !r.processed && r.table_name == table));

    let queue = EventQueue::new(10);
    let report = poll_once(&mut audit, &queue).await?;
    assert_eq!(report.enqueued, 3);
    assert!(audit.fetch_unprocessed(10).await?.is_empty());

    let cancel = CancellationToken::new();
    let insert = queue.pop(&cancel).await.unwrap();
    let update = queue.pop(&cancel).await.unwrap();
    let delete = queue.pop(&cancel).await.unwrap();

    assert_eq!(insert.operation(), Operation::Insert);
    assert_eq!(insert.data()["status"], "new");
    assert!(insert.old_data().is_none());

    assert_eq!(update.operation(), Operation::Update);
    assert_eq!(update.data()["status"], "shipped");
    assert_eq!(update.old_data().unwrap()["status"], "new");

    assert_eq!(delete.operation(), Operation::Delete);
    assert_eq!(delete.data()["id"], 1);

    source.close().await?;
    pool.disconnect().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running MySQL server"]
async fn test_capture_loop_polls_until_cancelled() -> Result<()> {
    init_logging();
    let table = "relay_my_capture_loop";
    let opts = source_opts(table, "insert");
    let pool = new_mysql_pool(&opts);
    recreate_tables(&pool, table).await?;

    let mut source = MySQLCaptureSource::connect(&opts).await?;
    {
        let mut conn = pool.get_conn().await?;
        conn.query_drop(format!("INSERT INTO `{table}` VALUES (5, 'new')"))
            .await?;
    }

    let queue = EventQueue::new(10);
    let cancel = CancellationToken::new();
    let stopper = {
        let cancel = cancel.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                if !queue.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            cancel.cancel();
        })
    };

    let result = source.capture(&queue, &cancel).await;
    assert!(is_cancelled(&result.unwrap_err()));
    stopper.await?;

    let event = queue.pop(&CancellationToken::new()).await.unwrap();
    assert_eq!(event.data()["id"], 5);

    source.close().await?;
    pool.disconnect().await?;
    Ok(())
}
