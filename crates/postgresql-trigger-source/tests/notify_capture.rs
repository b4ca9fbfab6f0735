//! Integration tests for PostgreSQL trigger installation and LISTEN/NOTIFY capture
//!
//! These tests need a running PostgreSQL server. Connection settings come
//! from `POSTGRESQL_TEST_HOST`, `POSTGRESQL_TEST_PORT`, `POSTGRESQL_TEST_USER`,
//! `POSTGRESQL_TEST_PASSWORD` and `POSTGRESQL_TEST_DATABASE`, defaulting to
//! the dev compose service. Run with `cargo test -- --ignored`.

use async_trait::async_trait;
use db_webhook_relay_postgresql_trigger_source::{connect, PostgresCaptureSource, SourceOpts};
use relay_core::{
    is_cancelled, CaptureSource, ChangeEvent, EventQueue, Identifier, Notify, Operation,
    OperationSet, WorkerPool,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn source_opts(table: &str, modes: &str) -> SourceOpts {
    SourceOpts {
        host: env_or("POSTGRESQL_TEST_HOST", "postgresql"),
        port: env_or("POSTGRESQL_TEST_PORT", "5432").parse().unwrap(),
        user: env_or("POSTGRESQL_TEST_USER", "postgres"),
        password: env_or("POSTGRESQL_TEST_PASSWORD", "postgres"),
        database: env_or("POSTGRESQL_TEST_DATABASE", "testdb"),
        sslmode: "disable".to_string(),
        table: Identifier::new(table).unwrap(),
        operations: OperationSet::from_modes(modes),
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Plain client for test setup, separate from the source's own connections
async fn admin_client(opts: &SourceOpts) -> Client {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&opts.host)
        .port(opts.port)
        .user(&opts.user)
        .password(&opts.password)
        .dbname(&opts.database);
    let (client, _connection) = connect(&config).await.expect("connect to PostgreSQL");
    client
}

async fn recreate_table(client: &Client, table: &str) {
    client
        .batch_execute(&format!(
            "DROP TABLE IF EXISTS {table} CASCADE;
             CREATE TABLE {table} (id INT PRIMARY KEY, status TEXT NOT NULL, total NUMERIC(10,2));"
        ))
        .await
        .expect("create test table");
}

async fn installed_triggers(client: &Client, table: &str) -> Vec<String> {
    let rows = client
        .query(
            "SELECT tgname::text FROM pg_trigger
             WHERE tgrelid = $1::text::regclass AND NOT tgisinternal
             ORDER BY tgname",
            &[&table],
        )
        .await
        .expect("query pg_trigger");
    rows.iter().map(|row| row.get::<_, String>(0)).collect()
}

#[derive(Default)]
struct RecordingNotifier {
    delivered: Mutex<Vec<ChangeEvent>>,
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> anyhow::Result<()> {
        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Run the capture loop and a single worker until `count` events were delivered
async fn capture_until(
    source: &mut PostgresCaptureSource,
    admin: &Client,
    statements: &str,
    count: usize,
) -> Vec<ChangeEvent> {
    let queue = EventQueue::new(16);
    let notifier = Arc::new(RecordingNotifier::default());
    let cancel = CancellationToken::new();

    source.prepare().await.expect("open notification session");
    let pool = WorkerPool::start(1, queue.clone(), notifier.clone(), cancel.clone());

    admin.batch_execute(statements).await.expect("apply changes");

    let watcher = {
        let notifier = notifier.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                let delivered = notifier.delivered.lock().unwrap().len();
                if delivered >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            cancel.cancel();
        })
    };

    let result = source.capture(&queue, &cancel).await;
    assert!(is_cancelled(&result.unwrap_err()));
    watcher.await.unwrap();
    pool.shutdown(Duration::from_secs(1)).await;

    let delivered = notifier.delivered.lock().unwrap().clone();
    delivered
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_triggers_follow_enabled_operations() {
    init_logging();
    let table = "relay_pg_trigger_modes";
    let opts = source_opts(table, "insert,update");
    let admin = admin_client(&opts).await;
    recreate_table(&admin, table).await;

    let mut source = PostgresCaptureSource::connect(&opts).await.unwrap();
    assert_eq!(
        installed_triggers(&admin, table).await,
        vec![
            format!("{table}_insert_trigger"),
            format!("{table}_update_trigger")
        ]
    );
    source.close().await.unwrap();

    // Re-running setup with a smaller set removes the UPDATE trigger
    let mut source = PostgresCaptureSource::connect(&source_opts(table, "delete"))
        .await
        .unwrap();
    assert_eq!(
        installed_triggers(&admin, table).await,
        vec![format!("{table}_delete_trigger")]
    );
    assert_eq!(source.installed_triggers().len(), 1);
    source.close().await.unwrap();
    source.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_insert_is_delivered_without_old_data() {
    init_logging();
    let table = "relay_pg_orders_insert";
    let opts = source_opts(table, "insert");
    let admin = admin_client(&opts).await;
    recreate_table(&admin, table).await;

    let mut source = PostgresCaptureSource::connect(&opts).await.unwrap();
    let delivered = capture_until(
        &mut source,
        &admin,
        &format!("INSERT INTO {table} (id, status, total) VALUES (1, 'new', 12.50)"),
        1,
    )
    .await;
    source.close().await.unwrap();

    assert_eq!(delivered.len(), 1);
    let event = &delivered[0];
    assert_eq!(event.operation(), Operation::Insert);
    assert_eq!(event.table(), table);
    assert_eq!(event.data()["id"], 1);
    assert_eq!(event.data()["status"], "new");
    assert!(event.old_data().is_none());
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_update_carries_old_and_new_row() {
    init_logging();
    let table = "relay_pg_orders_update";
    let opts = source_opts(table, "update");
    let admin = admin_client(&opts).await;
    recreate_table(&admin, table).await;
    admin
        .batch_execute(&format!(
            "INSERT INTO {table} (id, status) VALUES (1, 'new')"
        ))
        .await
        .unwrap();

    let mut source = PostgresCaptureSource::connect(&opts).await.unwrap();
    let delivered = capture_until(
        &mut source,
        &admin,
        &format!("UPDATE {table} SET status = 'shipped' WHERE id = 1"),
        1,
    )
    .await;
    source.close().await.unwrap();

    // The INSERT above happened before the triggers existed
    assert_eq!(delivered.len(), 1);
    let event = &delivered[0];
    assert_eq!(event.operation(), Operation::Update);
    assert_eq!(event.data()["status"], "shipped");
    assert_eq!(event.old_data().unwrap()["status"], "new");
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn test_delete_carries_deleted_row_as_data() {
    init_logging();
    let table = "relay_pg_orders_delete";
    let opts = source_opts(table, "delete");
    let admin = admin_client(&opts).await;
    recreate_table(&admin, table).await;
    admin
        .batch_execute(&format!(
            "INSERT INTO {table} (id, status) VALUES (9, 'cancelled')"
        ))
        .await
        .unwrap();

    let mut source = PostgresCaptureSource::connect(&opts).await.unwrap();
    let delivered = capture_until(
        &mut source,
        &admin,
        &format!("DELETE FROM {table} WHERE id = 9"),
        1,
    )
    .await;
    source.close().await.unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].operation(), Operation::Delete);
    assert_eq!(delivered[0].data()["id"], 9);
    assert!(delivered[0].old_data().is_none());
}
