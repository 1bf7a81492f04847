// ABOUTME: Integration tests against live PostgreSQL source and target databases
// ABOUTME: Requires TEST_SOURCE_URL and TEST_TARGET_URL; run with `cargo test -- --ignored`

use std::env;
use std::time::Duration;
use table_sync::postgres::{connect, connect_with_retry, list_tables, PgTable};
use table_sync::sync::{
    read_table, ApplyMode, ReconcileConfig, Reconciler, Side, SyncError, TableSource, Value,
};
use tokio::sync::Mutex;
use tokio_postgres::Client;

/// Helper to get test database URLs from environment
fn get_test_urls() -> Option<(String, String)> {
    let source = env::var("TEST_SOURCE_URL").ok()?;
    let target = env::var("TEST_TARGET_URL").ok()?;
    Some((source, target))
}

async fn clients() -> (Mutex<Client>, Mutex<Client>) {
    let (source_url, target_url) =
        get_test_urls().expect("TEST_SOURCE_URL and TEST_TARGET_URL must be set");
    let source = connect(&source_url).await.expect("source connection");
    let target = connect(&target_url).await.expect("target connection");
    (Mutex::new(source), Mutex::new(target))
}

async fn count_rows(client: &Client, table: &str) -> i64 {
    client
        .query_one(&format!(r#"SELECT count(*) FROM "{table}""#), &[])
        .await
        .unwrap()
        .get(0)
}

async fn create_table(client: &Client, table: &str, ddl_columns: &str) {
    client
        .batch_execute(&format!(
            r#"DROP TABLE IF EXISTS "public"."{table}"; CREATE TABLE "public"."{table}" ({ddl_columns})"#
        ))
        .await
        .expect("create table");
}

async fn drop_table(client: &Client, table: &str) {
    let _ = client
        .batch_execute(&format!(r#"DROP TABLE IF EXISTS "public"."{}""#, table))
        .await;
}

const ID_VAL: &str = "id INTEGER PRIMARY KEY, val TEXT";

const PRODUCTS: &str = "id INTEGER PRIMARY KEY, name TEXT NOT NULL, price NUMERIC(10,2), \
                        tags TEXT[], data JSONB, updated_at TIMESTAMPTZ";

#[tokio::test]
#[ignore]
async fn test_full_sync_round_trip() {
    let (source_client, target_client) = clients().await;
    let table = "table_sync_test_products";
    create_table(&*source_client.lock().await, table, PRODUCTS).await;
    create_table(&*target_client.lock().await, table, PRODUCTS).await;

    source_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"INSERT INTO "{table}" VALUES
                (1, 'kept', 1.50, '{{a,b}}', '{{"k": 1}}', '2024-01-01T00:00:00Z'),
                (2, 'new', 2.00, NULL, NULL, NULL),
                (3, 'it''s changed', 3.25, '{{c}}', '[1,2]', now())"#
        ))
        .await
        .unwrap();
    target_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"INSERT INTO "{table}" VALUES
                (1, 'kept', 1.50, '{{a,b}}', '{{"k": 1}}', '2024-01-01T00:00:00Z'),
                (3, 'old', 3.00, NULL, NULL, NULL),
                (4, 'gone', 9.99, NULL, NULL, NULL)"#
        ))
        .await
        .unwrap();

    let source = PgTable::new(&source_client, "public");
    let target = PgTable::new(&target_client, "public");
    let mut reconciler = Reconciler::new(&source, &target, &target, ReconcileConfig::default());

    let outcome = reconciler.synchronize(table, table).await.unwrap();
    assert_eq!(
        (outcome.inserted, outcome.updated, outcome.deleted),
        (1, 1, 1)
    );
    assert_eq!(outcome.unchanged, 1);

    let plan = reconciler.plan(table, table).await.unwrap();
    assert!(plan.diff.is_empty(), "second diff not empty: {:?}", plan.diff);

    let rows = read_table(&target, Side::Target, table)
        .await
        .unwrap();
    let changed = rows
        .iter()
        .find(|r| r.get("id") == Some(&Value::Int(3)))
        .unwrap();
    assert_eq!(changed.get("name"), Some(&Value::from("it's changed")));
    assert_eq!(changed.get("price"), Some(&Value::from("3.25")));

    drop_table(&*source_client.lock().await, table).await;
    drop_table(&*target_client.lock().await, table).await;
}

#[tokio::test]
#[ignore]
async fn test_introspection_reads_key_and_types() {
    let (source_client, _target_client) = clients().await;
    let table = "table_sync_test_lines";
    create_table(
        &*source_client.lock().await,
        table,
        "item_id INTEGER, order_id INTEGER, qty SMALLINT NOT NULL, PRIMARY KEY (order_id, item_id)",
    )
    .await;

    let source = PgTable::new(&source_client, "public");
    let schema = source.table_schema(table).await.unwrap();
    assert_eq!(schema.column_names(), vec!["item_id", "order_id", "qty"]);
    assert_eq!(schema.columns[2].udt_name, "int2");
    assert!(!schema.columns[2].nullable);

    let key = source.primary_key_columns(table).await.unwrap();
    assert_eq!(key, vec!["order_id", "item_id"]);

    let tables = list_tables(&*source_client.lock().await, "public")
        .await
        .unwrap();
    assert!(tables.contains(&table.to_string()));

    drop_table(&*source_client.lock().await, table).await;
}

#[tokio::test]
#[ignore]
async fn test_transactional_failure_leaves_target_untouched() {
    let (source_client, target_client) = clients().await;
    let table = "table_sync_test_tx";
    create_table(&*source_client.lock().await, table, ID_VAL).await;
    // The target refuses values longer than 3 characters
    create_table(&*target_client.lock().await, table, ID_VAL).await;
    target_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"ALTER TABLE "{table}" ADD CONSTRAINT short_val CHECK (length(val) <= 3);
               INSERT INTO "{table}" VALUES (9, 'old')"#
        ))
        .await
        .unwrap();
    source_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"INSERT INTO "{table}" VALUES (1, 'ok'), (2, 'too long')"#
        ))
        .await
        .unwrap();

    let source = PgTable::new(&source_client, "public");
    let target = PgTable::new(&target_client, "public");
    let config = ReconcileConfig {
        apply_mode: ApplyMode::Transactional,
        ..Default::default()
    };
    let mut reconciler = Reconciler::new(&source, &target, &target, config);

    let err = reconciler.synchronize(table, table).await.unwrap_err();
    assert!(matches!(err, SyncError::StatementFailure { .. }));
    assert!(!err.target_modified());

    assert_eq!(count_rows(&*target_client.lock().await, table).await, 1);

    drop_table(&*source_client.lock().await, table).await;
    drop_table(&*target_client.lock().await, table).await;
}

#[tokio::test]
#[ignore]
async fn test_abandoned_transactional_sync_rolls_back_and_frees_connection() {
    let (source_client, target_client) = clients().await;
    let (_, target_url) = get_test_urls().unwrap();
    let table = "table_sync_test_abandoned";
    create_table(&*source_client.lock().await, table, ID_VAL).await;
    create_table(&*target_client.lock().await, table, ID_VAL).await;
    source_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"INSERT INTO "{table}" VALUES (1, 'a'), (2, 'b')"#
        ))
        .await
        .unwrap();
    // Every insert into the target stalls long enough for the caller to give up
    target_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"CREATE OR REPLACE FUNCTION table_sync_test_slow() RETURNS trigger
               LANGUAGE plpgsql AS $$ BEGIN PERFORM pg_sleep(2); RETURN NEW; END $$;
               CREATE TRIGGER slow_insert BEFORE INSERT ON "{table}"
               FOR EACH ROW EXECUTE FUNCTION table_sync_test_slow();
               INSERT INTO "{table}" VALUES (9, 'old')"#
        ))
        .await
        .unwrap();

    let source = PgTable::new(&source_client, "public");
    let target = PgTable::new(&target_client, "public");
    let config = ReconcileConfig {
        apply_mode: ApplyMode::Transactional,
        ..Default::default()
    };
    let mut reconciler = Reconciler::new(&source, &target, &target, config);
    let abandoned =
        tokio::time::timeout(Duration::from_millis(300), reconciler.synchronize(table, table))
            .await;
    assert!(abandoned.is_err());
    drop(reconciler);

    let observer = connect(&target_url).await.unwrap();
    assert_eq!(count_rows(&observer, table).await, 1);

    target_client
        .lock()
        .await
        .batch_execute(&format!(r#"DROP TRIGGER slow_insert ON "{table}""#))
        .await
        .unwrap();
    let mut reconciler = Reconciler::new(&source, &target, &target, ReconcileConfig::default());
    let outcome = reconciler.synchronize(table, table).await.unwrap();
    assert_eq!((outcome.inserted, outcome.deleted), (2, 1));

    // Visible from another session: the shared connection is not stuck in a transaction
    assert_eq!(count_rows(&observer, table).await, 2);

    drop_table(&*source_client.lock().await, table).await;
    drop_table(&*target_client.lock().await, table).await;
    let _ = observer
        .batch_execute("DROP FUNCTION IF EXISTS table_sync_test_slow()")
        .await;
}

#[tokio::test]
#[ignore]
async fn test_infinite_dates_and_timestamps_sync() {
    let (source_client, target_client) = clients().await;
    let table = "table_sync_test_infinity";
    let columns = "id INTEGER PRIMARY KEY, starts DATE, seen TIMESTAMP, at TIMESTAMPTZ";
    create_table(&*source_client.lock().await, table, columns).await;
    create_table(&*target_client.lock().await, table, columns).await;
    source_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"INSERT INTO "{table}" VALUES
                (1, 'infinity', 'infinity', '-infinity'),
                (2, '2024-02-29', '2024-02-29 12:00', '2024-02-29T12:00:00Z')"#
        ))
        .await
        .unwrap();
    target_client
        .lock()
        .await
        .batch_execute(&format!(
            r#"INSERT INTO "{table}" VALUES (1, '-infinity', NULL, 'infinity')"#
        ))
        .await
        .unwrap();

    let source = PgTable::new(&source_client, "public");
    let target = PgTable::new(&target_client, "public");
    let mut reconciler = Reconciler::new(&source, &target, &target, ReconcileConfig::default());
    let outcome = reconciler.synchronize(table, table).await.unwrap();
    assert_eq!((outcome.inserted, outcome.updated), (1, 1));

    let plan = reconciler.plan(table, table).await.unwrap();
    assert!(plan.diff.is_empty(), "second diff not empty: {:?}", plan.diff);

    let rows = read_table(&target, Side::Target, table).await.unwrap();
    let special = rows
        .iter()
        .find(|r| r.get("id") == Some(&Value::Int(1)))
        .unwrap();
    assert_eq!(special.get("starts"), Some(&Value::from("infinity")));
    assert_eq!(special.get("at"), Some(&Value::from("-infinity")));

    let infinite: bool = target_client
        .lock()
        .await
        .query_one(
            &format!(
                r#"SELECT starts = 'infinity'::date AND at = '-infinity'::timestamptz
                   FROM "{table}" WHERE id = 1"#
            ),
            &[],
        )
        .await
        .unwrap()
        .get(0);
    assert!(infinite);

    drop_table(&*source_client.lock().await, table).await;
    drop_table(&*target_client.lock().await, table).await;
}

#[tokio::test]
#[ignore]
async fn test_json_text_is_copied_verbatim() {
    let (source_client, target_client) = clients().await;
    let table = "table_sync_test_json";
    let columns = "id INTEGER PRIMARY KEY, doc JSON";
    create_table(&*source_client.lock().await, table, columns).await;
    create_table(&*target_client.lock().await, table, columns).await;
    let doc = r#"{"b": 1, "a": 2, "a": 3}"#;
    source_client
        .lock()
        .await
        .execute(
            &format!(r#"INSERT INTO "{table}" VALUES (1, $1::text::json)"#),
            &[&doc],
        )
        .await
        .unwrap();

    let source = PgTable::new(&source_client, "public");
    let target = PgTable::new(&target_client, "public");
    let mut reconciler = Reconciler::new(&source, &target, &target, ReconcileConfig::default());
    reconciler.synchronize(table, table).await.unwrap();

    let copied: String = target_client
        .lock()
        .await
        .query_one(&format!(r#"SELECT doc::text FROM "{table}""#), &[])
        .await
        .unwrap()
        .get(0);
    assert_eq!(copied, doc);

    drop_table(&*source_client.lock().await, table).await;
    drop_table(&*target_client.lock().await, table).await;
}

#[tokio::test]
#[ignore]
async fn test_array_element_type_mismatch_is_refused() {
    let (source_client, target_client) = clients().await;
    let table = "table_sync_test_arrays";
    create_table(
        &*source_client.lock().await,
        table,
        "id INTEGER PRIMARY KEY, tags INTEGER[]",
    )
    .await;
    create_table(
        &*target_client.lock().await,
        table,
        "id INTEGER PRIMARY KEY, tags TEXT[]",
    )
    .await;

    let source = PgTable::new(&source_client, "public");
    let target = PgTable::new(&target_client, "public");
    let mut reconciler = Reconciler::new(&source, &target, &target, ReconcileConfig::default());
    let err = reconciler.synchronize(table, table).await.unwrap_err();
    assert!(matches!(err, SyncError::SchemaIncompatible { .. }), "{:?}", err);

    drop_table(&*source_client.lock().await, table).await;
    drop_table(&*target_client.lock().await, table).await;
}

#[tokio::test]
#[ignore]
async fn test_connect_with_retry_rejects_bad_password_without_retrying() {
    let (source_url, _) =
        get_test_urls().expect("TEST_SOURCE_URL and TEST_TARGET_URL must be set");
    let mut url = url::Url::parse(&source_url).expect("TEST_SOURCE_URL must be a URL");
    url.set_password(Some("definitely-wrong")).unwrap();

    let started = std::time::Instant::now();
    let err = connect_with_retry(url.as_str(), 5, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert!(table_sync::postgres::is_auth_failure(&err));
    assert!(started.elapsed() < Duration::from_secs(2));
}
