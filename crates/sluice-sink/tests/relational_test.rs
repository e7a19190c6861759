//! Relational adapter schema resolution and statement tests

use sluice_rdbc::schema::IndexMetadata;
use sluice_rdbc::types::{ColumnMetadata, TableMetadata, Value};
use sluice_sink::coerce::ColumnType;
use sluice_sink::config::{ColumnSpec, SinkConfig, WriteMode};
use sluice_sink::error::{ErrorKind, SinkError};
use sluice_sink::record::Record;
use sluice_sink::relational::RelationalTargetAdapter;
use sluice_sink::sink::{TargetAdapter, WriterContext};
use sluice_sink::testing::MemoryBackend;
use sluice_sink::SensitiveString;
use std::sync::Arc;

fn users_table() -> TableMetadata {
    let mut table = TableMetadata::new("users").with_schema(Some("public".into()));
    table.columns = vec![
        ColumnMetadata::new("id", "integer"),
        ColumnMetadata::new("email", "character varying"),
        ColumnMetadata::new("signup", "date"),
        ColumnMetadata::new("score", "numeric"),
        ColumnMetadata::new("note", "text"),
    ];
    table
}

fn config(mode: WriteMode) -> SinkConfig {
    SinkConfig {
        connection_url: SensitiveString::new("postgres://app:pw@localhost/crm"),
        schema: Some("public".into()),
        table: "users".into(),
        write_mode: mode,
        ..Default::default()
    }
}

async fn open(
    config: SinkConfig,
    backend: &MemoryBackend,
) -> Result<RelationalTargetAdapter, SinkError> {
    let mut adapter = RelationalTargetAdapter::new(config, Arc::new(backend.clone()));
    adapter.open(&WriterContext::default()).await?;
    Ok(adapter)
}

// ============================================================================
// Schema resolution Tests
// ============================================================================

#[tokio::test]
async fn test_discovers_full_columns() {
    let backend = MemoryBackend::new().with_table(users_table());
    let adapter = open(config(WriteMode::Insert), &backend).await.unwrap();

    let names: Vec<_> = adapter.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "email", "signup", "score", "note"]);
    assert_eq!(adapter.columns()[2].kind, ColumnType::Date);
    assert!(adapter.update_key().is_empty());
    assert!(adapter.sql().starts_with("INSERT INTO \"public\".\"users\""));
    assert!(adapter.sql().contains("$5"));
    assert_eq!(backend.state().prepared, vec![adapter.sql().to_string()]);
}

#[tokio::test]
async fn test_upsert_key_from_unique_index() {
    let backend = MemoryBackend::new()
        .with_table(users_table())
        .with_index(IndexMetadata::new("users", "users_email_key", vec!["email".into()]).unique())
        .with_index(IndexMetadata::new("users", "users_id_key", vec!["id".into()]).unique());

    let mut config = config(WriteMode::Upsert);
    config.columns = vec![ColumnSpec::new("id", ""), ColumnSpec::new("email", "")];
    let adapter = open(config, &backend).await.unwrap();

    // unique indexes are taken in name order
    assert_eq!(adapter.update_key(), ["email".to_string()]);
    assert!(adapter.sql().contains("ON CONFLICT (\"email\")"));
}

#[tokio::test]
async fn test_upsert_key_from_unique_index_on_id() {
    let backend = MemoryBackend::new()
        .with_table(users_table())
        .with_index(IndexMetadata::new("users", "users_id_key", vec!["id".into()]).unique());

    let adapter = open(config(WriteMode::Upsert), &backend).await.unwrap();
    assert_eq!(adapter.update_key(), ["id".to_string()]);
    assert!(adapter.sql().contains("ON CONFLICT (\"id\") DO UPDATE"));
    assert!(!adapter.sql().contains("\"id\" = \"excluded\".\"id\""));
}

#[tokio::test]
async fn test_primary_key_wins() {
    let backend = MemoryBackend::new()
        .with_table(users_table())
        .with_index(IndexMetadata::new("users", "a_email_key", vec!["email".into()]).unique())
        .with_index(IndexMetadata::new("users", "users_pkey", vec!["id".into()]).primary());

    let adapter = open(config(WriteMode::Replace), &backend).await.unwrap();
    assert_eq!(adapter.update_key(), ["id".to_string()]);
}

#[tokio::test]
async fn test_configured_key_skips_index_lookup() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut config = config(WriteMode::Upsert);
    config.update_key = vec!["email".into()];

    let adapter = open(config, &backend).await.unwrap();
    assert_eq!(adapter.update_key(), ["email".to_string()]);
}

#[tokio::test]
async fn test_missing_key_is_schema_error() {
    let backend = MemoryBackend::new().with_table(users_table());
    let err = open(config(WriteMode::Replace), &backend).await.unwrap_err();
    assert!(matches!(err, SinkError::Schema(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_unknown_table_is_schema_error() {
    let backend = MemoryBackend::new();
    let err = open(config(WriteMode::Insert), &backend).await.unwrap_err();
    assert!(matches!(err, SinkError::Schema(_)));
}

#[tokio::test]
async fn test_write_column_outside_full_columns() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut config = config(WriteMode::Insert);
    config.columns = vec![ColumnSpec::new("id", ""), ColumnSpec::new("nickname", "")];

    let err = open(config, &backend).await.unwrap_err();
    assert!(err.to_string().contains("nickname"));
}

#[tokio::test]
async fn test_replace_resets_unwritten_columns() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut config = config(WriteMode::Replace);
    config.update_key = vec!["id".into()];
    config.columns = vec![ColumnSpec::new("id", ""), ColumnSpec::new("email", "")];

    let adapter = open(config, &backend).await.unwrap();
    assert!(adapter.sql().contains("\"note\" = NULL"), "{}", adapter.sql());
    assert_eq!(adapter.full_columns().len(), 5);
}

#[tokio::test]
async fn test_configured_full_columns_skip_discovery() {
    let backend = MemoryBackend::new();
    let mut config = config(WriteMode::Insert);
    config.full_columns = vec![
        ColumnSpec::new("id", "bigint"),
        ColumnSpec::new("payload", "text"),
    ];

    let adapter = open(config, &backend).await.unwrap();
    assert_eq!(adapter.columns().len(), 2);
    assert_eq!(adapter.columns()[0].kind, ColumnType::BigInt);
}

#[tokio::test]
async fn test_dialect_override() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut config = config(WriteMode::Upsert);
    config.dialect = Some("mysql".into());
    config.update_key = vec!["id".into()];

    let adapter = open(config, &backend).await.unwrap();
    assert!(adapter.sql().contains("ON DUPLICATE KEY UPDATE"), "{}", adapter.sql());
    assert!(adapter.sql().contains('?'));
}

#[tokio::test]
async fn test_hooks_run_on_first_partition() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut config = config(WriteMode::Insert);
    config.pre_sql = vec!["TRUNCATE users".into(), "  ".into()];
    let mut adapter = open(config, &backend).await.unwrap();

    adapter.before_write(&WriterContext::default()).await.unwrap();
    assert_eq!(backend.state().statements, vec!["TRUNCATE users".to_string()]);
}

// ============================================================================
// Binding Tests
// ============================================================================

#[tokio::test]
async fn test_bind_coerces_by_declared_type() {
    let backend = MemoryBackend::new().with_table(users_table());
    let adapter = open(config(WriteMode::Insert), &backend).await.unwrap();

    let record = Record::new()
        .with("ID", "42")
        .with("email", "")
        .with("signup", "2024-03-01 10:00:00")
        .with("score", " ")
        .with("note", 7_i64);
    let params = adapter.bind(&record).unwrap();

    assert_eq!(params[0], Value::Int32(42));
    assert_eq!(params[1], Value::from(""));
    assert!(matches!(params[2], Value::Date(_)));
    assert_eq!(params[3], Value::Null);
    assert_eq!(params[4], Value::from("7"));
}

#[tokio::test]
async fn test_bind_reports_column_position() {
    let backend = MemoryBackend::new().with_table(users_table());
    let adapter = open(config(WriteMode::Insert), &backend).await.unwrap();

    let record = Record::new().with("id", 1_i64).with("signup", "someday");
    let err = adapter.bind(&record).unwrap_err();
    let rec = err.record_error().unwrap();
    assert_eq!(rec.kind, ErrorKind::Conversion);
    assert_eq!(rec.column, Some(2));
}

#[tokio::test]
async fn test_custom_date_format() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut config = config(WriteMode::Insert);
    config.date_format = Some("%d/%m/%Y".into());
    let adapter = open(config, &backend).await.unwrap();

    let params = adapter
        .bind(&Record::new().with("signup", "01/03/2024"))
        .unwrap();
    assert_eq!(
        params[2],
        Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
    );
}

// ============================================================================
// Transaction Tests
// ============================================================================

#[tokio::test]
async fn test_batch_kept_open_until_commit() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut adapter = open(config(WriteMode::Insert), &backend).await.unwrap();

    let records = vec![
        Record::new().with("id", 1_i64),
        Record::new().with("id", 2_i64),
    ];
    adapter.write_batch(&records, true).await.unwrap();
    adapter.write_batch(&records[..1], true).await.unwrap();
    assert!(adapter.in_transaction());
    assert!(backend.committed_rows().is_empty());
    assert_eq!(backend.state().begins, 1);

    adapter.commit().await.unwrap();
    assert_eq!(backend.committed_rows().len(), 3);
    assert_eq!(backend.commits(), 1);

    adapter.close().await.unwrap();
    assert_eq!(backend.state().closed, 1);
}

#[tokio::test]
async fn test_close_rolls_back_leftover_transaction() {
    let backend = MemoryBackend::new().with_table(users_table());
    let mut adapter = open(config(WriteMode::Insert), &backend).await.unwrap();

    adapter
        .write_batch(&[Record::new().with("id", 1_i64)], true)
        .await
        .unwrap();
    adapter.close().await.unwrap();
    assert_eq!(backend.rollbacks(), 1);
    assert!(backend.committed_rows().is_empty());
}
