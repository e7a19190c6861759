//! Write template tests for the sluice-rdbc dialect module

use sluice_rdbc::dialect::{
    dialect_for, MySqlDialect, PostgresDialect, SqlDialect, SqlServerDialect,
};
use sluice_rdbc::types::TableMetadata;

fn orders() -> TableMetadata {
    TableMetadata::new("orders").with_schema(Some("sales".into()))
}

// ============================================================================
// Identifier and placeholder Tests
// ============================================================================

#[test]
fn test_quote_identifier_escaping() {
    assert_eq!(PostgresDialect.quote_identifier("my\"table"), "\"my\"\"table\"");
    assert_eq!(MySqlDialect.quote_identifier("my`table"), "`my``table`");
    assert_eq!(SqlServerDialect.quote_identifier("my]table"), "[my]]table]");
}

#[test]
fn test_placeholders() {
    assert_eq!(PostgresDialect.placeholder(10), "$10");
    assert_eq!(MySqlDialect.placeholder(10), "?");
    assert_eq!(SqlServerDialect.placeholder(10), "@p10");
}

#[test]
fn test_qualified_table() {
    assert_eq!(PostgresDialect.qualified_table(&orders()), "\"sales\".\"orders\"");
    assert_eq!(
        MySqlDialect.qualified_table(&TableMetadata::new("orders")),
        "`orders`"
    );
}

// ============================================================================
// Template column Tests
// ============================================================================

#[test]
fn test_templates_bind_one_parameter_per_write_column() {
    let columns = ["id", "status", "total"];
    for name in ["postgres", "sqlserver"] {
        let dialect = dialect_for(name);
        let placeholders: Vec<_> = (1..=columns.len()).map(|i| dialect.placeholder(i)).collect();
        for sql in [
            dialect.insert_sql(&orders(), &columns),
            dialect.upsert_sql(&orders(), &["id"], &columns),
            dialect.replace_sql(&orders(), &["id"], &columns, &["id", "status", "total", "note"]),
        ] {
            for p in &placeholders {
                assert!(sql.contains(p.as_str()), "{sql} lacks {p}");
            }
            assert!(
                !sql.contains(dialect.placeholder(columns.len() + 1).as_str()),
                "{sql}"
            );
        }
    }

    let dialect = MySqlDialect;
    for sql in [
        dialect.insert_sql(&orders(), &columns),
        dialect.upsert_sql(&orders(), &["id"], &columns),
        dialect.replace_sql(&orders(), &["id"], &columns, &columns),
    ] {
        assert_eq!(sql.matches('?').count(), columns.len(), "{sql}");
    }
}

#[test]
fn test_insert_lists_exactly_write_columns() {
    let sql = PostgresDialect.insert_sql(&orders(), &["id", "status"]);
    assert!(sql.contains("(\"id\", \"status\")"));
    assert!(!sql.contains("total"));
}

#[test]
fn test_upsert_conflict_target_is_update_key() {
    let sql = PostgresDialect.upsert_sql(&orders(), &["tenant", "id"], &["tenant", "id", "status"]);
    assert!(sql.contains("ON CONFLICT (\"tenant\", \"id\")"));
    assert!(sql.contains("\"status\" = \"excluded\".\"status\""));
    assert!(!sql.contains("\"tenant\" = \"excluded\""));
}

#[test]
fn test_upsert_key_match_ignores_case() {
    let sql = PostgresDialect.upsert_sql(&orders(), &["ID"], &["id", "status"]);
    assert!(!sql.contains("\"id\" = \"excluded\".\"id\""));
}

#[test]
fn test_replace_postgres_key_only_does_nothing() {
    let sql = PostgresDialect.replace_sql(&orders(), &["id"], &["id"], &["id"]);
    assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
}

#[test]
fn test_replace_sqlserver_merge_shape() {
    let sql = SqlServerDialect.replace_sql(
        &orders(),
        &["id"],
        &["id", "status"],
        &["id", "status", "note"],
    );
    assert!(sql.starts_with("MERGE [sales].[orders] AS target USING (SELECT @p1 as [id], @p2 as [status]) AS source"));
    assert!(sql.contains("target.[note] = NULL"));
    assert!(sql.ends_with(";"));
}

#[test]
fn test_mysql_upsert_updates_written_columns() {
    let sql = MySqlDialect.upsert_sql(&orders(), &["id"], &["id", "status"]);
    assert!(sql.contains("ON DUPLICATE KEY UPDATE"));
    assert!(sql.contains("`status` = VALUES(`status`)"));
}

// ============================================================================
// Catalog SQL Tests
// ============================================================================

#[test]
fn test_catalog_queries_default_schema() {
    assert!(PostgresDialect
        .list_columns_sql(None, "orders")
        .contains("c.table_schema = 'public'"));
    assert!(SqlServerDialect
        .list_columns_sql(None, "orders")
        .contains("c.TABLE_SCHEMA = 'dbo'"));
    assert!(MySqlDialect
        .list_columns_sql(None, "orders")
        .contains("table_schema = DATABASE()"));
}

#[test]
fn test_catalog_queries_only_unique_indexes() {
    assert!(PostgresDialect
        .list_unique_indexes_sql(Some("sales"), "orders")
        .contains("ix.indisunique"));
    assert!(SqlServerDialect
        .list_unique_indexes_sql(Some("sales"), "orders")
        .contains("i.is_unique = 1"));
}
