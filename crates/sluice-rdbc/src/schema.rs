//! Schema discovery for sluice-rdbc
//!
//! Provides:
//! - SchemaProvider: Read-only discovery of table columns and unique indexes
//! - CatalogSchemaProvider: SchemaProvider driven by a dialect's catalog queries
//! - Candidate key selection for keyed write modes

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::connection::Connection;
use crate::dialect::SqlDialect;
use crate::error::Result;
use crate::types::{ColumnMetadata, Row, TableMetadata};

/// Schema provider for read-only schema discovery
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Get table metadata, `None` when the table does not exist
    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>>;

    /// List the unique indexes (primary key included) on a table
    async fn list_indexes(&self, schema: Option<&str>, table: &str) -> Result<Vec<IndexMetadata>>;

    /// First usable unique key of a table, see [`candidate_key`]
    async fn candidate_key(&self, schema: Option<&str>, table: &str) -> Result<Option<Vec<String>>> {
        let indexes = self.list_indexes(schema, table).await?;
        Ok(candidate_key(&indexes))
    }
}

/// Index metadata
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: String,
    /// Index name
    pub name: String,
    /// Column names (in order)
    pub columns: Vec<String>,
    /// Whether the index is unique
    pub unique: bool,
    /// Whether this is the primary key index
    pub primary: bool,
}

impl IndexMetadata {
    /// Create a new index metadata
    pub fn new(table: impl Into<String>, name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            schema: None,
            table: table.into(),
            name: name.into(),
            columns,
            unique: false,
            primary: false,
        }
    }

    /// Set as unique index
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set as primary key index
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self
    }
}

/// Pick the key used to match existing rows.
///
/// The primary key wins; otherwise unique indexes are considered in name order
/// and the first one with at least one column is returned.
pub fn candidate_key(indexes: &[IndexMetadata]) -> Option<Vec<String>> {
    if let Some(pk) = indexes
        .iter()
        .find(|i| i.primary && !i.columns.is_empty())
    {
        return Some(pk.columns.clone());
    }

    let mut unique: Vec<_> = indexes
        .iter()
        .filter(|i| i.unique && !i.columns.is_empty())
        .collect();
    unique.sort_by(|a, b| a.name.cmp(&b.name));
    unique.first().map(|i| i.columns.clone())
}

/// Schema provider that runs a dialect's catalog queries over a connection
pub struct CatalogSchemaProvider {
    conn: Arc<dyn Connection>,
    dialect: Box<dyn SqlDialect>,
}

impl CatalogSchemaProvider {
    /// Create a provider reading through `conn` with `dialect`'s catalog SQL
    pub fn new(conn: Arc<dyn Connection>, dialect: Box<dyn SqlDialect>) -> Self {
        Self { conn, dialect }
    }
}

fn column_from_row(row: &Row) -> ColumnMetadata {
    let name = row
        .get_by_name("column_name")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let type_name = row
        .get_by_name("data_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let nullable = row
        .get_by_name("nullable")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let ordinal = row
        .get_by_name("ordinal_position")
        .and_then(|v| v.as_i64())
        .unwrap_or(0) as u32;

    let pk_ordinal = row
        .get_by_name("pk_ordinal")
        .and_then(|v| v.as_i64())
        .map(|v| v as u32);

    ColumnMetadata {
        name,
        type_name,
        nullable,
        primary_key_ordinal: pk_ordinal,
        ordinal,
    }
}

#[async_trait]
impl SchemaProvider for CatalogSchemaProvider {
    async fn get_table(&self, schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>> {
        let sql = self.dialect.list_columns_sql(schema, table);
        let rows = self.conn.query(&sql, &[]).await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut table_meta = TableMetadata::new(table).with_schema(schema.map(String::from));
        table_meta.columns = rows.iter().map(column_from_row).collect();

        debug!(
            table = %table_meta.qualified_name(),
            columns = table_meta.columns.len(),
            "Loaded table metadata"
        );
        Ok(Some(table_meta))
    }

    async fn list_indexes(&self, schema: Option<&str>, table: &str) -> Result<Vec<IndexMetadata>> {
        let sql = self.dialect.list_unique_indexes_sql(schema, table);
        let rows = self.conn.query(&sql, &[]).await?;

        // Rows arrive ordered by index then column position
        let mut indexes: BTreeMap<String, IndexMetadata> = BTreeMap::new();

        for row in &rows {
            let index_name = row
                .get_by_name("index_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let column_name = row
                .get_by_name("column_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let is_primary = row
                .get_by_name("is_primary")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let entry = indexes
                .entry(index_name.to_string())
                .or_insert_with(|| IndexMetadata {
                    schema: schema.map(String::from),
                    table: table.to_string(),
                    name: index_name.to_string(),
                    columns: vec![],
                    unique: true,
                    primary: is_primary,
                });

            entry.columns.push(column_name.to_string());
        }

        Ok(indexes.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_builders() {
        let idx = IndexMetadata::new("users", "users_pkey", vec!["id".into()]).primary();
        assert!(idx.primary);
        assert!(idx.unique);

        let idx = IndexMetadata::new("users", "users_email_key", vec!["email".into()]).unique();
        assert!(idx.unique);
        assert!(!idx.primary);
    }

    #[test]
    fn test_candidate_key_prefers_primary() {
        let indexes = vec![
            IndexMetadata::new("t", "a_email", vec!["email".into()]).unique(),
            IndexMetadata::new("t", "t_pkey", vec!["id".into()]).primary(),
        ];
        assert_eq!(candidate_key(&indexes), Some(vec!["id".to_string()]));
    }

    #[test]
    fn test_candidate_key_unique_by_name() {
        let indexes = vec![
            IndexMetadata::new("t", "z_code", vec!["code".into()]).unique(),
            IndexMetadata::new("t", "b_email", vec!["email".into(), "tenant".into()]).unique(),
            IndexMetadata::new("t", "a_empty", vec![]).unique(),
            IndexMetadata::new("t", "a_plain", vec!["name".into()]),
        ];
        assert_eq!(
            candidate_key(&indexes),
            Some(vec!["email".to_string(), "tenant".to_string()])
        );
    }

    #[test]
    fn test_candidate_key_none() {
        assert_eq!(candidate_key(&[]), None);
        let indexes = vec![IndexMetadata::new("t", "plain", vec!["name".into()])];
        assert_eq!(candidate_key(&indexes), None);
    }
}
