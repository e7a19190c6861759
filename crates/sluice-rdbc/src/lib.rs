//! # sluice-rdbc
//!
//! Relational database connectivity for the sluice sink runtime.
//!
//! This crate provides the database-facing half of the sink: a dynamic value
//! model, async connection traits, SQL generation per vendor and schema
//! discovery.
//!
//! ## Features
//!
//! - **Value Model**: `Value`/`Row` shared by records, parameters and results
//! - **Connection Traits**: connections, prepared statements, explicit transactions
//! - **SQL Dialect Abstraction**: insert/upsert/replace templates using sea-query
//! - **Schema Discovery**: table columns and unique indexes, candidate key selection
//! - **Error Classification**: SQLSTATE mapping into constraint/conversion/connection errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice_rdbc::prelude::*;
//!
//! let factory = PgConnectionFactory;
//! let conn = factory.connect(&ConnectionConfig::new("postgres://app@localhost/orders")).await?;
//!
//! let table = TableMetadata::new("orders").with_schema(Some("public".into()));
//! let sql = factory.dialect().upsert_sql(&table, &["id"], &["id", "status"]);
//! let stmt = conn.prepare(&sql).await?;
//!
//! let tx = conn.begin().await?;
//! stmt.execute(&[Value::Int64(1), Value::from("shipped")]).await?;
//! tx.commit().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod schema;
pub mod security;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{ConstraintKind, Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ColumnMetadata, Row, TableMetadata, Value};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, DatabaseType, PreparedStatement,
        Transaction,
    };

    // Dialect types
    pub use crate::dialect::{
        dialect_for, MySqlDialect, PostgresDialect, SqlDialect, SqlServerDialect,
    };

    // Schema types
    pub use crate::schema::{candidate_key, CatalogSchemaProvider, IndexMetadata, SchemaProvider};

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PgConnectionFactory;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = ConnectionConfig::new("postgres://localhost/test");
        let _index = IndexMetadata::new("users", "users_pkey", vec!["id".into()]).primary();
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(!err.is_row_level());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_table_metadata() {
        let table = TableMetadata::new("users").with_schema(Some("public".into()));
        assert_eq!(table.qualified_name(), "public.users");
        assert!(table.columns.is_empty());
    }

    #[test]
    fn test_dialect_selection() {
        assert_eq!(dialect_for("postgres").name(), "PostgreSQL");
        assert_eq!(dialect_for("mysql").name(), "MySQL");
        assert_eq!(dialect_for("sqlserver").name(), "SQL Server");
    }
}
