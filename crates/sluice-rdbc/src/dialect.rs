//! SQL dialect abstraction for sluice-rdbc
//!
//! Provides vendor-specific SQL generation using sea-query for type-safe query
//! building on PostgreSQL and MySQL, with manual SQL where sea-query has no
//! backend (SQL Server) or no statement shape (whole-row replace).
//!
//! - SqlDialect: Trait for database-specific SQL generation
//! - Write templates: plain insert, upsert, replace keyed by an update key
//! - Metadata lookups: column listing and unique index listing

use crate::security::escape_string_literal;
use crate::types::TableMetadata;
use sea_query::{
    Alias, Expr, IntoIden, MysqlQueryBuilder, OnConflict, PostgresQueryBuilder, Query, TableRef,
};

// ---------------------------------------------------------------------------
// Helper: build a sea-query TableRef from optional schema + table name
// ---------------------------------------------------------------------------

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

fn contains_ignore_case(list: &[&str], name: &str) -> bool {
    list.iter().any(|c| c.eq_ignore_ascii_case(name))
}

/// SQL dialect for vendor-specific SQL generation
///
/// Every write template binds exactly one parameter per entry of `columns`, in
/// order, so a statement prepared from it accepts a record's values directly.
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Get the placeholder for a parameter (e.g., $1, ?, @p1)
    fn placeholder(&self, index: usize) -> String;

    /// Quoted, schema-qualified table reference
    fn qualified_table(&self, table: &TableMetadata) -> String {
        match &table.schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(&table.name)
            ),
            None => self.quote_identifier(&table.name),
        }
    }

    /// SQL listing the columns of a table.
    ///
    /// Result columns: `column_name`, `data_type`, `nullable`,
    /// `ordinal_position`, `pk_ordinal`.
    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// SQL listing the unique indexes of a table, one row per indexed column.
    ///
    /// Result columns: `index_name`, `column_name`, `is_primary`, ordered by
    /// index name then column position.
    fn list_unique_indexes_sql(&self, schema: Option<&str>, table: &str) -> String;

    /// Plain insert of `columns`
    fn insert_sql(&self, table: &TableMetadata, columns: &[&str]) -> String;

    /// Insert, or update the non-key written columns when `key_columns` collide
    fn upsert_sql(&self, table: &TableMetadata, key_columns: &[&str], columns: &[&str])
        -> String;

    /// Insert, or overwrite the whole row when `key_columns` collide.
    ///
    /// Columns of `full_columns` that are not written are reset.
    fn replace_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        columns: &[&str],
        full_columns: &[&str],
    ) -> String;

    /// Escape a string literal
    fn escape_string(&self, value: &str) -> String {
        escape_string_literal(value)
    }
}

// ===========================================================================
// PostgreSQL: sea-query for insert / upsert
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("public"));
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                c.column_name,
                c.data_type,
                c.is_nullable = 'YES' as nullable,
                c.ordinal_position,
                CASE WHEN pk.column_name IS NOT NULL THEN pk.ordinal_position END as pk_ordinal
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT ku.column_name, ku.ordinal_position
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage ku
                    ON tc.constraint_name = ku.constraint_name
                    AND tc.table_schema = ku.table_schema
                    AND tc.table_name = ku.table_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                    AND tc.table_schema = '{}'
                    AND tc.table_name = '{}'
            ) pk ON c.column_name = pk.column_name
            WHERE c.table_schema = '{}' AND c.table_name = '{}'
            ORDER BY c.ordinal_position"#,
            schema, table, schema, table
        )
    }

    fn list_unique_indexes_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("public"));
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                i.relname as index_name,
                a.attname as column_name,
                ix.indisprimary as is_primary
            FROM pg_class t
            JOIN pg_namespace n ON t.relnamespace = n.oid
            JOIN pg_index ix ON t.oid = ix.indrelid
            JOIN pg_class i ON ix.indexrelid = i.oid
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
            WHERE n.nspname = '{}' AND t.relname = '{}' AND ix.indisunique
            ORDER BY i.relname, array_position(ix.indkey, a.attnum)"#,
            schema, table
        )
    }

    fn insert_sql(&self, table: &TableMetadata, columns: &[&str]) -> String {
        let tbl = sea_table_ref(table.schema.as_deref(), &table.name);
        let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();
        let values: Vec<_> = (1..=columns.len())
            .map(|i| Expr::cust(format!("${}", i)))
            .collect();

        let mut stmt = Query::insert();
        stmt.into_table(tbl).columns(col_idens).values_panic(values);

        stmt.to_string(PostgresQueryBuilder)
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        columns: &[&str],
    ) -> String {
        let tbl = sea_table_ref(table.schema.as_deref(), &table.name);

        let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();
        let update_cols: Vec<_> = columns
            .iter()
            .filter(|c| !contains_ignore_case(key_columns, c))
            .map(|c| Alias::new(*c).into_iden())
            .collect();
        let key_idens: Vec<_> = key_columns
            .iter()
            .map(|c| Alias::new(*c).into_iden())
            .collect();

        let values: Vec<_> = (1..=columns.len())
            .map(|i| Expr::cust(format!("${}", i)))
            .collect();

        let mut on_conflict = OnConflict::columns(key_idens);
        if update_cols.is_empty() {
            on_conflict.do_nothing();
        } else {
            on_conflict.update_columns(update_cols);
        }

        let mut stmt = Query::insert();
        stmt.into_table(tbl)
            .columns(col_idens)
            .values_panic(values)
            .on_conflict(on_conflict.to_owned());

        stmt.to_string(PostgresQueryBuilder)
    }

    fn replace_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        columns: &[&str],
        full_columns: &[&str],
    ) -> String {
        let cols: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let values: Vec<_> = (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        let keys: Vec<_> = key_columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();

        let assignments: Vec<_> = full_columns
            .iter()
            .filter(|c| !contains_ignore_case(key_columns, c))
            .map(|c| {
                let quoted = self.quote_identifier(c);
                if contains_ignore_case(columns, c) {
                    format!("{} = EXCLUDED.{}", quoted, quoted)
                } else {
                    format!("{} = NULL", quoted)
                }
            })
            .collect();

        let action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            self.qualified_table(table),
            cols.join(", "),
            values.join(", "),
            keys.join(", "),
            action
        )
    }
}

// ===========================================================================
// MySQL: sea-query for insert / upsert, REPLACE INTO for replace
// ===========================================================================

/// MySQL dialect (also used for MariaDB)
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let db_filter = schema
            .map(|s| format!("table_schema = '{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "table_schema = DATABASE()".to_string());

        format!(
            r#"SELECT
                column_name,
                data_type,
                is_nullable = 'YES' as nullable,
                ordinal_position,
                CASE WHEN column_key = 'PRI' THEN ordinal_position END as pk_ordinal
            FROM information_schema.columns
            WHERE {} AND table_name = '{}'
            ORDER BY ordinal_position"#,
            db_filter,
            escape_string_literal(table)
        )
    }

    fn list_unique_indexes_sql(&self, schema: Option<&str>, table: &str) -> String {
        let db_filter = schema
            .map(|s| format!("table_schema = '{}'", escape_string_literal(s)))
            .unwrap_or_else(|| "table_schema = DATABASE()".to_string());

        format!(
            r#"SELECT
                index_name,
                column_name,
                index_name = 'PRIMARY' as is_primary
            FROM information_schema.statistics
            WHERE {} AND table_name = '{}' AND non_unique = 0
            ORDER BY index_name, seq_in_index"#,
            db_filter,
            escape_string_literal(table)
        )
    }

    fn insert_sql(&self, table: &TableMetadata, columns: &[&str]) -> String {
        let tbl = sea_table_ref(table.schema.as_deref(), &table.name);
        let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();
        let values: Vec<_> = columns.iter().map(|_| Expr::cust("?")).collect();

        let mut stmt = Query::insert();
        stmt.into_table(tbl).columns(col_idens).values_panic(values);

        stmt.to_string(MysqlQueryBuilder)
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        _key_columns: &[&str],
        columns: &[&str],
    ) -> String {
        let tbl = sea_table_ref(table.schema.as_deref(), &table.name);

        let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();
        let update_cols: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();

        let values: Vec<_> = columns.iter().map(|_| Expr::cust("?")).collect();

        let mut on_conflict = OnConflict::new();
        on_conflict.update_columns(update_cols);

        let mut stmt = Query::insert();
        stmt.into_table(tbl)
            .columns(col_idens)
            .values_panic(values)
            .on_conflict(on_conflict.to_owned());

        stmt.to_string(MysqlQueryBuilder)
    }

    fn replace_sql(
        &self,
        table: &TableMetadata,
        _key_columns: &[&str],
        columns: &[&str],
        _full_columns: &[&str],
    ) -> String {
        // REPLACE deletes the colliding row, so unwritten columns fall back to defaults
        let cols: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let values: Vec<_> = columns.iter().map(|_| "?").collect();
        format!(
            "REPLACE INTO {} ({}) VALUES ({})",
            self.qualified_table(table),
            cols.join(", "),
            values.join(", ")
        )
    }
}

// ===========================================================================
// SQL Server: manual SQL (no sea-query backend)
// ===========================================================================

/// SQL Server dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    /// MERGE keyed on `key_columns`; `assignments` is the UPDATE SET list
    fn merge_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        columns: &[&str],
        assignments: &[String],
    ) -> String {
        let cols: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let source_cols: Vec<_> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "{} as {}",
                    self.placeholder(i + 1),
                    self.quote_identifier(c)
                )
            })
            .collect();

        let join_conditions: Vec<_> = key_columns
            .iter()
            .map(|c| {
                format!(
                    "target.{} = source.{}",
                    self.quote_identifier(c),
                    self.quote_identifier(c)
                )
            })
            .collect();

        let insert_cols: Vec<_> = columns
            .iter()
            .map(|c| format!("source.{}", self.quote_identifier(c)))
            .collect();

        let matched = if assignments.is_empty() {
            String::new()
        } else {
            format!(" WHEN MATCHED THEN UPDATE SET {}", assignments.join(", "))
        };

        format!(
            "MERGE {} AS target USING (SELECT {}) AS source ON ({}){} WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            self.qualified_table(table),
            source_cols.join(", "),
            join_conditions.join(" AND "),
            matched,
            cols.join(", "),
            insert_cols.join(", ")
        )
    }
}

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@p{}", index)
    }

    fn list_columns_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("dbo"));
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                c.COLUMN_NAME as column_name,
                c.DATA_TYPE as data_type,
                CASE c.IS_NULLABLE WHEN 'YES' THEN 1 ELSE 0 END as nullable,
                c.ORDINAL_POSITION as ordinal_position,
                pk.ORDINAL_POSITION as pk_ordinal
            FROM INFORMATION_SCHEMA.COLUMNS c
            LEFT JOIN (
                SELECT ku.COLUMN_NAME, ku.ORDINAL_POSITION
                FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
                JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku
                    ON tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME
                WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                    AND tc.TABLE_SCHEMA = '{}'
                    AND tc.TABLE_NAME = '{}'
            ) pk ON c.COLUMN_NAME = pk.COLUMN_NAME
            WHERE c.TABLE_SCHEMA = '{}' AND c.TABLE_NAME = '{}'
            ORDER BY c.ORDINAL_POSITION"#,
            schema, table, schema, table
        )
    }

    fn list_unique_indexes_sql(&self, schema: Option<&str>, table: &str) -> String {
        let schema = escape_string_literal(schema.unwrap_or("dbo"));
        let table = escape_string_literal(table);
        format!(
            r#"SELECT
                i.name as index_name,
                c.name as column_name,
                i.is_primary_key as is_primary
            FROM sys.indexes i
            JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
            JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
            WHERE i.object_id = OBJECT_ID('{}.{}') AND i.is_unique = 1
            ORDER BY i.name, ic.key_ordinal"#,
            schema, table
        )
    }

    fn insert_sql(&self, table: &TableMetadata, columns: &[&str]) -> String {
        let cols: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let values: Vec<_> = (1..=columns.len()).map(|i| self.placeholder(i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_table(table),
            cols.join(", "),
            values.join(", ")
        )
    }

    fn upsert_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        columns: &[&str],
    ) -> String {
        let assignments: Vec<_> = columns
            .iter()
            .filter(|c| !contains_ignore_case(key_columns, c))
            .map(|c| {
                format!(
                    "target.{} = source.{}",
                    self.quote_identifier(c),
                    self.quote_identifier(c)
                )
            })
            .collect();
        self.merge_sql(table, key_columns, columns, &assignments)
    }

    fn replace_sql(
        &self,
        table: &TableMetadata,
        key_columns: &[&str],
        columns: &[&str],
        full_columns: &[&str],
    ) -> String {
        let assignments: Vec<_> = full_columns
            .iter()
            .filter(|c| !contains_ignore_case(key_columns, c))
            .map(|c| {
                let quoted = self.quote_identifier(c);
                if contains_ignore_case(columns, c) {
                    format!("target.{} = source.{}", quoted, quoted)
                } else {
                    format!("target.{} = NULL", quoted)
                }
            })
            .collect();
        self.merge_sql(table, key_columns, columns, &assignments)
    }
}

/// Get a dialect instance by database type name
pub fn dialect_for(name: &str) -> Box<dyn SqlDialect> {
    match name.to_lowercase().as_str() {
        "mysql" | "mariadb" => Box::new(MySqlDialect),
        "sqlserver" | "mssql" => Box::new(SqlServerDialect),
        _ => Box::new(PostgresDialect),
    }
}
