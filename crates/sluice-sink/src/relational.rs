//! Relational target adapter.
//!
//! Resolves the write columns, their declared types and the update key from
//! configuration or from the live catalog, prepares one statement per write
//! mode, and executes batches inside explicit transactions.
//!
//! | Mode      | PostgreSQL               | MySQL                     | SQL Server |
//! |-----------|--------------------------|---------------------------|------------|
//! | `insert`  | `INSERT`                 | `INSERT`                  | `INSERT`   |
//! | `stream`  | `INSERT`                 | `INSERT`                  | `INSERT`   |
//! | `upsert`  | `ON CONFLICT DO UPDATE`  | `ON DUPLICATE KEY UPDATE` | `MERGE`    |
//! | `replace` | `ON CONFLICT`, unwritten columns set to NULL | `REPLACE INTO` | `MERGE` |

use async_trait::async_trait;
use sluice_rdbc::connection::{Connection, ConnectionFactory, PreparedStatement, Transaction};
use sluice_rdbc::dialect::{dialect_for, SqlDialect};
use sluice_rdbc::types::{TableMetadata, Value};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::coerce::ColumnType;
use crate::config::{ColumnSpec, SinkConfig, WriteMode};
use crate::datetime::DateParser;
use crate::error::{Result, SinkError};
use crate::record::Record;
use crate::sink::{TargetAdapter, WriterContext};

/// A write column with its resolved type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundColumn {
    /// Column name as configured or discovered
    pub name: String,
    /// Declared type from the full column list
    pub type_name: String,
    /// Coercion class derived from `type_name`
    pub kind: ColumnType,
}

/// [`TargetAdapter`] for relational stores
pub struct RelationalTargetAdapter {
    config: SinkConfig,
    factory: Arc<dyn ConnectionFactory>,
    dates: DateParser,
    dialect: Box<dyn SqlDialect>,
    conn: Option<Arc<dyn Connection>>,
    statement: Option<Box<dyn PreparedStatement>>,
    txn: Option<Box<dyn Transaction>>,
    full_columns: Vec<ColumnSpec>,
    columns: Vec<BoundColumn>,
    update_key: Vec<String>,
    sql: String,
}

impl std::fmt::Debug for RelationalTargetAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalTargetAdapter")
            .field("table", &self.config.qualified_table())
            .field("dialect", &self.dialect.name())
            .field("columns", &self.columns)
            .field("update_key", &self.update_key)
            .field("sql", &self.sql)
            .field("in_transaction", &self.txn.is_some())
            .finish()
    }
}

fn find_column<'a>(columns: &'a [ColumnSpec], name: &str) -> Option<&'a ColumnSpec> {
    columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

impl RelationalTargetAdapter {
    /// Adapter connecting through `factory`
    pub fn new(config: SinkConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let dialect = match &config.dialect {
            Some(name) => dialect_for(name),
            None => factory.dialect(),
        };
        let dates = DateParser::new(config.date_format.clone());
        Self {
            config,
            factory,
            dates,
            dialect,
            conn: None,
            statement: None,
            txn: None,
            full_columns: Vec::new(),
            columns: Vec::new(),
            update_key: Vec::new(),
            sql: String::new(),
        }
    }

    /// Prepared write statement
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Resolved write columns
    pub fn columns(&self) -> &[BoundColumn] {
        &self.columns
    }

    /// Resolved full column list
    pub fn full_columns(&self) -> &[ColumnSpec] {
        &self.full_columns
    }

    /// Resolved update key; empty for insert and stream
    pub fn update_key(&self) -> &[String] {
        &self.update_key
    }

    /// Whether rows are waiting in an open transaction
    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    fn connection(&self) -> Result<&Arc<dyn Connection>> {
        self.conn
            .as_ref()
            .ok_or_else(|| SinkError::connection("adapter is not open"))
    }

    fn statement(&self) -> Result<&dyn PreparedStatement> {
        self.statement
            .as_deref()
            .ok_or_else(|| SinkError::connection("adapter is not open"))
    }

    fn table(&self) -> TableMetadata {
        TableMetadata::new(&self.config.table).with_schema(self.config.schema.clone())
    }

    /// Fill in full columns, write columns and update key
    async fn resolve_schema(&mut self, conn: Arc<dyn Connection>) -> Result<()> {
        let provider = self.factory.schema_provider(conn);
        let schema = self.config.schema.as_deref();
        let table = self.config.table.as_str();

        self.full_columns = if self.config.full_columns.is_empty() {
            let meta = provider
                .get_table(schema, table)
                .await?
                .ok_or_else(|| {
                    SinkError::schema(format!("table {} not found", self.config.qualified_table()))
                })?;
            debug!(table = %meta.qualified_name(), columns = meta.columns.len(), "Discovered table columns");
            meta.columns
                .iter()
                .map(|c| ColumnSpec::new(&c.name, &c.type_name))
                .collect()
        } else {
            self.config.full_columns.clone()
        };

        let write_columns = if self.config.columns.is_empty() {
            self.full_columns.clone()
        } else {
            self.config.columns.clone()
        };
        if write_columns.is_empty() {
            return Err(SinkError::schema(format!(
                "no columns to write for {}",
                self.config.qualified_table()
            )));
        }

        self.columns = write_columns
            .iter()
            .map(|c| {
                let full = find_column(&self.full_columns, &c.name).ok_or_else(|| {
                    SinkError::schema(format!(
                        "column '{}' not found in {}",
                        c.name,
                        self.config.qualified_table()
                    ))
                })?;
                Ok(BoundColumn {
                    name: c.name.clone(),
                    type_name: full.type_name.clone(),
                    kind: ColumnType::from_declared(&full.type_name),
                })
            })
            .collect::<Result<_>>()?;

        if self.config.write_mode.requires_key() {
            self.update_key = if self.config.update_key.is_empty() {
                let key = provider.candidate_key(schema, table).await?.ok_or_else(|| {
                    SinkError::schema(format!(
                        "{} mode needs an update key and {} has no primary key or unique index",
                        self.config.write_mode,
                        self.config.qualified_table()
                    ))
                })?;
                info!(table = %self.config.qualified_table(), key = ?key, "Resolved update key");
                key
            } else {
                self.config.update_key.clone()
            };
        }

        Ok(())
    }

    fn build_sql(&self) -> String {
        let table = self.table();
        let columns: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let keys: Vec<&str> = self.update_key.iter().map(String::as_str).collect();

        match self.config.write_mode {
            WriteMode::Insert | WriteMode::Stream => self.dialect.insert_sql(&table, &columns),
            WriteMode::Upsert => self.dialect.upsert_sql(&table, &keys, &columns),
            WriteMode::Replace => {
                let full: Vec<&str> = self.full_columns.iter().map(|c| c.name.as_str()).collect();
                self.dialect.replace_sql(&table, &keys, &columns, &full)
            }
        }
    }

    /// Statement parameters for a record, coerced to the column types
    pub fn bind(&self, record: &Record) -> Result<Vec<Value>> {
        self.columns
            .iter()
            .enumerate()
            .map(|(pos, column)| {
                let raw = record.get(&column.name).unwrap_or(&Value::Null);
                column
                    .kind
                    .coerce(raw, &self.dates)
                    .map_err(|e| SinkError::Record(e.at_column(pos)))
            })
            .collect()
    }

    async fn run_hooks(&self, label: &str, statements: &[String]) -> Result<()> {
        let conn = self.connection()?;
        for sql in statements.iter().filter(|s| !s.trim().is_empty()) {
            info!(hook = label, sql = %sql, "Running hook statement");
            conn.execute(sql, &[]).await?;
        }
        Ok(())
    }

    async fn execute_rows(&self, records: &[Record]) -> Result<()> {
        let statement = self.statement()?;
        for record in records {
            let params = self.bind(record)?;
            statement.execute(&params).await?;
        }
        Ok(())
    }

    async fn rollback_open(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(rollback_err) = txn.rollback().await {
                error!(error = %rollback_err, "Rollback failed after batch error");
            }
        }
    }
}

#[async_trait]
impl TargetAdapter for RelationalTargetAdapter {
    async fn open(&mut self, ctx: &WriterContext) -> Result<()> {
        let conn_config = self.config.connection_config();
        let conn: Arc<dyn Connection> = Arc::from(
            self.factory.connect(&conn_config).await.map_err(|e| {
                SinkError::connection(format!(
                    "failed to connect to {}: {}",
                    conn_config.redacted_url(),
                    e
                ))
            })?,
        );

        self.resolve_schema(Arc::clone(&conn)).await?;
        self.sql = self.build_sql();
        self.statement = Some(conn.prepare(&self.sql).await?);
        self.conn = Some(conn);

        info!(
            table = %self.config.qualified_table(),
            dialect = self.dialect.name(),
            partition = ctx.partition_index,
            columns = self.columns.len(),
            sql = %self.sql,
            "Prepared write statement"
        );
        Ok(())
    }

    async fn before_write(&mut self, ctx: &WriterContext) -> Result<()> {
        if ctx.is_first() {
            self.run_hooks("pre_sql", &self.config.pre_sql).await?;
        }
        Ok(())
    }

    async fn write_one(&mut self, record: &Record) -> Result<()> {
        let params = self.bind(record)?;
        let tx = self.connection()?.begin().await?;

        match self.statement()?.execute(&params).await {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed after record error");
                }
                Err(e.into())
            }
        }
    }

    async fn write_batch(&mut self, records: &[Record], keep_open: bool) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if self.txn.is_none() {
            self.txn = Some(self.connection()?.begin().await?);
            trace!("Transaction started");
        }

        if let Err(e) = self.execute_rows(records).await {
            self.rollback_open().await;
            return Err(e);
        }

        if !keep_open {
            self.commit().await?;
            trace!(records = records.len(), "Transaction committed");
        }
        Ok(())
    }

    fn restore_value(&self, record: &Record) -> Option<Value> {
        let column = self.config.restore.restore_column.as_deref()?;
        record.get(column).filter(|v| !v.is_null()).cloned()
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.rollback().await?;
        }
        Ok(())
    }

    async fn after_write(&mut self, ctx: &WriterContext) -> Result<()> {
        if ctx.is_first() {
            self.run_hooks("post_sql", &self.config.post_sql).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.txn.is_some() {
            warn!("Closing with an open transaction, rolling back");
            self.rollback_open().await;
        }
        self.statement = None;
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }
}
