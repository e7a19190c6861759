//! PostgreSQL backend implementation for sluice-rdbc
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection and prepared statements
//! - Explicit BEGIN/COMMIT/ROLLBACK transactions
//! - SQLSTATE based error classification
//! - Schema provider for introspection

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, PreparedStatement, Transaction,
};
use crate::dialect::PostgresDialect;
use crate::error::{Error, Result};
use crate::schema::{CatalogSchemaProvider, SchemaProvider};
use crate::types::{Row, Value};

type PgParam = Box<dyn tokio_postgres::types::ToSql + Sync + Send>;

/// Convert a Value to a tokio-postgres compatible parameter
fn value_to_sql(value: &Value) -> PgParam {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b),
        Value::Int8(n) => Box::new(i16::from(*n)), // PostgreSQL doesn't have int1
        Value::Int16(n) => Box::new(*n),
        Value::Int32(n) => Box::new(*n),
        Value::Int64(n) => Box::new(*n),
        Value::Float32(n) => Box::new(*n),
        Value::Float64(n) => Box::new(*n),
        Value::Decimal(d) => Box::new(*d),
        Value::String(s) => Box::new(s.clone()),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::Date(d) => Box::new(*d),
        Value::Time(t) => Box::new(*t),
        Value::DateTime(dt) => Box::new(*dt),
        Value::DateTimeTz(dt) => Box::new(*dt),
        Value::Uuid(u) => Box::new(*u),
        Value::Json(j) => Box::new(j.clone()),
    }
}

fn param_refs(boxed: &[PgParam]) -> Vec<&(dyn tokio_postgres::types::ToSql + Sync)> {
    boxed
        .iter()
        .map(|b| b.as_ref() as &(dyn tokio_postgres::types::ToSql + Sync))
        .collect()
}

/// Classify a driver error by its SQLSTATE, if the server sent one
fn map_pg_error(e: tokio_postgres::Error, sql: &str) -> Error {
    if e.is_closed() {
        return Error::connection_with_source("connection closed", e);
    }
    match e.code() {
        Some(state) => {
            let message = e
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| e.to_string());
            Error::from_sqlstate(state.code(), message, Some(sql))
        }
        None => Error::query_with_sql(e.to_string(), sql),
    }
}

fn map_tx_error(e: tokio_postgres::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns: Vec<String> = pg_row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    let values: Vec<Value> = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| pg_value_to_value(pg_row, i, col.type_()))
        .collect();

    Row::new(columns, values)
}

fn get_opt<'a, T>(row: &'a tokio_postgres::Row, idx: usize, wrap: impl FnOnce(T) -> Value) -> Value
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
        .ok()
        .flatten()
        .map(wrap)
        .unwrap_or(Value::Null)
}

/// Convert a PostgreSQL value to a Value
fn pg_value_to_value(
    row: &tokio_postgres::Row,
    idx: usize,
    pg_type: &tokio_postgres::types::Type,
) -> Value {
    use tokio_postgres::types::Type;

    match *pg_type {
        Type::BOOL => get_opt(row, idx, Value::Bool),
        Type::INT2 => get_opt(row, idx, Value::Int16),
        Type::INT4 => get_opt(row, idx, Value::Int32),
        Type::INT8 => get_opt(row, idx, Value::Int64),
        Type::FLOAT4 => get_opt(row, idx, Value::Float32),
        Type::FLOAT8 => get_opt(row, idx, Value::Float64),
        Type::NUMERIC => get_opt(row, idx, Value::Decimal),
        Type::BYTEA => get_opt(row, idx, Value::Bytes),
        Type::DATE => get_opt(row, idx, Value::Date),
        Type::TIME => get_opt(row, idx, Value::Time),
        Type::TIMESTAMP => get_opt(row, idx, Value::DateTime),
        Type::TIMESTAMPTZ => get_opt(row, idx, Value::DateTimeTz),
        Type::UUID => get_opt(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => get_opt(row, idx, Value::Json),
        // information_schema columns are typed as domains over these
        _ => get_opt(row, idx, Value::String),
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;

        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        let pg_rows = self
            .client
            .query(sql, &param_refs(&boxed))
            .await
            .map_err(|e| map_pg_error(e, sql))?;

        Ok(pg_rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;

        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        self.client
            .execute(sql, &param_refs(&boxed))
            .await
            .map_err(|e| map_pg_error(e, sql))
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.ensure_open()?;

        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| map_pg_error(e, sql))?;

        debug!(sql = %sql, "Prepared statement");

        Ok(Box::new(PgPreparedStatement {
            client: Arc::clone(&self.client),
            statement: stmt,
            sql: sql.to_string(),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;

        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(map_tx_error)?;

        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    client: Arc<tokio_postgres::Client>,
    statement: tokio_postgres::Statement,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let boxed: Vec<PgParam> = params.iter().map(value_to_sql).collect();
        self.client
            .execute(&self.statement, &param_refs(&boxed))
            .await
            .map_err(|e| map_pg_error(e, &self.sql))
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

/// PostgreSQL transaction
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(map_tx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Relaxed);
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(map_tx_error)
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Relaxed) {
            // The server keeps the transaction open until the next statement or disconnect
            warn!("PostgreSQL transaction dropped without commit or rollback");
        }
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::connection_with_source("invalid connection url", e))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }
        if config.query_timeout_ms > 0 {
            pg_config.options(&format!("-c statement_timeout={}", config.query_timeout_ms));
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!(url = %config.redacted_url(), "Connected to PostgreSQL");
        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn schema_provider(&self, conn: Arc<dyn Connection>) -> Box<dyn SchemaProvider> {
        Box::new(CatalogSchemaProvider::new(conn, Box::new(PostgresDialect)))
    }
}

/// Connect to PostgreSQL database
pub async fn connect(url: &str) -> Result<Box<dyn Connection>> {
    PgConnectionFactory
        .connect(&ConnectionConfig::new(url))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversion() {
        for value in [
            Value::Int32(42),
            Value::String("hello".into()),
            Value::Null,
            Value::Bool(true),
            Value::Json(serde_json::json!({"a": 1})),
        ] {
            let _ = value_to_sql(&value);
        }
    }

    #[test]
    fn test_pg_connection_factory_type() {
        let factory = PgConnectionFactory;
        assert_eq!(factory.database_type(), DatabaseType::PostgreSQL);
        assert_eq!(factory.dialect().name(), "PostgreSQL");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = PgConnectionFactory
            .connect(&ConnectionConfig::new("not a url at all ==="))
            .await
            .err()
            .map(|e| e.category());
        assert_eq!(err, Some(crate::error::ErrorCategory::Connection));
    }
}
