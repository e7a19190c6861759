//! In-memory relational backend for tests and local runs.
//!
//! [`MemoryBackend`] is a connection factory, connection and schema provider
//! over one shared state. It records every transaction boundary and
//! statement execution, and fails rows that contain an injected value.
//!
//! ```rust
//! use sluice_rdbc::types::{ColumnMetadata, TableMetadata};
//! use sluice_sink::testing::{Failure, MemoryBackend};
//!
//! let mut table = TableMetadata::new("orders");
//! table.columns.push(ColumnMetadata::new("id", "bigint"));
//!
//! let backend = MemoryBackend::new().with_table(table);
//! backend.fail_on("poison", Failure::Conversion);
//! assert_eq!(backend.commits(), 0);
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use sluice_rdbc::connection::{
    Connection, ConnectionConfig, ConnectionFactory, DatabaseType, PreparedStatement, Transaction,
};
use sluice_rdbc::error::{ConstraintKind, Error, Result};
use sluice_rdbc::schema::{IndexMetadata, SchemaProvider};
use sluice_rdbc::types::{Row, TableMetadata, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::monitor::TaskStateProvider;

/// Error raised for rows carrying an injected value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// NOT NULL violation
    NotNull,
    /// Unique key collision
    Unique,
    /// Driver-side conversion failure
    Conversion,
    /// Untyped driver error with this message
    Query(String),
    /// The connection dropped
    ConnectionLost,
}

impl Failure {
    fn to_error(&self) -> Error {
        match self {
            Self::NotNull => Error::constraint(
                ConstraintKind::NotNull,
                "null value violates not-null constraint",
            ),
            Self::Unique => Error::constraint(
                ConstraintKind::Unique,
                "duplicate key value violates unique constraint",
            ),
            Self::Conversion => Error::type_conversion("invalid input syntax"),
            Self::Query(message) => Error::query(message.clone()),
            Self::ConnectionLost => Error::connection("connection closed"),
        }
    }
}

/// Everything the backend has seen
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Known tables by lower-case name
    pub tables: HashMap<String, TableMetadata>,
    /// Indexes by lower-case table name
    pub indexes: HashMap<String, Vec<IndexMetadata>>,
    /// Rows made durable by a commit
    pub committed: Vec<Vec<Value>>,
    /// Rows of the open transaction
    pub pending: Vec<Vec<Value>>,
    /// Parameters of every statement execution, failed ones included
    pub executed: Vec<Vec<Value>>,
    /// SQL passed to `prepare`
    pub prepared: Vec<String>,
    /// Ad-hoc SQL passed to `execute`
    pub statements: Vec<String>,
    /// Whether a transaction is open
    pub in_transaction: bool,
    /// Transactions started
    pub begins: u64,
    /// Transactions committed
    pub commits: u64,
    /// Transactions rolled back
    pub rollbacks: u64,
    /// Connections handed out
    pub connections: u64,
    /// Connections closed
    pub closed: u64,
    failures: Vec<(Value, Failure)>,
    fail_commits: bool,
    refuse_connections: bool,
}

impl MemoryState {
    fn failure_for(&self, params: &[Value]) -> Option<Error> {
        self.failures.iter().find_map(|(value, failure)| {
            params
                .iter()
                .any(|p| !p.is_null() && p.to_string() == value.to_string())
                .then(|| failure.to_error())
        })
    }
}

/// Shared in-memory backend
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table
    pub fn with_table(self, table: TableMetadata) -> Self {
        self.state
            .lock()
            .tables
            .insert(table.name.to_lowercase(), table);
        self
    }

    /// Register an index
    pub fn with_index(self, index: IndexMetadata) -> Self {
        self.state
            .lock()
            .indexes
            .entry(index.table.to_lowercase())
            .or_default()
            .push(index);
        self
    }

    /// Fail every row with a parameter equal to `value`
    pub fn fail_on(&self, value: impl Into<Value>, failure: Failure) {
        self.state.lock().failures.push((value.into(), failure));
    }

    /// Make commits fail
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().fail_commits = fail;
    }

    /// Make `connect` fail
    pub fn refuse_connections(&self) {
        self.state.lock().refuse_connections = true;
    }

    /// Lock the shared state
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock()
    }

    /// Committed rows
    pub fn committed_rows(&self) -> Vec<Vec<Value>> {
        self.state.lock().committed.clone()
    }

    /// Transactions committed
    pub fn commits(&self) -> u64 {
        self.state.lock().commits
    }

    /// Transactions rolled back
    pub fn rollbacks(&self) -> u64 {
        self.state.lock().rollbacks
    }

    /// Statement executions attempted
    pub fn executions(&self) -> usize {
        self.state.lock().executed.len()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryBackend {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(Error::connection("connection refused"));
        }
        state.connections += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn schema_provider(&self, _conn: Arc<dyn Connection>) -> Box<dyn SchemaProvider> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl SchemaProvider for MemoryBackend {
    async fn get_table(&self, _schema: Option<&str>, table: &str) -> Result<Option<TableMetadata>> {
        Ok(self.state.lock().tables.get(&table.to_lowercase()).cloned())
    }

    async fn list_indexes(&self, _schema: Option<&str>, table: &str) -> Result<Vec<IndexMetadata>> {
        Ok(self
            .state
            .lock()
            .indexes
            .get(&table.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Row>> {
        self.state.lock().statements.push(sql.to_string());
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<u64> {
        self.state.lock().statements.push(sql.to_string());
        Ok(0)
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.state.lock().prepared.push(sql.to_string());
        Ok(Box::new(MemoryStatement {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut state = self.state.lock();
        if state.in_transaction {
            return Err(Error::transaction("transaction already open"));
        }
        state.in_transaction = true;
        state.begins += 1;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn is_valid(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

struct MemoryStatement {
    sql: String,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl PreparedStatement for MemoryStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let mut state = self.state.lock();
        state.executed.push(params.to_vec());
        if let Some(err) = state.failure_for(params) {
            return Err(err);
        }
        if state.in_transaction {
            state.pending.push(params.to_vec());
        } else {
            state.committed.push(params.to_vec());
        }
        Ok(1)
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        state.in_transaction = false;
        if state.fail_commits {
            state.pending.clear();
            return Err(Error::transaction("commit failed"));
        }
        let rows = std::mem::take(&mut state.pending);
        state.committed.extend(rows);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        state.in_transaction = false;
        state.pending.clear();
        state.rollbacks += 1;
        Ok(())
    }
}

/// Task-state provider answering a fixed state
#[derive(Debug, Clone)]
pub struct FixedTaskState(pub String);

impl FixedTaskState {
    /// Provider reporting `state`
    pub fn new(state: impl Into<String>) -> Self {
        Self(state.into())
    }
}

#[async_trait]
impl TaskStateProvider for FixedTaskState {
    async fn task_state(&self) -> String {
        self.0.clone()
    }
}
