//! # sluice-sink
//!
//! Checkpoint-aware batched record sink for streaming ETL jobs.
//!
//! The sink receives records one at a time from the host engine, buffers
//! them, and delivers them to a relational table while cooperating with the
//! engine's checkpoints so a restarted job resumes from the last committed
//! upstream transaction.
//!
//! ## Features
//!
//! - **Batching**: configurable batch interval, row-by-row fallback isolating bad rows
//! - **Restore**: one open transaction per checkpoint, progress marker on a restore column
//! - **Error Budget**: absolute and ratio thresholds over job-wide counters
//! - **Write Modes**: insert, upsert, replace and stream for PostgreSQL, MySQL and SQL Server
//! - **Coercion**: per-column conversion driven by the declared SQL type
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sluice_rdbc::prelude::PgConnectionFactory;
//! use sluice_sink::prelude::*;
//!
//! let config = SinkConfig::from_yaml(include_str!("sink.yaml"))?;
//! let adapter = RelationalTargetAdapter::new(config.clone(), Arc::new(PgConnectionFactory));
//! let mut sink = BatchedRecordSink::new(config, adapter)?;
//!
//! sink.open(0, 1, None).await?;
//! sink.write(Record::new().with("id", 1_i64).with("status", "new")).await?;
//! if let Some(state) = sink.snapshot_state().await? {
//!     persist(state.to_json()?);
//! }
//! sink.close().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod coerce;
pub mod config;
pub mod datetime;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod monitor;
pub mod record;
pub mod relational;
pub mod restore;
pub mod sink;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ColumnSpec, ErrorBudget, MonitorConfig, RestoreConfig, SinkConfig, WriteMode};
    pub use crate::error::{ErrorKind, RecordError, Result, SinkError};
    pub use crate::limiter::ErrorLimiter;
    pub use crate::metrics::{
        CounterSnapshot, CounterSource, JobAccumulators, MetricsCollector, RestCounterSource,
        WriteCounters,
    };
    pub use crate::monitor::{MonitorClient, TaskStateProvider};
    pub use crate::record::Record;
    pub use crate::relational::RelationalTargetAdapter;
    pub use crate::restore::RestoreState;
    pub use crate::sink::{BatchedRecordSink, TargetAdapter, WriterContext};
    pub use crate::types::SensitiveString;
    pub use sluice_rdbc::types::Value;
}

pub use error::{Result, SinkError};
pub use types::SensitiveString;
