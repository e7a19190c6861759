//! Checkpoint-aware batched sink driver.
//!
//! [`BatchedRecordSink`] owns the buffer, counters, collector and limiter and
//! drives a [`TargetAdapter`] through the engine lifecycle:
//!
//! ```text
//! open -> write* -> [snapshot_state]* -> close
//! ```
//!
//! With restore disabled every flush commits on its own and a failed batch is
//! retried row by row so bad rows are isolated. With restore enabled rows
//! accumulate in one open transaction that is only committed by
//! `snapshot_state` (at an upstream transaction boundary, or when the open
//! transaction grows past `max_rows_per_transaction`) or by `close` while the
//! job is still running.

use async_trait::async_trait;
use sluice_rdbc::types::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{SinkConfig, WriteMode};
use crate::error::{RecordError, Result, SinkError};
use crate::limiter::ErrorLimiter;
use crate::metrics::{
    CounterSnapshot, CounterSource, JobAccumulators, MetricsCollector, WriteCounters,
};
use crate::monitor::{MonitorClient, TaskStateProvider, RUNNING};
use crate::record::Record;
use crate::restore::RestoreState;

/// Placement of a writer instance within the job
#[derive(Debug, Clone, Default)]
pub struct WriterContext {
    /// Index of this parallel instance
    pub partition_index: usize,
    /// Number of parallel instances
    pub partition_count: usize,
    /// Marker of the last committed transaction, when resuming
    pub resume_marker: Option<Value>,
}

impl WriterContext {
    /// Whether this instance runs job-wide hooks
    pub fn is_first(&self) -> bool {
        self.partition_index == 0
    }
}

/// I/O contract between the sink driver and a concrete target
#[async_trait]
pub trait TargetAdapter: Send {
    /// Connect, resolve the target schema and prepare statements
    async fn open(&mut self, ctx: &WriterContext) -> Result<()>;

    /// Runs once after `open`, before the first record
    async fn before_write(&mut self, _ctx: &WriterContext) -> Result<()> {
        Ok(())
    }

    /// Write one record in its own transaction
    async fn write_one(&mut self, record: &Record) -> Result<()>;

    /// Write records in one transaction.
    ///
    /// With `keep_open` the rows join the open transaction, which stays open
    /// for [`commit`](Self::commit). Any failure rolls the transaction back.
    async fn write_batch(&mut self, records: &[Record], keep_open: bool) -> Result<()>;

    /// Restore-column value of a record
    fn restore_value(&self, record: &Record) -> Option<Value>;

    /// Commit the open transaction, if any
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any
    async fn rollback(&mut self) -> Result<()>;

    /// Runs once after the last flush, before commit or rollback
    async fn after_write(&mut self, _ctx: &WriterContext) -> Result<()> {
        Ok(())
    }

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Progress of the open restore transaction
#[derive(Debug, Default)]
struct Progress {
    rows_in_txn: u64,
    flushed_any: bool,
    last_row_value: Option<Value>,
    prev_batch_last: Option<Value>,
    completed_marker: Option<Value>,
    ready: bool,
}

impl Progress {
    /// Fold in the restore values of a flushed batch
    fn observe(&mut self, values: impl IntoIterator<Item = Option<Value>>) {
        for value in values {
            if self.last_row_value.is_some() && value != self.last_row_value {
                self.completed_marker = self.last_row_value.clone();
            }
            self.last_row_value = value;
            self.rows_in_txn += 1;
        }

        if self.flushed_any && self.last_row_value != self.prev_batch_last {
            self.ready = true;
        }
        self.prev_batch_last = self.last_row_value.clone();
        self.flushed_any = true;
    }

    fn committed(&mut self) {
        self.rows_in_txn = 0;
        self.ready = false;
    }
}

/// Batched, checkpoint-aware sink over a target adapter
pub struct BatchedRecordSink<A: TargetAdapter> {
    config: SinkConfig,
    adapter: A,
    counters: Arc<WriteCounters>,
    source: Arc<dyn CounterSource>,
    task_state: Arc<dyn TaskStateProvider>,
    collector: Option<Arc<MetricsCollector>>,
    limiter: Option<ErrorLimiter>,
    ctx: WriterContext,
    buffer: Vec<Record>,
    batch_interval: usize,
    progress: Progress,
    opened_at: Option<Instant>,
    base_duration_ms: u64,
    flushes: u64,
    closed: bool,
}

impl<A: TargetAdapter> std::fmt::Debug for BatchedRecordSink<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedRecordSink")
            .field("table", &self.config.qualified_table())
            .field("write_mode", &self.config.write_mode)
            .field("batch_interval", &self.batch_interval)
            .field("buffered", &self.buffer.len())
            .field("counters", &self.counters.snapshot())
            .finish()
    }
}

impl<A: TargetAdapter> BatchedRecordSink<A> {
    /// Create a sink; the configuration is validated here
    pub fn new(config: SinkConfig, adapter: A) -> Result<Self> {
        config.validate_all()?;
        let task_state: Arc<dyn TaskStateProvider> =
            Arc::new(MonitorClient::new(config.monitor.clone())?);
        let batch_interval = config.effective_batch_interval();

        Ok(Self {
            config,
            adapter,
            counters: Arc::new(WriteCounters::default()),
            source: Arc::new(JobAccumulators::new()),
            task_state,
            collector: None,
            limiter: None,
            ctx: WriterContext::default(),
            buffer: Vec::with_capacity(batch_interval.max(1)),
            batch_interval,
            progress: Progress::default(),
            opened_at: None,
            base_duration_ms: 0,
            flushes: 0,
            closed: false,
        })
    }

    /// Aggregate counters through `source` instead of a private registry
    pub fn with_counter_source(mut self, source: Arc<dyn CounterSource>) -> Self {
        self.source = source;
        self
    }

    /// Use `provider` for the close-time job state lookup
    pub fn with_task_state(mut self, provider: Arc<dyn TaskStateProvider>) -> Self {
        self.task_state = provider;
        self
    }

    fn restore_enabled(&self) -> bool {
        self.config.restore.enabled
    }

    /// Open the writer, optionally resuming from a saved state
    pub async fn open(
        &mut self,
        partition_index: usize,
        partition_count: usize,
        restore: Option<RestoreState>,
    ) -> Result<()> {
        self.source
            .register(partition_index, Arc::clone(&self.counters));

        let collector = Arc::new(MetricsCollector::new(Arc::clone(&self.source)));
        collector.start(Duration::from_millis(self.config.metrics_refresh_ms));
        if self.config.error_budget.is_configured() {
            self.limiter = Some(ErrorLimiter::new(
                self.config.error_budget.clone(),
                Arc::clone(&collector),
            ));
        }
        self.collector = Some(collector);

        let mut resume_marker = None;
        match restore {
            Some(state) if self.restore_enabled() => {
                self.counters.apply_restored(&state.counters);
                self.base_duration_ms = state.counters.duration_ms;
                info!(
                    writer_id = state.writer_id,
                    marker = ?state.progress_marker,
                    snapshot_writes = state.counters.snapshot_writes,
                    "Resuming from restore state"
                );
                resume_marker = state.progress_marker;
            }
            Some(_) => {
                warn!("Restore state supplied but restore is disabled; ignoring it");
            }
            None => {}
        }

        self.ctx = WriterContext {
            partition_index,
            partition_count,
            resume_marker,
        };
        self.opened_at = Some(Instant::now());

        self.adapter.open(&self.ctx).await?;
        self.adapter.before_write(&self.ctx).await?;

        info!(
            table = %self.config.qualified_table(),
            write_mode = %self.config.write_mode,
            partition = partition_index,
            partitions = partition_count,
            batch_interval = self.batch_interval,
            restore = self.restore_enabled(),
            "Sink opened"
        );
        Ok(())
    }

    /// Accept one record
    pub async fn write(&mut self, record: Record) -> Result<()> {
        if self.opened_at.is_none() || self.closed {
            return Err(SinkError::config("sink is not open"));
        }
        if let Some(limiter) = &self.limiter {
            limiter.acquire()?;
        }

        let bytes = record.estimated_size();
        if self.batch_interval <= 1 && !self.restore_enabled() {
            // errors are the only thing that can raise the ratio
            if self.write_single(&record).await? {
                self.refresh_limiter().await;
            }
        } else {
            self.buffer.push(record);
            if self.buffer.len() >= self.batch_interval {
                self.flush().await?;
            }
        }

        self.update_duration();
        self.counters.add_bytes(bytes);
        Ok(())
    }

    /// Write one record; `Ok(true)` when it failed as a per-record error
    async fn write_single(&mut self, record: &Record) -> Result<bool> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire()?;
        }

        match self.adapter.write_one(record).await {
            Ok(()) => {
                if !self.restore_enabled() || self.config.write_mode == WriteMode::Stream {
                    self.counters.add_writes(1);
                    self.counters.add_snapshot_writes(1);
                }
                Ok(false)
            }
            Err(e) => {
                let Some(rec) = e.record_error() else {
                    return Err(e);
                };
                let diagnostic = diagnostic(&rec, record);
                self.counters.record_error(rec.kind);
                self.counters.add_writes(1);
                self.counters.add_snapshot_writes(1);
                if let Some(limiter) = &self.limiter {
                    limiter.set_last_error(diagnostic.clone());
                }
                error!(kind = %rec.kind, "{}", diagnostic);
                Ok(true)
            }
        }
    }

    /// Write out buffered records
    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let rows = std::mem::take(&mut self.buffer);
        let count = rows.len() as u64;
        let restore = self.restore_enabled();
        self.flushes += 1;

        match self.adapter.write_batch(&rows, restore).await {
            Ok(()) => {
                debug!(rows = count, restore, "Flushed batch");
                if restore {
                    let values: Vec<_> =
                        rows.iter().map(|r| self.adapter.restore_value(r)).collect();
                    self.progress.observe(values);
                    if self.config.write_mode == WriteMode::Stream {
                        self.counters.add_writes(count);
                    }
                } else {
                    self.counters.add_writes(count);
                    self.counters.add_snapshot_writes(count);
                }
            }
            Err(e) if restore => {
                error!(error = %e, rows = count, "Batch write failed inside restore transaction");
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, rows = count, "Batch write failed, retrying row by row");
                for record in &rows {
                    self.write_single(record).await?;
                }
            }
        }

        self.buffer = rows;
        self.buffer.clear();

        self.refresh_limiter().await;
        Ok(())
    }

    async fn refresh_limiter(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.update_error_info().await;
        }
    }

    /// Flush and, at a commit point, return the state to persist
    pub async fn snapshot_state(&mut self) -> Result<Option<RestoreState>> {
        self.flush().await?;

        if !self.restore_enabled() || !self.progress.flushed_any {
            return Ok(None);
        }

        let over_limit = self.progress.rows_in_txn > self.config.restore.max_rows_per_transaction;
        if !self.progress.ready && !over_limit {
            return Ok(None);
        }

        let marker = if self.progress.ready {
            self.progress.completed_marker.clone()
        } else {
            self.progress.last_row_value.clone()
        };

        let rows = self.progress.rows_in_txn;
        self.commit_open_transaction().await?;
        self.update_duration();

        info!(
            rows,
            marker = ?marker,
            forced = !self.progress.ready && over_limit,
            "Committed transaction at snapshot"
        );
        self.progress.committed();

        Ok(Some(RestoreState::new(
            self.ctx.partition_index,
            marker,
            self.counters.snapshot(),
        )))
    }

    async fn commit_open_transaction(&mut self) -> Result<()> {
        let rows = self.progress.rows_in_txn;
        if let Err(e) = self.adapter.commit().await {
            if let Err(rollback_err) = self.adapter.rollback().await {
                error!(error = %rollback_err, "Rollback failed after commit error");
            }
            return Err(SinkError::transaction(format!("commit failed: {}", e)));
        }
        if self.config.write_mode != WriteMode::Stream {
            self.counters.add_writes(rows);
        }
        self.counters.add_snapshot_writes(rows);
        Ok(())
    }

    /// Flush, settle the open transaction and release everything
    pub async fn close(&mut self) -> Result<()> {
        if self.closed || self.opened_at.is_none() {
            return Ok(());
        }
        self.closed = true;

        let mut outcome = self.flush().await;
        self.update_duration();

        if outcome.is_ok() {
            outcome = self.adapter.after_write(&self.ctx).await;
        }

        if self.restore_enabled() {
            let state = if outcome.is_ok() {
                self.task_state.task_state().await
            } else {
                String::new()
            };
            if state == RUNNING {
                let rows = self.progress.rows_in_txn;
                if let Err(e) = self.commit_open_transaction().await {
                    outcome = Err(e);
                } else {
                    info!(rows, "Committed open transaction at close");
                    self.progress.committed();
                }
            } else {
                warn!(
                    state = %state,
                    rows = self.progress.rows_in_txn,
                    "Job not running, rolling back open transaction"
                );
                if let Err(e) = self.adapter.rollback().await {
                    error!(error = %e, "Rollback failed at close");
                }
            }
        }

        if let Err(e) = self.adapter.close().await {
            warn!(error = %e, "Failed to release connection");
        }

        if let Some(limiter) = &self.limiter {
            limiter.update_error_info().await;
            if outcome.is_ok() {
                outcome = limiter.acquire();
            }
        }

        if let Some(collector) = &self.collector {
            if let Err(e) = collector.close().await {
                warn!(error = %e, "Final counter collection failed");
            }
        }

        let counters = self.counters.snapshot();
        info!(
            writes = counters.writes,
            errors = counters.errors,
            bytes = counters.bytes,
            duration_ms = counters.duration_ms,
            "Sink closed"
        );
        outcome
    }

    fn update_duration(&self) {
        if let Some(opened_at) = self.opened_at {
            let elapsed = u64::try_from(opened_at.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.counters
                .set_duration_ms(self.base_duration_ms.saturating_add(elapsed));
        }
    }

    /// Local counters of this instance
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Aggregating collector, once opened
    pub fn collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.collector.as_ref()
    }

    /// Error limiter, when a budget is configured
    pub fn limiter(&self) -> Option<&ErrorLimiter> {
        self.limiter.as_ref()
    }

    /// Marker the instance resumed from
    pub fn resume_marker(&self) -> Option<&Value> {
        self.ctx.resume_marker.as_ref()
    }

    /// Records waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes attempted so far
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// The target adapter
    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

/// Diagnostic logged for a failed record
pub fn diagnostic(err: &RecordError, record: &Record) -> String {
    match err.column {
        Some(pos) => format!(
            "writeRecord error: when converting field[{}] in {}: {}",
            pos, record, err.message
        ),
        None => format!("writeRecord error: in {}: {}", record, err.message),
    }
}
