//! Write counters and their job-wide aggregation.
//!
//! Every writer instance owns one [`WriteCounters`]. Instances register their
//! counters with a [`CounterSource`] under their writer id, so a restarted
//! writer replaces the counters of the instance it succeeds. A
//! [`MetricsCollector`] polls that source
//! in the background and keeps the last merged view, which is what the error
//! limiter reads. The aggregate therefore lags local activity until the next
//! refresh.
//!
//! Counters are also exported through the `metrics` facade under the
//! `sluice.sink.*` names.

use async_trait::async_trait;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ErrorKind, Result, SinkError};

/// Rows counted as written
pub const NUM_WRITES: &str = "num_writes";
/// Rows covered by committed snapshots
pub const SNAPSHOT_WRITES: &str = "snapshot_writes";
/// Estimated bytes written
pub const WRITE_BYTES: &str = "write_bytes";
/// Wall time since open, in milliseconds
pub const WRITE_DURATION_MS: &str = "write_duration_ms";
/// All record errors
pub const NUM_ERRORS: &str = "num_errors";
/// NOT NULL violations
pub const NUM_NULL_ERRORS: &str = "num_null_errors";
/// Unique key collisions
pub const NUM_DUPLICATE_ERRORS: &str = "num_duplicate_errors";
/// Conversion failures
pub const NUM_CONVERSION_ERRORS: &str = "num_conversion_errors";
/// Unclassified record errors
pub const NUM_OTHER_ERRORS: &str = "num_other_errors";

/// Every counter name, in reporting order
pub const ALL_COUNTERS: [&str; 9] = [
    NUM_WRITES,
    SNAPSHOT_WRITES,
    WRITE_BYTES,
    WRITE_DURATION_MS,
    NUM_ERRORS,
    NUM_NULL_ERRORS,
    NUM_DUPLICATE_ERRORS,
    NUM_CONVERSION_ERRORS,
    NUM_OTHER_ERRORS,
];

/// Plain copy of a writer's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct CounterSnapshot {
    pub writes: u64,
    pub snapshot_writes: u64,
    pub bytes: u64,
    pub duration_ms: u64,
    pub errors: u64,
    pub null_errors: u64,
    pub duplicate_errors: u64,
    pub conversion_errors: u64,
    pub other_errors: u64,
}

impl CounterSnapshot {
    /// Value by counter name; unknown names read as zero
    pub fn get(&self, name: &str) -> u64 {
        match name {
            NUM_WRITES => self.writes,
            SNAPSHOT_WRITES => self.snapshot_writes,
            WRITE_BYTES => self.bytes,
            WRITE_DURATION_MS => self.duration_ms,
            NUM_ERRORS => self.errors,
            NUM_NULL_ERRORS => self.null_errors,
            NUM_DUPLICATE_ERRORS => self.duplicate_errors,
            NUM_CONVERSION_ERRORS => self.conversion_errors,
            NUM_OTHER_ERRORS => self.other_errors,
            _ => 0,
        }
    }

    /// Errors of one kind
    pub fn errors_of(&self, kind: ErrorKind) -> u64 {
        self.get(kind.counter_name())
    }

    /// Named view of every counter
    pub fn to_map(&self) -> HashMap<String, u64> {
        ALL_COUNTERS
            .iter()
            .map(|name| ((*name).to_string(), self.get(name)))
            .collect()
    }
}

/// Live counters of one writer instance
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct WriteCounters {
    pub writes: AtomicU64,
    pub snapshot_writes: AtomicU64,
    pub bytes: AtomicU64,
    pub duration_ms: AtomicU64,
    pub errors: AtomicU64,
    pub null_errors: AtomicU64,
    pub duplicate_errors: AtomicU64,
    pub conversion_errors: AtomicU64,
    pub other_errors: AtomicU64,
}

impl WriteCounters {
    /// Count rows as written
    pub fn add_writes(&self, rows: u64) {
        self.writes.fetch_add(rows, Ordering::Relaxed);
        counter!("sluice.sink.writes").increment(rows);
    }

    /// Count rows covered by a committed snapshot
    pub fn add_snapshot_writes(&self, rows: u64) {
        self.snapshot_writes.fetch_add(rows, Ordering::Relaxed);
        counter!("sluice.sink.snapshot_writes").increment(rows);
    }

    /// Add to the byte estimate
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        counter!("sluice.sink.bytes").increment(bytes);
    }

    /// Overwrite the running duration
    pub fn set_duration_ms(&self, ms: u64) {
        self.duration_ms.store(ms, Ordering::Relaxed);
    }

    /// Count one record error, total and per kind
    pub fn record_error(&self, kind: ErrorKind) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.kind_counter(kind).fetch_add(1, Ordering::Relaxed);
        counter!("sluice.sink.errors", "kind" => kind.to_string()).increment(1);
    }

    fn kind_counter(&self, kind: ErrorKind) -> &AtomicU64 {
        match kind {
            ErrorKind::NullValue => &self.null_errors,
            ErrorKind::DuplicateKey => &self.duplicate_errors,
            ErrorKind::Conversion => &self.conversion_errors,
            ErrorKind::Other => &self.other_errors,
        }
    }

    /// Fold a restored snapshot into the live counters.
    ///
    /// Errors, bytes and duration are added; writes are seeded from the
    /// snapshot-write count, since rows written after the last commit were
    /// rolled back.
    pub fn apply_restored(&self, saved: &CounterSnapshot) {
        self.writes
            .fetch_add(saved.snapshot_writes, Ordering::Relaxed);
        self.snapshot_writes
            .fetch_add(saved.snapshot_writes, Ordering::Relaxed);
        self.bytes.fetch_add(saved.bytes, Ordering::Relaxed);
        self.duration_ms
            .fetch_add(saved.duration_ms, Ordering::Relaxed);
        self.errors.fetch_add(saved.errors, Ordering::Relaxed);
        for kind in ErrorKind::ALL {
            self.kind_counter(kind)
                .fetch_add(saved.errors_of(kind), Ordering::Relaxed);
        }
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            snapshot_writes: self.snapshot_writes.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            duration_ms: self.duration_ms.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            null_errors: self.null_errors.load(Ordering::Relaxed),
            duplicate_errors: self.duplicate_errors.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
            other_errors: self.other_errors.load(Ordering::Relaxed),
        }
    }
}

/// Where aggregated counters come from
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Register one writer's counters with the job, replacing any earlier
    /// registration under the same writer id
    fn register(&self, writer_id: usize, counters: Arc<WriteCounters>);

    /// Current job-wide totals by counter name
    async fn collect(&self) -> Result<HashMap<String, u64>>;
}

/// In-process registry summing every registered instance
#[derive(Debug, Clone, Default)]
pub struct JobAccumulators {
    instances: Arc<RwLock<HashMap<usize, Arc<WriteCounters>>>>,
}

impl JobAccumulators {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Sum of every registered instance
    pub fn totals(&self) -> CounterSnapshot {
        self.instances
            .read()
            .values()
            .map(|c| c.snapshot())
            .fold(CounterSnapshot::default(), |acc, s| CounterSnapshot {
                writes: acc.writes + s.writes,
                snapshot_writes: acc.snapshot_writes + s.snapshot_writes,
                bytes: acc.bytes + s.bytes,
                duration_ms: acc.duration_ms + s.duration_ms,
                errors: acc.errors + s.errors,
                null_errors: acc.null_errors + s.null_errors,
                duplicate_errors: acc.duplicate_errors + s.duplicate_errors,
                conversion_errors: acc.conversion_errors + s.conversion_errors,
                other_errors: acc.other_errors + s.other_errors,
            })
    }
}

#[async_trait]
impl CounterSource for JobAccumulators {
    fn register(&self, writer_id: usize, counters: Arc<WriteCounters>) {
        if self.instances.write().insert(writer_id, counters).is_some() {
            debug!(writer_id, "Replaced counters of a previous writer instance");
        }
    }

    async fn collect(&self) -> Result<HashMap<String, u64>> {
        Ok(self.totals().to_map())
    }
}

/// Reads user accumulators of a running job from the monitor REST API.
///
/// `GET {url}/jobs/{job_id}/accumulators`, answering
/// `{"user-task-accumulators":[{"name":"num_writes","value":"42"}]}`.
/// Registration is a no-op; the engine publishes the instance counters.
#[derive(Debug, Clone)]
pub struct RestCounterSource {
    url: String,
    job_id: String,
    client: reqwest::Client,
}

impl RestCounterSource {
    /// Create a source for one job
    pub fn new(url: impl Into<String>, job_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SinkError::monitor(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            job_id: job_id.into(),
            client,
        })
    }

    fn parse(body: &serde_json::Value) -> HashMap<String, u64> {
        let mut out = HashMap::new();
        let entries = body
            .get("user-task-accumulators")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for entry in entries {
            let Some(name) = entry.get("name").and_then(|n| n.as_str()) else {
                continue;
            };
            let value = match entry.get("value") {
                Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
                Some(v) => v.as_u64(),
                None => None,
            };
            if let Some(value) = value {
                *out.entry(name.to_string()).or_insert(0) += value;
            }
        }
        out
    }
}

#[async_trait]
impl CounterSource for RestCounterSource {
    fn register(&self, _writer_id: usize, _counters: Arc<WriteCounters>) {}

    async fn collect(&self) -> Result<HashMap<String, u64>> {
        let url = format!("{}/jobs/{}/accumulators", self.url, self.job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SinkError::monitor(format!("accumulator request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SinkError::monitor(format!(
                "accumulator request returned {}",
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SinkError::monitor(format!("invalid accumulator body: {}", e)))?;
        Ok(Self::parse(&body))
    }
}

/// Background aggregation of job-wide counters
pub struct MetricsCollector {
    source: Arc<dyn CounterSource>,
    latest: Arc<RwLock<HashMap<String, u64>>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("latest", &*self.latest.read())
            .field("running", &self.handle.lock().is_some())
            .finish()
    }
}

async fn collect_into(source: &dyn CounterSource, latest: &RwLock<HashMap<String, u64>>) -> Result<()> {
    let values = source.collect().await?;
    *latest.write() = values;
    Ok(())
}

impl MetricsCollector {
    /// Collector over a counter source; call [`start`](Self::start) to poll
    pub fn new(source: Arc<dyn CounterSource>) -> Self {
        Self {
            source,
            latest: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// The underlying source
    pub fn source(&self) -> &Arc<dyn CounterSource> {
        &self.source
    }

    /// Spawn the polling loop
    pub fn start(&self, interval: Duration) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let source = Arc::clone(&self.source);
        let latest = Arc::clone(&self.latest);
        let cancel = self.cancel.clone();
        let period = interval.max(Duration::from_millis(1));

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = collect_into(source.as_ref(), &latest).await {
                            warn!(error = %e, "Counter collection failed");
                        }
                    }
                }
            }
            debug!("Metrics collector stopped");
        }));
    }

    /// Last aggregated value; zero before the first collection
    pub fn value(&self, name: &str) -> u64 {
        self.latest.read().get(name).copied().unwrap_or(0)
    }

    /// Copy of the last aggregated view
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.latest.read().clone()
    }

    /// Collect now instead of waiting for the next tick
    pub async fn refresh(&self) -> Result<()> {
        collect_into(self.source.as_ref(), &self.latest).await
    }

    /// Stop polling and take one final collection
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Metrics collector task failed");
            }
        }
        self.refresh().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counters_by_kind() {
        let counters = WriteCounters::default();
        counters.record_error(ErrorKind::Conversion);
        counters.record_error(ErrorKind::Conversion);
        counters.record_error(ErrorKind::DuplicateKey);

        let snap = counters.snapshot();
        assert_eq!(snap.errors, 3);
        assert_eq!(snap.conversion_errors, 2);
        assert_eq!(snap.errors_of(ErrorKind::DuplicateKey), 1);
        assert_eq!(snap.get(NUM_NULL_ERRORS), 0);
    }

    #[test]
    fn test_apply_restored_seeds_writes() {
        let counters = WriteCounters::default();
        counters.add_bytes(10);
        counters.apply_restored(&CounterSnapshot {
            writes: 120,
            snapshot_writes: 100,
            bytes: 500,
            duration_ms: 2_000,
            errors: 2,
            null_errors: 2,
            ..Default::default()
        });

        let snap = counters.snapshot();
        assert_eq!(snap.writes, 100);
        assert_eq!(snap.snapshot_writes, 100);
        assert_eq!(snap.bytes, 510);
        assert_eq!(snap.duration_ms, 2_000);
        assert_eq!(snap.null_errors, 2);
    }

    #[tokio::test]
    async fn test_job_accumulators_sum_instances() {
        let job = JobAccumulators::new();
        let a = Arc::new(WriteCounters::default());
        let b = Arc::new(WriteCounters::default());
        job.register(0, Arc::clone(&a));
        job.register(1, Arc::clone(&b));

        a.add_writes(3);
        b.add_writes(4);
        b.record_error(ErrorKind::Other);

        let totals = job.collect().await.unwrap();
        assert_eq!(totals[NUM_WRITES], 7);
        assert_eq!(totals[NUM_ERRORS], 1);
        assert_eq!(totals[NUM_OTHER_ERRORS], 1);
        assert_eq!(job.instance_count(), 2);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_instance() {
        let job = JobAccumulators::new();
        let old = Arc::new(WriteCounters::default());
        old.add_writes(2);
        job.register(0, Arc::clone(&old));

        let restarted = Arc::new(WriteCounters::default());
        restarted.apply_restored(&old.snapshot());
        job.register(0, Arc::clone(&restarted));

        assert_eq!(job.instance_count(), 1);
        assert_eq!(job.collect().await.unwrap()[NUM_WRITES], 2);
    }

    #[tokio::test]
    async fn test_collector_lags_until_refresh() {
        let job = JobAccumulators::new();
        let counters = Arc::new(WriteCounters::default());
        job.register(0, Arc::clone(&counters));

        let collector = MetricsCollector::new(Arc::new(job));
        counters.add_writes(5);
        assert_eq!(collector.value(NUM_WRITES), 0);

        collector.refresh().await.unwrap();
        assert_eq!(collector.value(NUM_WRITES), 5);

        counters.add_writes(1);
        assert_eq!(collector.value(NUM_WRITES), 5);
        collector.close().await.unwrap();
        assert_eq!(collector.value(NUM_WRITES), 6);
    }

    #[tokio::test]
    async fn test_collector_background_loop() {
        let job = JobAccumulators::new();
        let counters = Arc::new(WriteCounters::default());
        job.register(0, Arc::clone(&counters));
        counters.add_writes(2);

        let collector = MetricsCollector::new(Arc::new(job));
        collector.start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(collector.value(NUM_WRITES), 2);
        collector.close().await.unwrap();
    }

    #[test]
    fn test_parse_rest_accumulators() {
        let body = serde_json::json!({
            "job-accumulators": [],
            "user-task-accumulators": [
                {"name": "num_writes", "type": "LongCounter", "value": "42"},
                {"name": "num_errors", "type": "LongCounter", "value": 3},
                {"name": "ignored", "type": "Histogram", "value": "n/a"}
            ]
        });
        let parsed = RestCounterSource::parse(&body);
        assert_eq!(parsed[NUM_WRITES], 42);
        assert_eq!(parsed[NUM_ERRORS], 3);
        assert!(!parsed.contains_key("ignored"));
    }
}
