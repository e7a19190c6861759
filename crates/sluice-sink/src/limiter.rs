//! Error-budget admission gate.
//!
//! The limiter reads only the collector's aggregated view, so a violation is
//! observed on the first `acquire` after the collector has seen it. Once
//! tripped it stays tripped for the life of the writer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::ErrorBudget;
use crate::error::{Result, SinkError};
use crate::metrics::{MetricsCollector, NUM_ERRORS, NUM_WRITES};

/// Gate on error volume and error ratio
#[derive(Debug)]
pub struct ErrorLimiter {
    budget: ErrorBudget,
    collector: Arc<MetricsCollector>,
    tripped: AtomicBool,
    violation: Mutex<Option<String>>,
    last_error: Mutex<Option<String>>,
}

impl ErrorLimiter {
    /// Limiter over the given collector
    pub fn new(budget: ErrorBudget, collector: Arc<MetricsCollector>) -> Self {
        Self {
            budget,
            collector,
            tripped: AtomicBool::new(false),
            violation: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    /// Configured thresholds
    pub fn budget(&self) -> &ErrorBudget {
        &self.budget
    }

    /// Whether a violation has been observed
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Remember the most recent record diagnostic
    pub fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.lock() = Some(message.into());
    }

    /// Most recent record diagnostic
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Admit one more write, or fail with `ThresholdExceeded`
    pub fn acquire(&self) -> Result<()> {
        if !self.is_tripped() {
            let errors = self.collector.value(NUM_ERRORS);
            let writes = self.collector.value(NUM_WRITES);
            match self.check(errors, writes) {
                Some(violation) => {
                    error!(errors, writes, %violation, "Error budget exhausted");
                    *self.violation.lock() = Some(violation);
                    self.tripped.store(true, Ordering::Release);
                }
                None => return Ok(()),
            }
        }

        let violation = self.violation.lock().clone().unwrap_or_default();
        let message = match self.last_error() {
            Some(last) => format!("{}; last error: {}", violation, last),
            None => violation,
        };
        Err(SinkError::ThresholdExceeded { message })
    }

    fn check(&self, errors: u64, writes: u64) -> Option<String> {
        if let Some(max) = self.budget.max_errors {
            if errors > max {
                return Some(format!("{} errors exceed the limit of {}", errors, max));
            }
        }
        if let Some(max_ratio) = self.budget.max_error_ratio {
            if writes > 0 {
                let ratio = errors as f64 / writes as f64;
                if ratio > max_ratio {
                    return Some(format!(
                        "error ratio {:.4} ({}/{}) exceeds the limit of {}",
                        ratio, errors, writes, max_ratio
                    ));
                }
            }
        }
        None
    }

    /// Pull fresh aggregates from the collector
    pub async fn update_error_info(&self) {
        if let Err(e) = self.collector.refresh().await {
            warn!(error = %e, "Failed to refresh error counters");
        }
    }
}
