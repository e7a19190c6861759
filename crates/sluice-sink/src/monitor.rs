//! Task-state lookup against the engine's monitor REST API.
//!
//! The close path asks for the job state before committing an open restore
//! transaction: only a `RUNNING` job commits, anything else rolls back.
//! Only the entry whose `jid` equals the configured job id counts; without a
//! job id no lookup is made and the job is taken as `RUNNING`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{Result, SinkError};

/// State reported for a job that is still running
pub const RUNNING: &str = "RUNNING";

/// Source of the current job state
#[async_trait]
pub trait TaskStateProvider: Send + Sync {
    /// Current state name, e.g. `RUNNING`, `CANCELED`, `FAILED`
    async fn task_state(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct JobsOverview {
    #[serde(default)]
    jobs: Vec<JobSummary>,
}

#[derive(Debug, Deserialize)]
struct JobSummary {
    jid: String,
    state: String,
}

/// HTTP client for `GET {url}/jobs/overview`
#[derive(Debug, Clone)]
pub struct MonitorClient {
    config: MonitorConfig,
    client: reqwest::Client,
}

impl MonitorClient {
    /// Create a client from monitor settings
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SinkError::monitor(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn fetch_state(&self, url: &str, job_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}/jobs/overview", url))
            .send()
            .await
            .map_err(|e| SinkError::monitor(format!("jobs overview request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(SinkError::monitor(format!(
                "jobs overview returned {}",
                response.status()
            )));
        }
        let overview: JobsOverview = response
            .json()
            .await
            .map_err(|e| SinkError::monitor(format!("invalid jobs overview: {}", e)))?;

        Ok(overview
            .jobs
            .into_iter()
            .find(|j| j.jid == job_id)
            .map(|j| j.state))
    }
}

#[async_trait]
impl TaskStateProvider for MonitorClient {
    async fn task_state(&self) -> String {
        let (Some(url), Some(job_id)) = (self.config.url(), self.config.job_id.as_deref())
        else {
            debug!("No monitor URL or job id, assuming {}", RUNNING);
            return RUNNING.to_string();
        };

        let attempts = self.config.retries.max(1);
        let backoff = Duration::from_millis(self.config.backoff_ms);
        for attempt in 1..=attempts {
            match self.fetch_state(url, job_id).await {
                Ok(Some(state)) => {
                    debug!(state = %state, attempt, "Fetched task state");
                    return state;
                }
                Ok(None) => {
                    warn!(job_id, attempt, "Job not listed in overview");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Task state lookup failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        warn!(attempts, "Task state unknown, assuming {}", RUNNING);
        RUNNING.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_url_is_running() {
        let client = MonitorClient::new(MonitorConfig::default()).unwrap();
        assert_eq!(client.task_state().await, RUNNING);
    }

    #[tokio::test]
    async fn test_unreachable_is_running() {
        let client = MonitorClient::new(MonitorConfig {
            url: Some("http://127.0.0.1:1".into()),
            job_id: Some("a1".into()),
            retries: 2,
            backoff_ms: 1,
        })
        .unwrap();
        assert_eq!(client.task_state().await, RUNNING);
    }

    #[test]
    fn test_overview_shape() {
        let overview: JobsOverview = serde_json::from_str(
            r#"{"jobs":[{"jid":"a1","name":"etl","state":"CANCELED","duration":5}]}"#,
        )
        .unwrap();
        assert_eq!(overview.jobs[0].jid, "a1");
        assert_eq!(overview.jobs[0].state, "CANCELED");
    }
}
