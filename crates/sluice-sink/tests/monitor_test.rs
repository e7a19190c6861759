//! Monitor REST client tests against a canned HTTP server

use sluice_sink::config::MonitorConfig;
use sluice_sink::metrics::{
    CounterSource, MetricsCollector, RestCounterSource, NUM_ERRORS, NUM_WRITES,
};
use sluice_sink::monitor::{MonitorClient, TaskStateProvider, RUNNING};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve `respond(path, hit)` for every request; returns the base URL and a hit counter
async fn serve<F>(respond: F) -> (String, Arc<AtomicUsize>)
where
    F: Fn(&str, usize) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let hit = counter.fetch_add(1, Ordering::SeqCst);

            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf[read..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => read += n,
                }
            }
            let request = String::from_utf8_lossy(&buf[..read]);
            let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

            let (status, body) = respond(&path, hit);
            let response = format!(
                "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{}", addr), hits)
}

fn monitor(url: &str, job_id: Option<&str>) -> MonitorClient {
    MonitorClient::new(MonitorConfig {
        url: Some(url.to_string()),
        job_id: job_id.map(str::to_string),
        retries: 3,
        backoff_ms: 5,
    })
    .unwrap()
}

const OVERVIEW: &str = r#"{"jobs":[
    {"jid":"a1","name":"backfill","state":"FINISHED"},
    {"jid":"b2","name":"orders-etl","state":"CANCELED"}
]}"#;

// ============================================================================
// Task state Tests
// ============================================================================

#[tokio::test]
async fn test_matches_job_id() {
    let (url, hits) = serve(|path, _| {
        assert_eq!(path, "/jobs/overview");
        (200, OVERVIEW.to_string())
    })
    .await;

    assert_eq!(monitor(&url, Some("b2")).task_state().await, "CANCELED");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_job_id_skips_lookup() {
    let (url, hits) = serve(|_, _| (200, OVERVIEW.to_string())).await;
    assert_eq!(monitor(&url, None).task_state().await, RUNNING);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_retries_after_server_error() {
    let (url, hits) = serve(|_, hit| {
        if hit == 0 {
            (500, "{}".to_string())
        } else {
            (200, r#"{"jobs":[{"jid":"x","state":"RUNNING"}]}"#.to_string())
        }
    })
    .await;

    assert_eq!(monitor(&url, Some("x")).task_state().await, RUNNING);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unlisted_job_assumes_running() {
    let (url, hits) = serve(|_, _| (200, OVERVIEW.to_string())).await;
    assert_eq!(monitor(&url, Some("zz")).task_state().await, RUNNING);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_malformed_body_assumes_running() {
    let (url, hits) = serve(|_, _| (200, "not json".to_string())).await;
    assert_eq!(monitor(&url, Some("a1")).task_state().await, RUNNING);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Accumulator Tests
// ============================================================================

#[tokio::test]
async fn test_rest_counter_source() {
    let (url, _) = serve(|path, _| {
        assert_eq!(path, "/jobs/b2/accumulators");
        (
            200,
            format!(
                r#"{{"job-accumulators":[],"user-task-accumulators":[
                    {{"name":"{}","type":"LongCounter","value":"120"}},
                    {{"name":"{}","type":"LongCounter","value":6}}
                ]}}"#,
                NUM_WRITES, NUM_ERRORS
            ),
        )
    })
    .await;

    let source = RestCounterSource::new(format!("{}/", url), "b2").unwrap();
    let values = source.collect().await.unwrap();
    assert_eq!(values[NUM_WRITES], 120);
    assert_eq!(values[NUM_ERRORS], 6);

    let collector = MetricsCollector::new(Arc::new(source));
    collector.refresh().await.unwrap();
    assert_eq!(collector.value(NUM_WRITES), 120);
    collector.close().await.unwrap();
}

#[tokio::test]
async fn test_rest_counter_source_error_status() {
    let (url, _) = serve(|_, _| (404, "{}".to_string())).await;
    let source = RestCounterSource::new(url, "missing").unwrap();
    assert!(source.collect().await.is_err());
}
