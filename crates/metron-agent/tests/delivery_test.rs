//! End-to-end delivery: collector → reporter → sender → HTTP collector.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use flate2::read::GzDecoder;
use metron_agent::app::client_config;
use metron_agent::collector::MetricsCollector;
use metron_agent::reporter::MetricsReporter;
use metron_agent::sender::{self, MetricsService, UnlimitedSender};
use metron_agent::AgentConfig;
use metron_collector::MetricsProvider;
use metron_common::types::MetricSnapshot;
use metron_transport::signer::{Signer, SIGNATURE_HEADER};
use metron_transport::{ClientConfig, MetricsClient};
use serde_json::Value;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Captured {
    headers: HeaderMap,
    body: Vec<u8>,
}

type Log = Arc<Mutex<Vec<Captured>>>;

async fn capture(State(log): State<Log>, headers: HeaderMap, body: Bytes) -> StatusCode {
    log.lock().unwrap().push(Captured {
        headers,
        body: body.to_vec(),
    });
    StatusCode::OK
}

async fn start_collector() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/updates/", post(capture))
        .with_state(log.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), log)
}

fn decoded_body(request: &Captured) -> Vec<u8> {
    let gzipped = request
        .headers
        .get("content-encoding")
        .is_some_and(|v| v.as_bytes() == b"gzip");
    if !gzipped {
        return request.body.clone();
    }
    let mut out = Vec::new();
    GzDecoder::new(request.body.as_slice())
        .read_to_end(&mut out)
        .unwrap();
    out
}

fn poll_count_delta(batch: &Value) -> Option<i64> {
    batch
        .as_array()?
        .iter()
        .find(|m| m["id"] == "PollCount")
        .and_then(|m| m["delta"].as_i64())
}

struct StaticProvider(MetricSnapshot);

#[async_trait]
impl MetricsProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn collect(&self, _cancel: &CancellationToken) -> Result<MetricSnapshot> {
        Ok(self.0.clone())
    }
}

fn collector() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new(
        vec![Arc::new(StaticProvider(MetricSnapshot {
            alloc: 2048.0,
            cpu_utilization: vec![12.5, 30.0],
            ..Default::default()
        }))],
        Duration::from_secs(1),
        CancellationToken::new(),
    ))
}

#[tokio::test]
async fn one_report_posts_accumulated_poll_count() {
    let (url, log) = start_collector().await;
    let client = MetricsClient::new(&url, ClientConfig::default()).unwrap();
    let service = Arc::new(MetricsService::new(Arc::new(client)));
    let sender = Arc::new(UnlimitedSender::new(service, CancellationToken::new()));

    let collector = collector();
    let reporter = MetricsReporter::new(
        collector.clone(),
        sender,
        Duration::from_secs(1),
        CancellationToken::new(),
    );

    for _ in 0..3 {
        collector.poll_once().await;
    }
    reporter.report_once().await;
    reporter.stop().await;

    let requests = log.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers["content-encoding"], "gzip");
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());

    let batch: Value = serde_json::from_slice(&decoded_body(&requests[0])).unwrap();
    assert_eq!(poll_count_delta(&batch), Some(3));
    let alloc = batch
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == "Alloc")
        .unwrap();
    assert_eq!(alloc["type"], "gauge");
    assert_eq!(alloc["value"], 2048.0);
    assert!(batch
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["id"] == "CPUutilization2" && m["value"] == 30.0));

    drop(requests);
    assert_eq!(collector.get_metrics().await.1, 0);
}

#[tokio::test]
async fn pooled_sender_delivers_signed_batches_from_file_config() {
    let (url, log) = start_collector().await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
server_address = "{url}"
secret_key = "shared-secret"
rate_limit = 2
exclude_metrics = ["RandomValue", "Uptime"]
"#
    )
    .unwrap();
    let config = AgentConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    let client = MetricsClient::new(&config.server_address, client_config(&config)).unwrap();
    let service = Arc::new(
        MetricsService::new(Arc::new(client)).with_excluded(config.exclude_metrics.clone()),
    );
    let sender = sender::from_rate_limit(service, config.rate_limit, CancellationToken::new());

    let collector = collector();
    let reporter = MetricsReporter::new(
        collector.clone(),
        sender,
        Duration::from_secs(1),
        CancellationToken::new(),
    );

    collector.poll_once().await;
    reporter.report_once().await;
    for _ in 0..200 {
        if !log.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    reporter.stop().await;

    let requests = log.lock().unwrap();
    assert_eq!(requests.len(), 1);

    let body = decoded_body(&requests[0]);
    let signature = requests[0].headers[SIGNATURE_HEADER].to_str().unwrap();
    let signer = Signer::new("shared-secret").unwrap();
    assert!(signer.verify(&body, signature));

    let batch: Value = serde_json::from_slice(&body).unwrap();
    let ids: Vec<&str> = batch
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(!ids.contains(&"RandomValue"));
    assert!(!ids.contains(&"Uptime"));
    assert_eq!(poll_count_delta(&batch), Some(1));
}

#[tokio::test]
async fn unreachable_collector_still_resets_count_in_unlimited_mode() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = MetricsClient::new(
        &url,
        ClientConfig {
            max_retries: 0,
            ..Default::default()
        },
    )
    .unwrap();
    let sender = Arc::new(UnlimitedSender::new(
        Arc::new(MetricsService::new(Arc::new(client))),
        CancellationToken::new(),
    ));

    let collector = collector();
    let reporter = MetricsReporter::new(
        collector.clone(),
        sender,
        Duration::from_secs(1),
        CancellationToken::new(),
    );

    collector.poll_once().await;
    collector.poll_once().await;
    reporter.report_once().await;
    reporter.stop().await;

    // Scheduling counts as success, so the failed delivery's delta is gone.
    assert_eq!(collector.get_metrics().await.1, 0);
}
