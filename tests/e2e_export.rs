//! End-to-end tests for the OTLP export path.
//!
//! # Running
//!
//! ```bash
//! cargo test --test e2e_export
//! ```
//!
//! # Test coverage
//!
//! - With batching disabled, an intercepted call against a collector that
//!   never answers still returns its value promptly on a tokio worker

mod common;

use std::net::TcpListener;
use std::time::{Duration, Instant};

use genai_lens::{ExporterKind, LLMProvider, MockProvider, Telemetry, TelemetryConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unbatched_export_stays_off_the_call_path() {
    // Accepts connections at the kernel level but never reads or replies.
    let collector = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", collector.local_addr().unwrap());

    let config = TelemetryConfig::new("export-test")
        .with_otlp_endpoint(endpoint)
        .with_batch_export_disabled(true)
        .with_metrics_disabled(true);
    let telemetry = Telemetry::init_with(config, vec![common::mock_instrumentation()]).unwrap();
    assert_eq!(telemetry.exporter_kind(), Some(ExporterKind::Otlp));

    let mock = MockProvider::new().with_usage(10, 5);
    mock.add_response("exported elsewhere").await;
    let client = telemetry.registry().attach("mock", mock);

    let started = Instant::now();
    let response = tokio::spawn(async move { client.complete("hi").await })
        .await
        .expect("call task must not panic")
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.content(), "exported elsewhere");
    assert_eq!(response.prompt_tokens, 10);
    assert!(
        elapsed < Duration::from_secs(1),
        "call waited on the collector: {elapsed:?}"
    );
    drop(collector);
}
