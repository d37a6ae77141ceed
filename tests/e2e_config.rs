//! End-to-end tests for environment-driven configuration.
//!
//! These tests mutate process environment variables, so every test is
//! `#[serial]`.
//!
//! # Running
//!
//! ```bash
//! cargo test --test e2e_config
//! ```

mod common;

use std::time::Duration;

use genai_lens::{PricingSource, Telemetry, TelemetryConfig, TelemetryError};
use serial_test::serial;

const VARS: &[&str] = &[
    "GENAI_LENS_ENVIRONMENT",
    "OTEL_DEPLOYMENT_ENVIRONMENT",
    "GENAI_LENS_APPLICATION_NAME",
    "OTEL_SERVICE_NAME",
    "OTEL_EXPORTER_OTLP_ENDPOINT",
    "GENAI_LENS_DISABLE_BATCH",
    "GENAI_LENS_PRICING_REFRESH_SECS",
    "OTEL_EXPORTER_OTLP_HEADERS",
    "GENAI_LENS_DISABLE_METRICS",
    "GENAI_LENS_CAPTURE_CONTENT",
    "GENAI_LENS_PRICING_JSON",
    "GENAI_LENS_METRICS_INTERVAL_MS",
    "GENAI_LENS_DISABLED_INSTRUMENTORS",
    "GENAI_LENS_ALLOW_FALLBACK_EXPORTER",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_reads_all_settings() {
    clear_env();
    std::env::set_var("GENAI_LENS_ENVIRONMENT", "staging");
    std::env::set_var("GENAI_LENS_APPLICATION_NAME", "checkout");
    std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318");
    std::env::set_var("OTEL_EXPORTER_OTLP_HEADERS", "x-api-key=secret");
    std::env::set_var("GENAI_LENS_DISABLE_METRICS", "true");
    std::env::set_var("GENAI_LENS_CAPTURE_CONTENT", "1");
    std::env::set_var("GENAI_LENS_PRICING_JSON", "https://example.com/pricing.json");
    std::env::set_var("GENAI_LENS_METRICS_INTERVAL_MS", "5000");
    std::env::set_var("GENAI_LENS_DISABLED_INSTRUMENTORS", "anthropic, cohere");

    let config = TelemetryConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.environment, "staging");
    assert_eq!(config.application_name, "checkout");
    assert_eq!(config.otlp_endpoint.as_deref(), Some("http://collector:4318"));
    assert_eq!(
        config.otlp_headers.get("x-api-key").map(String::as_str),
        Some("secret")
    );
    assert!(config.disable_metrics);
    assert!(config.trace_content_capture);
    assert!(matches!(config.pricing_source, PricingSource::Url(_)));
    assert_eq!(config.metrics_export_interval, Duration::from_secs(5));
    assert_eq!(config.disabled_providers, vec!["anthropic", "cohere"]);
}

#[test]
#[serial]
fn test_from_env_rejects_bad_interval() {
    clear_env();
    std::env::set_var("GENAI_LENS_METRICS_INTERVAL_MS", "soon");

    let result = TelemetryConfig::from_env();
    clear_env();

    assert!(matches!(result, Err(TelemetryError::Config(_))));
}

#[test]
#[serial]
fn test_env_disabled_provider_reaches_registry() {
    clear_env();
    std::env::set_var("GENAI_LENS_DISABLED_INSTRUMENTORS", "mock");
    let config = TelemetryConfig::from_env().unwrap().with_pricing_source(common::PRICING);
    clear_env();

    let harness = common::Harness::with_config(config);
    assert!(!harness.telemetry.registry().is_enabled("mock"));
    assert!(harness.telemetry.registry().is_enabled("openai"));
}

#[test]
#[serial]
fn test_bad_endpoint_fails_setup_loudly() {
    clear_env();
    std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "collector without scheme");
    let config = TelemetryConfig::from_env().unwrap();
    clear_env();

    assert!(matches!(
        Telemetry::init(config),
        Err(TelemetryError::Config(_))
    ));
}
