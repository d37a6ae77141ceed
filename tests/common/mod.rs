//! Shared in-memory telemetry harness for the e2e suites.
//!
//! Builds a [`Telemetry`] pipeline over in-memory exporters and registers a
//! `mock` instrumentation covering every operation family, so that
//! [`MockProvider`] calls produce spans named `mock.<operation>`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use genai_lens::{Instrumentation, OperationKind, Telemetry, TelemetryConfig};
use opentelemetry::{Context, Value};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    InMemorySpanExporter, SdkTracerProvider, Span, SpanData, SpanProcessor,
};

/// `mock-model` costs 1.0 per 1k prompt tokens and 2.0 per 1k completion tokens.
pub const PRICING: &str = r#"{
    "chat": {"mock-model": {"promptPrice": 1.0, "completionPrice": 2.0}},
    "embeddings": {"mock-model": 0.1}
}"#;

/// Counts span starts and ends, independently of the exporter.
#[derive(Debug, Clone, Default)]
pub struct SpanLifecycle {
    started: Arc<AtomicUsize>,
    ended: Arc<AtomicUsize>,
}

impl SpanLifecycle {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

impl SpanProcessor for SpanLifecycle {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_end(&self, _span: SpanData) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }
}

pub struct Harness {
    pub telemetry: Telemetry,
    pub lifecycle: SpanLifecycle,
    spans: InMemorySpanExporter,
    metrics: InMemoryMetricExporter,
    meter_provider: SdkMeterProvider,
}

pub fn mock_instrumentation() -> Instrumentation {
    Instrumentation::new("mock")
        .with_endpoint(OperationKind::Chat, "mock.chat")
        .with_endpoint(OperationKind::Embedding, "mock.embeddings")
        .with_endpoint(OperationKind::Image, "mock.images")
        .with_endpoint(OperationKind::Audio, "mock.audio")
        .with_endpoint(OperationKind::Retrieval, "mock.query")
}

pub fn config() -> TelemetryConfig {
    TelemetryConfig::new("e2e-app")
        .with_environment("test")
        .with_pricing_source(PRICING)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        let spans = InMemorySpanExporter::default();
        let lifecycle = SpanLifecycle::default();
        let tracer_provider = SdkTracerProvider::builder()
            .with_span_processor(lifecycle.clone())
            .with_simple_exporter(spans.clone())
            .build();

        let metrics = InMemoryMetricExporter::default();
        let meter_provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(metrics.clone()).build())
            .build();

        let mut telemetry = Telemetry::from_providers(config, tracer_provider, meter_provider.clone());
        telemetry.registry_mut().register(mock_instrumentation());

        Self {
            telemetry,
            lifecycle,
            spans,
            metrics,
            meter_provider,
        }
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().unwrap()
    }

    pub fn span(&self, name: &str) -> SpanData {
        self.spans()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no span named {name}"))
    }

    fn latest_metrics(&self) -> Option<ResourceMetrics> {
        self.meter_provider.force_flush().unwrap();
        self.metrics.get_finished_metrics().unwrap().pop()
    }

    /// Names of metrics that received at least one data point.
    pub fn metric_names(&self) -> Vec<String> {
        let Some(latest) = self.latest_metrics() else {
            return Vec::new();
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => sum.data_points().count() > 0,
                AggregatedMetrics::F64(MetricData::Histogram(h)) => h.data_points().count() > 0,
                AggregatedMetrics::U64(MetricData::Histogram(h)) => h.data_points().count() > 0,
                _ => false,
            })
            .map(|metric| metric.name().to_string())
            .collect()
    }

    /// Sum over all data points of a u64 counter.
    pub fn counter_total(&self, name: &str) -> u64 {
        let Some(latest) = self.latest_metrics() else {
            return 0;
        };
        latest
            .scope_metrics()
            .flat_map(|scope| scope.metrics())
            .filter(|metric| metric.name() == name)
            .map(|metric| match metric.data() {
                AggregatedMetrics::U64(MetricData::Sum(sum)) => {
                    sum.data_points().map(|p| p.value()).sum()
                }
                _ => 0,
            })
            .sum()
    }
}

pub fn attribute<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

pub fn f64_attribute(span: &SpanData, key: &str) -> f64 {
    match attribute(span, key) {
        Some(Value::F64(v)) => *v,
        other => panic!("{key} is not an f64: {other:?}"),
    }
}

pub fn bool_attribute(span: &SpanData, key: &str) -> Option<bool> {
    match attribute(span, key) {
        Some(Value::Bool(v)) => Some(*v),
        _ => None,
    }
}
