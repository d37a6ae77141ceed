//! Span and metric exporter construction.
//!
//! # Architecture
//!
//! ```text
//! ExporterBootstrap::setup()
//!   │
//!   ├─ OTLP/HTTP span + metric exporters ──► ExporterHandle (Otlp)
//!   │        │ build failed
//!   │        ▼
//!   ├─ allow_fallback = true  ──► stdout exporters ──► ExporterHandle (Console)
//!   └─ allow_fallback = false ──► Err(TelemetryError::Config)
//! ```
//!
//! Export always happens off the call path: span processors and the periodic
//! metric reader run on their own background threads. The simple policy is a
//! batch processor that flushes every span on its own, so ending a span never
//! waits on the collector.

use std::collections::HashMap;
use std::time::Duration;

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use opentelemetry_sdk::Resource;
use tracing::{info, warn};

use crate::config::TelemetryConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::semconv;

/// How finished spans are handed to the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPolicy {
    /// Queue spans and export them in batches on a background thread.
    Batch,
    /// Export every span individually, right after it ends, still on the
    /// processor thread.
    Simple,
}

/// Flush interval of the simple policy's processor thread.
const SIMPLE_EXPORT_DELAY: Duration = Duration::from_millis(1);

/// Which exporter family ended up active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    Otlp,
    /// Local stdout exporter. Not for production.
    Console,
}

/// Builder for the exporter pipeline.
#[derive(Debug, Clone)]
pub struct ExporterBootstrap {
    endpoint: Option<String>,
    headers: HashMap<String, String>,
    policy: ExportPolicy,
    metrics_interval: Duration,
    metrics_enabled: bool,
    allow_fallback: bool,
    resource: Resource,
}

impl ExporterBootstrap {
    /// Start from an OTLP/HTTP base endpoint. `None` lets the exporter use
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` or its built-in default.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            headers: HashMap::new(),
            policy: ExportPolicy::Batch,
            metrics_interval: Duration::from_secs(60),
            metrics_enabled: true,
            allow_fallback: false,
            resource: Resource::builder().build(),
        }
    }

    /// Take every exporter setting from a [`TelemetryConfig`].
    pub fn from_config(config: &TelemetryConfig) -> Self {
        let policy = if config.disable_batch_export {
            ExportPolicy::Simple
        } else {
            ExportPolicy::Batch
        };
        Self::new(config.otlp_endpoint.clone())
            .with_headers(config.otlp_headers.clone())
            .with_export_policy(policy)
            .with_metrics_interval(config.metrics_export_interval)
            .with_metrics(!config.disable_metrics)
            .allow_fallback(config.allow_fallback_exporter)
            .with_resource(resource(config))
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_export_policy(mut self, policy: ExportPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// When disabled, the meter provider has no reader and exports nothing.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn allow_fallback(mut self, allowed: bool) -> Self {
        self.allow_fallback = allowed;
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    /// Build the exporters.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::Config`] when the OTLP exporter cannot be built and
    /// the fallback is not allowed.
    pub fn setup(self) -> TelemetryResult<ExporterHandle> {
        match self.build_otlp() {
            Ok(handle) => {
                info!(
                    endpoint = self.endpoint.as_deref().unwrap_or("<default>"),
                    policy = ?self.policy,
                    "OTLP exporters ready"
                );
                Ok(handle)
            }
            Err(err) if self.allow_fallback => {
                warn!(
                    error = %err,
                    "OTLP exporter unavailable, falling back to the console exporter. \
                     DO NOT USE IN PRODUCTION: spans may contain prompt and completion content"
                );
                Ok(self.build_console())
            }
            Err(err) => Err(err),
        }
    }

    fn build_otlp(&self) -> TelemetryResult<ExporterHandle> {
        let base = self.endpoint.as_deref().map(validate_endpoint).transpose()?;

        let mut spans = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_headers(self.headers.clone());
        if let Some(base) = &base {
            spans = spans.with_endpoint(format!("{base}/v1/traces"));
        }
        let span_exporter = spans.build().map_err(|e| {
            TelemetryError::Config(format!(
                "failed to build OTLP span exporter for {}: {e}. \
                 Set allow_fallback_exporter to use the console exporter instead",
                base.as_deref().unwrap_or("the default endpoint")
            ))
        })?;

        let meter_provider = if self.metrics_enabled {
            let mut metrics = opentelemetry_otlp::MetricExporter::builder()
                .with_http()
                .with_headers(self.headers.clone());
            if let Some(base) = &base {
                metrics = metrics.with_endpoint(format!("{base}/v1/metrics"));
            }
            let metric_exporter = metrics.build().map_err(|e| {
                TelemetryError::Config(format!("failed to build OTLP metric exporter: {e}"))
            })?;
            let reader = PeriodicReader::builder(metric_exporter)
                .with_interval(self.metrics_interval)
                .build();
            SdkMeterProvider::builder()
                .with_resource(self.resource.clone())
                .with_reader(reader)
                .build()
        } else {
            self.inert_meter_provider()
        };

        Ok(ExporterHandle {
            tracer_provider: self.tracer_provider(span_exporter),
            meter_provider,
            kind: ExporterKind::Otlp,
        })
    }

    fn build_console(&self) -> ExporterHandle {
        let meter_provider = if self.metrics_enabled {
            let reader = PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
                .with_interval(self.metrics_interval)
                .build();
            SdkMeterProvider::builder()
                .with_resource(self.resource.clone())
                .with_reader(reader)
                .build()
        } else {
            self.inert_meter_provider()
        };

        ExporterHandle {
            tracer_provider: self.tracer_provider(opentelemetry_stdout::SpanExporter::default()),
            meter_provider,
            kind: ExporterKind::Console,
        }
    }

    fn tracer_provider<E: SpanExporter + 'static>(&self, exporter: E) -> SdkTracerProvider {
        let batch_config = match self.policy {
            ExportPolicy::Batch => BatchConfigBuilder::default(),
            ExportPolicy::Simple => BatchConfigBuilder::default()
                .with_max_export_batch_size(1)
                .with_scheduled_delay(SIMPLE_EXPORT_DELAY),
        }
        .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        SdkTracerProvider::builder()
            .with_resource(self.resource.clone())
            .with_span_processor(processor)
            .build()
    }

    fn inert_meter_provider(&self) -> SdkMeterProvider {
        SdkMeterProvider::builder()
            .with_resource(self.resource.clone())
            .build()
    }
}

/// Resource describing the instrumented application.
pub fn resource(config: &TelemetryConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.application_name.clone())
        .with_attributes([
            KeyValue::new(semconv::DEPLOYMENT_ENVIRONMENT, config.environment.clone()),
            KeyValue::new(
                semconv::ATTRIBUTE_SET_VERSION_KEY,
                semconv::ATTRIBUTE_SET_VERSION,
            ),
        ])
        .build()
}

fn validate_endpoint(endpoint: &str) -> TelemetryResult<String> {
    let url = reqwest::Url::parse(endpoint.trim()).map_err(|e| {
        TelemetryError::Config(format!("invalid OTLP endpoint '{endpoint}': {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TelemetryError::Config(format!(
            "invalid OTLP endpoint '{endpoint}': scheme must be http or https"
        )));
    }
    Ok(endpoint.trim().trim_end_matches('/').to_string())
}

/// The tracer and meter providers produced by [`ExporterBootstrap::setup`].
#[derive(Debug, Clone)]
pub struct ExporterHandle {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    kind: ExporterKind,
}

impl ExporterHandle {
    pub fn kind(&self) -> ExporterKind {
        self.kind
    }

    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    pub fn tracer(&self) -> SdkTracer {
        self.tracer_provider.tracer(semconv::INSTRUMENTATION_SCOPE)
    }

    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(semconv::INSTRUMENTATION_SCOPE)
    }

    /// Flush and stop both providers.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        let traces = self.tracer_provider.shutdown();
        let metrics = self.meter_provider.shutdown();
        traces.map_err(|e| TelemetryError::Exporter(format!("tracer shutdown failed: {e}")))?;
        metrics.map_err(|e| TelemetryError::Exporter(format!("meter shutdown failed: {e}")))?;
        Ok(())
    }
}
