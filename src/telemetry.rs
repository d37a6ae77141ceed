//! Pipeline entry point and logging setup.
//!
//! ```text
//! TelemetryConfig
//!   │
//!   ▼
//! ExporterBootstrap ──► tracer / meter providers (installed as globals)
//!   │
//!   ├─► MetricsRegistry
//!   ├─► PricingProvider (background prefetch)
//!   └─► InstrumentationRegistry ──► attach() / instrument_registry()
//! ```
//!
//! # Example
//!
//! ```ignore
//! genai_lens::init_logging(LogFormat::Pretty)?;
//! let telemetry = Telemetry::init(TelemetryConfig::from_env()?)?;
//! let client = telemetry.registry().attach("openai", my_openai_client);
//! // ...
//! telemetry.shutdown()?;
//! ```

use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;
use crate::context::TelemetryContext;
use crate::error::{TelemetryError, TelemetryResult};
use crate::exporter::{ExporterBootstrap, ExporterKind};
use crate::instrumentation::{Instrumentation, InstrumentationRegistry};
use crate::metrics::MetricsRegistry;
use crate::semconv;

/// A configured telemetry pipeline.
#[derive(Debug)]
pub struct Telemetry {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    exporter_kind: Option<ExporterKind>,
    registry: InstrumentationRegistry,
}

impl Telemetry {
    /// Build exporters from `config`, install them as the OpenTelemetry
    /// globals and set up the built-in instrumentations.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::Config`] when the OTLP exporter cannot be built and
    /// the console fallback is not allowed.
    pub fn init(config: TelemetryConfig) -> TelemetryResult<Self> {
        Self::init_with(config, Vec::new())
    }

    /// Like [`Telemetry::init`], with additional instrumentations.
    pub fn init_with(config: TelemetryConfig, custom: Vec<Instrumentation>) -> TelemetryResult<Self> {
        let handle = ExporterBootstrap::from_config(&config).setup()?;

        opentelemetry::global::set_tracer_provider(handle.tracer_provider().clone());
        opentelemetry::global::set_meter_provider(handle.meter_provider().clone());

        let mut telemetry = Self::compose(
            config,
            handle.tracer_provider().clone(),
            handle.meter_provider().clone(),
            custom,
        );
        telemetry.exporter_kind = Some(handle.kind());
        Ok(telemetry)
    }

    /// Compose the pipeline over caller-supplied SDK providers. Globals are
    /// left untouched.
    pub fn from_providers(
        config: TelemetryConfig,
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
    ) -> Self {
        Self::compose(config, tracer_provider, meter_provider, Vec::new())
    }

    fn compose(
        config: TelemetryConfig,
        tracer_provider: SdkTracerProvider,
        meter_provider: SdkMeterProvider,
        custom: Vec<Instrumentation>,
    ) -> Self {
        let tracer = tracer_provider.tracer(semconv::INSTRUMENTATION_SCOPE);
        let metrics = MetricsRegistry::new(&meter_provider.meter(semconv::INSTRUMENTATION_SCOPE));
        let disabled = config.disabled_providers.clone();
        let context = TelemetryContext::from_config(config, tracer, metrics);

        if context.pricing().source().is_remote() {
            context.pricing().spawn_refresh();
        }

        let config = context.config();
        info!(
            application = %config.application_name,
            environment = %config.environment,
            metrics = !config.disable_metrics,
            content_capture = config.trace_content_capture,
            "GenAI telemetry initialized"
        );

        Self {
            tracer_provider,
            meter_provider,
            exporter_kind: None,
            registry: InstrumentationRegistry::setup(context, &disabled, custom),
        }
    }

    pub fn registry(&self) -> &InstrumentationRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut InstrumentationRegistry {
        &mut self.registry
    }

    pub fn context(&self) -> &TelemetryContext {
        self.registry.context()
    }

    /// `None` when the providers were supplied by the caller.
    pub fn exporter_kind(&self) -> Option<ExporterKind> {
        self.exporter_kind
    }

    /// Export everything buffered so far.
    pub fn force_flush(&self) -> TelemetryResult<()> {
        self.tracer_provider
            .force_flush()
            .map_err(|e| TelemetryError::Exporter(format!("span flush failed: {e}")))?;
        self.meter_provider
            .force_flush()
            .map_err(|e| TelemetryError::Exporter(format!("metric flush failed: {e}")))?;
        Ok(())
    }

    /// Flush and stop both providers. Both are shut down even if the first fails.
    pub fn shutdown(&self) -> TelemetryResult<()> {
        let traces = self.tracer_provider.shutdown();
        let metrics = self.meter_provider.shutdown();
        traces.map_err(|e| TelemetryError::Exporter(format!("tracer shutdown failed: {e}")))?;
        metrics.map_err(|e| TelemetryError::Exporter(format!("meter shutdown failed: {e}")))?;
        info!("GenAI telemetry shut down");
        Ok(())
    }
}

/// Output format for [`init_logging`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `genai_lens=info`.
/// Per-call usage is logged at debug under the `gen_ai.usage` target.
pub fn init_logging(format: LogFormat) -> TelemetryResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("genai_lens=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| TelemetryError::Config(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use crate::test_support::{MetricsHarness, SpanHarness};
    use crate::traits::LLMProvider;
    use crate::usage::OperationKind;

    #[test]
    fn test_init_rejects_bad_endpoint_without_fallback() {
        let config = TelemetryConfig::new("app").with_otlp_endpoint("ftp://collector");
        match Telemetry::init(config) {
            Err(TelemetryError::Config(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_init_falls_back_to_console() {
        let config = TelemetryConfig::new("app")
            .with_otlp_endpoint("not a url")
            .with_fallback_exporter(true)
            .with_batch_export_disabled(true);
        let telemetry = Telemetry::init(config).unwrap();
        assert_eq!(telemetry.exporter_kind(), Some(ExporterKind::Console));
        telemetry.shutdown().unwrap();
    }

    #[test]
    fn test_from_providers_honours_disabled_list() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let telemetry = Telemetry::from_providers(
            TelemetryConfig::new("app").with_disabled_provider("openai"),
            spans.provider.clone(),
            metrics.provider.clone(),
        );

        assert_eq!(telemetry.exporter_kind(), None);
        assert!(!telemetry.registry().is_enabled("openai"));
        assert!(telemetry.registry().is_enabled("anthropic"));
        assert_eq!(telemetry.context().config().application_name, "app");
    }

    #[tokio::test]
    async fn test_registered_instrumentation_flushes() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let mut telemetry = Telemetry::from_providers(
            TelemetryConfig::new("app"),
            spans.provider.clone(),
            metrics.provider.clone(),
        );
        telemetry
            .registry_mut()
            .register(Instrumentation::new("mock").with_endpoint(OperationKind::Chat, "mock.chat"));

        let client = telemetry.registry().attach("mock", MockProvider::new());
        client.complete("hello").await.unwrap();
        telemetry.force_flush().unwrap();

        assert_eq!(spans.spans().len(), 1);
        assert_eq!(metrics.counter_total(semconv::metric::REQUESTS), 1);
    }

    #[test]
    fn test_init_logging_only_once() {
        let _ = init_logging(LogFormat::Pretty);
        assert!(matches!(
            init_logging(LogFormat::Json),
            Err(TelemetryError::Config(_))
        ));
    }
}
