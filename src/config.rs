//! Pipeline configuration.
//!
//! `TelemetryConfig` is a plain value: build it with the `with_*` methods or
//! load it from the environment, then hand it to [`crate::Telemetry::init`].
//! After initialization it lives inside a [`crate::TelemetryContext`] and is
//! only changed through [`crate::TelemetryContext::update_config`].
//!
//! # Environment Variables
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `GENAI_LENS_ENVIRONMENT` / `OTEL_DEPLOYMENT_ENVIRONMENT` | `environment` | `default` |
//! | `GENAI_LENS_APPLICATION_NAME` / `OTEL_SERVICE_NAME` | `application_name` | `default` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `otlp_endpoint` | unset |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `otlp_headers` (`k=v,k2=v2`) | empty |
//! | `GENAI_LENS_DISABLE_BATCH` | `disable_batch_export` | `false` |
//! | `GENAI_LENS_DISABLE_METRICS` | `disable_metrics` | `false` |
//! | `GENAI_LENS_CAPTURE_CONTENT` | `trace_content_capture` | `false` |
//! | `GENAI_LENS_ALLOW_FALLBACK_EXPORTER` | `allow_fallback_exporter` | `false` |
//! | `GENAI_LENS_PRICING_JSON` | `pricing_source` (URL or JSON) | default URL |
//! | `GENAI_LENS_PRICING_REFRESH_SECS` | `pricing_refresh_interval` | 86400 |
//! | `GENAI_LENS_METRICS_INTERVAL_MS` | `metrics_export_interval` | 60000 |
//! | `GENAI_LENS_DISABLED_INSTRUMENTORS` | `disabled_providers` (comma list) | empty |
//!
//! Content capture is privacy-by-default: prompts and completions are NOT
//! recorded unless explicitly enabled.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{TelemetryError, TelemetryResult};
use crate::pricing::PricingSource;

const DEFAULT_NAME: &str = "default";
const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PRICING_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the whole telemetry pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Deployment environment reported on every span and metric.
    pub environment: String,
    /// Application (service) name reported on every span and metric.
    pub application_name: String,
    /// OTLP/HTTP collector base URL. `None` uses the exporter's own default.
    pub otlp_endpoint: Option<String>,
    /// Extra transport headers sent to the collector.
    pub otlp_headers: HashMap<String, String>,
    /// Export spans immediately instead of batching them.
    pub disable_batch_export: bool,
    /// Skip every metric instrument call.
    pub disable_metrics: bool,
    /// Record prompt and completion text on spans.
    pub trace_content_capture: bool,
    /// Where model prices come from.
    pub pricing_source: PricingSource,
    /// How long a remotely fetched pricing table stays fresh.
    pub pricing_refresh_interval: Duration,
    /// Periodic metric export interval.
    pub metrics_export_interval: Duration,
    /// Fall back to the console exporter if the OTLP exporter cannot be built.
    pub allow_fallback_exporter: bool,
    /// Provider ids that must not be instrumented.
    pub disabled_providers: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_NAME.to_string(),
            application_name: DEFAULT_NAME.to_string(),
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            disable_batch_export: false,
            disable_metrics: false,
            trace_content_capture: false,
            pricing_source: PricingSource::Default,
            pricing_refresh_interval: DEFAULT_PRICING_REFRESH,
            metrics_export_interval: DEFAULT_METRICS_INTERVAL,
            allow_fallback_exporter: false,
            disabled_providers: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    /// Create a config with the given application name and defaults elsewhere.
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from process environment variables.
    pub fn from_env() -> TelemetryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults. Malformed numbers are rejected.
    pub fn from_lookup<F>(lookup: F) -> TelemetryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = get("GENAI_LENS_ENVIRONMENT").or_else(|| get("OTEL_DEPLOYMENT_ENVIRONMENT")) {
            config.environment = env;
        }
        if let Some(name) = get("GENAI_LENS_APPLICATION_NAME").or_else(|| get("OTEL_SERVICE_NAME")) {
            config.application_name = name;
        }
        config.otlp_endpoint = get("OTEL_EXPORTER_OTLP_ENDPOINT");
        if let Some(headers) = get("OTEL_EXPORTER_OTLP_HEADERS") {
            config.otlp_headers = parse_headers(&headers)?;
        }

        config.disable_batch_export = get("GENAI_LENS_DISABLE_BATCH").is_some_and(|v| is_truthy(&v));
        config.disable_metrics = get("GENAI_LENS_DISABLE_METRICS").is_some_and(|v| is_truthy(&v));
        config.trace_content_capture =
            get("GENAI_LENS_CAPTURE_CONTENT").is_some_and(|v| is_truthy(&v));
        config.allow_fallback_exporter =
            get("GENAI_LENS_ALLOW_FALLBACK_EXPORTER").is_some_and(|v| is_truthy(&v));

        if let Some(source) = get("GENAI_LENS_PRICING_JSON") {
            config.pricing_source = PricingSource::from_input(&source);
        }
        if let Some(secs) = get("GENAI_LENS_PRICING_REFRESH_SECS") {
            config.pricing_refresh_interval =
                Duration::from_secs(parse_number("GENAI_LENS_PRICING_REFRESH_SECS", &secs)?);
        }
        if let Some(ms) = get("GENAI_LENS_METRICS_INTERVAL_MS") {
            config.metrics_export_interval =
                Duration::from_millis(parse_number("GENAI_LENS_METRICS_INTERVAL_MS", &ms)?);
        }
        if let Some(list) = get("GENAI_LENS_DISABLED_INSTRUMENTORS") {
            config.disabled_providers = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    /// Set the deployment environment.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the OTLP collector endpoint.
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Add a transport header for the collector.
    pub fn with_otlp_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.otlp_headers.insert(key.into(), value.into());
        self
    }

    /// Export spans one by one instead of batching.
    pub fn with_batch_export_disabled(mut self, disabled: bool) -> Self {
        self.disable_batch_export = disabled;
        self
    }

    /// Turn metric recording on or off.
    pub fn with_metrics_disabled(mut self, disabled: bool) -> Self {
        self.disable_metrics = disabled;
        self
    }

    /// Opt in to prompt/completion capture.
    pub fn with_content_capture(mut self, enabled: bool) -> Self {
        self.trace_content_capture = enabled;
        self
    }

    /// Set the pricing source.
    pub fn with_pricing_source(mut self, source: impl Into<PricingSource>) -> Self {
        self.pricing_source = source.into();
        self
    }

    /// Set how long a fetched pricing table stays fresh.
    pub fn with_pricing_refresh_interval(mut self, interval: Duration) -> Self {
        self.pricing_refresh_interval = interval;
        self
    }

    /// Set the periodic metric export interval.
    pub fn with_metrics_export_interval(mut self, interval: Duration) -> Self {
        self.metrics_export_interval = interval;
        self
    }

    /// Allow the console exporter when the OTLP exporter cannot be built.
    pub fn with_fallback_exporter(mut self, allowed: bool) -> Self {
        self.allow_fallback_exporter = allowed;
        self
    }

    /// Disable instrumentation for a provider id.
    pub fn with_disabled_provider(mut self, provider: impl Into<String>) -> Self {
        self.disabled_providers.push(provider.into());
        self
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_number(key: &str, value: &str) -> TelemetryResult<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        TelemetryError::Config(format!("{key} must be a non-negative integer, got '{value}'"))
    })
}

fn parse_headers(raw: &str) -> TelemetryResult<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            TelemetryError::Config(format!(
                "OTEL_EXPORTER_OTLP_HEADERS entry '{pair}' is not of the form key=value"
            ))
        })?;
        headers.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}
