//! Shared pipeline state handed to every interceptor.

use std::sync::{Arc, PoisonError, RwLock};

use opentelemetry_sdk::trace::SdkTracer;
use tracing::debug;

use crate::config::TelemetryConfig;
use crate::metrics::MetricsRegistry;
use crate::pricing::PricingProvider;

/// Configuration snapshot, tracer, metric instruments and pricing.
///
/// Cheap to clone. Every interceptor reads the configuration once per call
/// through [`TelemetryContext::config`], so an update never tears a call in
/// half: calls already in flight keep the snapshot they started with.
#[derive(Clone)]
pub struct TelemetryContext {
    config: Arc<RwLock<Arc<TelemetryConfig>>>,
    tracer: SdkTracer,
    metrics: MetricsRegistry,
    pricing: Arc<PricingProvider>,
}

impl std::fmt::Debug for TelemetryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryContext")
            .field("config", &self.config())
            .field("pricing", &self.pricing)
            .finish_non_exhaustive()
    }
}

impl TelemetryContext {
    pub fn new(
        config: TelemetryConfig,
        tracer: SdkTracer,
        metrics: MetricsRegistry,
        pricing: Arc<PricingProvider>,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(Arc::new(config))),
            tracer,
            metrics,
            pricing,
        }
    }

    /// Build a context whose pricing provider follows `config`.
    pub fn from_config(config: TelemetryConfig, tracer: SdkTracer, metrics: MetricsRegistry) -> Self {
        let pricing = Arc::new(PricingProvider::new(
            config.pricing_source.clone(),
            config.pricing_refresh_interval,
        ));
        Self::new(config, tracer, metrics, pricing)
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<TelemetryConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Apply a change to the configuration. Calls that start afterwards see
    /// the new values; a changed pricing source is handed to the pricing
    /// provider.
    pub fn update_config<F>(&self, update: F)
    where
        F: FnOnce(&mut TelemetryConfig),
    {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = TelemetryConfig::clone(&guard);
        update(&mut next);
        let source_changed = next.pricing_source != guard.pricing_source;
        *guard = Arc::new(next);
        let source = guard.pricing_source.clone();
        drop(guard);

        if source_changed {
            debug!("Pricing source changed; retargeting pricing provider");
            self.pricing.set_source(source);
        }
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn pricing(&self) -> &Arc<PricingProvider> {
        &self.pricing
    }
}
