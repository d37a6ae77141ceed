//! genai-lens - OpenTelemetry telemetry for LLM provider calls
//!
//! Wraps provider calls so that each one produces a span, token and cost
//! metrics, and optional prompt/completion capture, without changing what
//! the caller sees.
//!
//! # Modules
//!
//! | Concern | Module | Entry point |
//! |---------|--------|-------------|
//! | Pricing tables | [`pricing`] | [`PricingProvider`] |
//! | Cost | [`cost`] | [`UsageRecord::price`] |
//! | Metric instruments | [`metrics`] | [`MetricsRegistry`] |
//! | Exporters | [`exporter`] | [`ExporterBootstrap`] |
//! | Streaming | [`streaming`] | [`InstrumentedStream`] |
//! | Interception | [`interceptor`] | [`CallInterceptor`] |
//! | Provider mapping | [`instrumentation`] | [`InstrumentationRegistry`] |
//!
//! # Architecture
//!
//! ```text
//! application ──► InstrumentedProvider ──► CallInterceptor ──► provider
//!                                              │
//!                    ┌─────────────────────────┼──────────────────┐
//!                    ▼                         ▼                  ▼
//!               span (tracer)      PricingProvider + cost   MetricsRegistry
//!                    │                                            │
//!                    └────────────► ExporterBootstrap ◄───────────┘
//!                                   (OTLP or console)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use genai_lens::{LLMProvider, Telemetry, TelemetryConfig};
//!
//! let telemetry = Telemetry::init(TelemetryConfig::from_env()?)?;
//! let client = telemetry.registry().attach("openai", openai_client);
//! let response = client.complete("Hello, world!").await?;
//! telemetry.shutdown()?;
//! ```
//!
//! # See Also
//!
//! - [`crate::traits`] for the provider traits
//! - [`crate::semconv`] for the attribute and metric names

pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod exporter;
pub mod extract;
pub mod instrumentation;
pub mod interceptor;
pub mod metrics;
pub mod pricing;
pub mod providers;
pub mod registry;
pub mod semconv;
pub mod streaming;
pub mod telemetry;
pub mod traits;
pub mod usage;

#[cfg(test)]
mod test_support;

pub use config::TelemetryConfig;
pub use context::TelemetryContext;
pub use error::{LlmError, Result, TelemetryError, TelemetryResult};
pub use exporter::{ExportPolicy, ExporterBootstrap, ExporterHandle, ExporterKind};
pub use extract::{Completion, ResponseExtractor};
pub use instrumentation::{Instrumentation, InstrumentationRegistry, InterceptorSet};
pub use interceptor::{CallInterceptor, CallRequest, Intercepted};
pub use metrics::MetricsRegistry;
pub use pricing::{PricingProvider, PricingSource, PricingTable};
pub use providers::{InstrumentedProvider, MockProvider};
pub use registry::ProviderRegistry;
pub use streaming::{ChunkExtractor, InstrumentedStream, StreamAccumulator, StreamTimings};
pub use telemetry::{init_logging, LogFormat, Telemetry};
pub use traits::{
    AudioProvider, AudioResponse, ChatMessage, ChatRole, Choice, CompletionOptions,
    EmbeddingProvider, EmbeddingResponse, GeneratedImage, ImageProvider, ImageRequest,
    ImageResponse, LLMProvider, LLMResponse, QueryEngine, QueryResponse, SourceNode,
    SpeechRequest, StreamChunk,
};
pub use usage::{ImageOptions, OperationKind, TokenUsage, UsageRecord};
