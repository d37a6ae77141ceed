//! Telemetry decorator for any provider.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │  Application             │
//! └───────────┬──────────────┘
//!             │ chat(), embed(), generate_image(), speech(), query()
//!             ▼
//! ┌──────────────────────────┐
//! │  InstrumentedProvider    │  ← routes each call through the
//! │  • InterceptorSet        │    CallInterceptor for its operation
//! └───────────┬──────────────┘
//!             │ delegates
//!             ▼
//! ┌──────────────────────────┐
//! │  Inner provider          │
//! └──────────────────────────┘
//! ```
//!
//! Operations without an interceptor in the set are delegated untouched.
//! The same decorator backs both automatic attachment through the
//! [`crate::InstrumentationRegistry`] and manual attachment of one client
//! instance, so both produce identical telemetry.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use crate::error::Result;
use crate::instrumentation::InterceptorSet;
use crate::interceptor::{CallInterceptor, CallRequest};
use crate::providers::genai_events;
use crate::traits::{
    AudioProvider, AudioResponse, ChatMessage, CompletionOptions, EmbeddingProvider,
    EmbeddingResponse, ImageProvider, ImageRequest, ImageResponse, LLMProvider, LLMResponse,
    QueryEngine, QueryResponse, SpeechRequest, StreamChunk,
};
use crate::usage::{ImageOptions, OperationKind};

/// A provider whose calls produce spans, cost and metrics.
///
/// # Example
///
/// ```ignore
/// let provider = registry.attach("openai", OpenAIClient::new(key));
/// // Same calls as before, now traced and metered.
/// let response = provider.chat(&messages, None).await?;
/// ```
#[derive(Debug, Clone)]
pub struct InstrumentedProvider<P> {
    inner: P,
    interceptors: InterceptorSet,
}

impl<P> InstrumentedProvider<P> {
    pub fn new(inner: P, interceptors: InterceptorSet) -> Self {
        Self {
            inner,
            interceptors,
        }
    }

    /// Get a reference to the inner provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Consume the wrapper and return the inner provider.
    pub fn into_inner(self) -> P {
        self.inner
    }

    pub fn interceptors(&self) -> &InterceptorSet {
        &self.interceptors
    }

    fn interceptor(&self, operation: OperationKind) -> Option<&CallInterceptor> {
        self.interceptors.get(operation)
    }
}

fn total_chars<'a>(texts: impl IntoIterator<Item = &'a str>) -> u64 {
    texts.into_iter().map(|t| t.chars().count() as u64).sum()
}

fn chat_request(
    interceptor: &CallInterceptor,
    model: &str,
    messages: &[ChatMessage],
    options: Option<&CompletionOptions>,
) -> CallRequest {
    let request = CallRequest::new(model)
        .with_options(options)
        .with_input_characters(total_chars(messages.iter().map(|m| m.content.as_str())));
    if interceptor.captures_content() {
        request.with_prompt(genai_events::prompt_messages_json(messages))
    } else {
        request
    }
}

#[async_trait]
impl<P: LLMProvider> LLMProvider for InstrumentedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        let Some(interceptor) = self.interceptor(OperationKind::Chat) else {
            return self.inner.chat(messages, options).await;
        };
        let request = chat_request(interceptor, self.inner.model(), messages, options);
        interceptor
            .intercept(request, self.inner.chat(messages, options))
            .await
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let Some(interceptor) = self.interceptor(OperationKind::Chat) else {
            return self.inner.chat_stream(messages, options).await;
        };
        let request = chat_request(interceptor, self.inner.model(), messages, options).streaming();
        let stream = interceptor
            .intercept_stream(request, self.inner.chat_stream(messages, options))
            .await?;
        Ok(stream.boxed())
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for InstrumentedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        let Some(interceptor) = self.interceptor(OperationKind::Embedding) else {
            return self.inner.embed(texts).await;
        };
        let mut request = CallRequest::new(self.inner.model())
            .with_input_characters(total_chars(texts.iter().map(String::as_str)));
        if interceptor.captures_content() {
            request = request.with_prompt(serde_json::to_string(texts).unwrap_or_default());
        }
        interceptor.intercept(request, self.inner.embed(texts)).await
    }
}

#[async_trait]
impl<P: ImageProvider> ImageProvider for InstrumentedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        let Some(interceptor) = self.interceptor(OperationKind::Image) else {
            return self.inner.generate_image(request).await;
        };
        let model = request.model.as_deref().unwrap_or(self.inner.model());
        let mut call = CallRequest::new(model)
            .with_choice_count(request.n as u64)
            .with_image(ImageOptions {
                quality: request.quality.clone(),
                size: request.size.clone(),
            });
        if interceptor.captures_content() {
            call = call.with_prompt(request.prompt.clone());
        }
        interceptor
            .intercept(call, self.inner.generate_image(request))
            .await
    }
}

#[async_trait]
impl<P: AudioProvider> AudioProvider for InstrumentedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn speech(&self, request: &SpeechRequest) -> Result<AudioResponse> {
        let Some(interceptor) = self.interceptor(OperationKind::Audio) else {
            return self.inner.speech(request).await;
        };
        let model = request.model.as_deref().unwrap_or(self.inner.model());
        let mut call = CallRequest::new(model)
            .with_voice(request.voice.clone())
            .with_input_characters(total_chars([request.input.as_str()]));
        if interceptor.captures_content() {
            call = call.with_prompt(request.input.clone());
        }
        interceptor.intercept(call, self.inner.speech(request)).await
    }
}

#[async_trait]
impl<P: QueryEngine> QueryEngine for InstrumentedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn query(&self, query: &str) -> Result<QueryResponse> {
        let Some(interceptor) = self.interceptor(OperationKind::Retrieval) else {
            return self.inner.query(query).await;
        };
        let mut call = CallRequest::new(self.inner.model())
            .with_input_characters(total_chars([query]));
        if interceptor.captures_content() {
            call = call.with_prompt(query);
        }
        interceptor.intercept(call, self.inner.query(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::context::TelemetryContext;
    use crate::metrics::MetricsRegistry;
    use crate::providers::mock::MockProvider;
    use crate::semconv;
    use crate::test_support::{find_attribute, MetricsHarness, SpanHarness};
    use opentelemetry::Value;

    fn context(spans: &SpanHarness, metrics: &MetricsHarness, capture: bool) -> TelemetryContext {
        TelemetryContext::from_config(
            TelemetryConfig::new("app")
                .with_content_capture(capture)
                .with_pricing_source(
                    r#"{"chat":{"mock-model":{"promptPrice":1.0,"completionPrice":2.0}},
                        "images":{"dall-e-3":{"hd":{"1024x1024":0.08}}},
                        "audio":{"mock-model":0.015}}"#,
                ),
            spans.tracer(),
            MetricsRegistry::new(&metrics.meter()),
        )
    }

    fn all_operations(context: &TelemetryContext) -> InterceptorSet {
        let mut set = InterceptorSet::default();
        for (operation, endpoint) in [
            (OperationKind::Chat, "mock.chat"),
            (OperationKind::Embedding, "mock.embeddings"),
            (OperationKind::Image, "mock.images"),
            (OperationKind::Audio, "mock.audio"),
            (OperationKind::Retrieval, "mock.query"),
        ] {
            set.insert(CallInterceptor::new(context.clone(), "mock", endpoint, operation));
        }
        set
    }

    #[test]
    fn test_instrumented_provider_delegates_identity() {
        let provider = InstrumentedProvider::new(MockProvider::named("acme"), InterceptorSet::default());
        assert_eq!(LLMProvider::name(&provider), "acme");
        assert_eq!(LLMProvider::model(&provider), "mock-model");
        assert!(provider.supports_streaming());
        assert_eq!(provider.into_inner().call_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_creates_span_with_cost() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let ctx = context(&spans, &metrics, false);
        let provider = InstrumentedProvider::new(MockProvider::new().with_usage(1000, 500), all_operations(&ctx));

        let response = provider.complete("Hello").await.unwrap();
        assert_eq!(response.content(), "Mock response");

        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "mock.chat");
        match find_attribute(&finished[0], semconv::USAGE_COST) {
            Some(Value::F64(cost)) => assert!((cost - 2.0).abs() < 1e-9),
            other => panic!("unexpected cost {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_prompt_captured_as_messages() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let ctx = context(&spans, &metrics, true);
        let provider = InstrumentedProvider::new(MockProvider::new(), all_operations(&ctx));

        provider.chat(&[ChatMessage::user("Hi")], None).await.unwrap();

        let prompt = find_attribute(&spans.spans()[0], semconv::PROMPT).cloned();
        assert_eq!(
            prompt,
            Some(Value::from(
                r#"[{"role":"user","content":[{"type":"text","text":"Hi"}]}]"#
            ))
        );
    }

    #[tokio::test]
    async fn test_image_and_audio_pricing() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let ctx = context(&spans, &metrics, false);
        let provider = InstrumentedProvider::new(MockProvider::new(), all_operations(&ctx));

        provider
            .generate_image(
                &ImageRequest::new("cat")
                    .with_model("dall-e-3")
                    .with_quality("hd")
                    .with_count(2),
            )
            .await
            .unwrap();
        provider
            .speech(&SpeechRequest::new("a".repeat(2000), "alloy"))
            .await
            .unwrap();

        let finished = spans.spans();
        let cost = |name: &str| {
            let span = finished.iter().find(|s| s.name == name).unwrap();
            match find_attribute(span, semconv::USAGE_COST) {
                Some(Value::F64(cost)) => *cost,
                _ => f64::NAN,
            }
        };
        assert!((cost("mock.images") - 0.16).abs() < 1e-9);
        assert!((cost("mock.audio") - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_records_documents_without_tokens() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let ctx = context(&spans, &metrics, false);
        let provider = InstrumentedProvider::new(MockProvider::new(), all_operations(&ctx));

        provider.query("where?").await.unwrap();

        let span = &spans.spans()[0];
        assert_eq!(
            find_attribute(span, semconv::RETRIEVAL_DOCUMENT_COUNT),
            Some(&Value::I64(2))
        );
        assert!(find_attribute(span, semconv::USAGE_INPUT_TOKENS).is_none());
    }

    #[tokio::test]
    async fn test_missing_interceptor_delegates_untouched() {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let ctx = context(&spans, &metrics, false);
        let mut set = InterceptorSet::default();
        set.insert(CallInterceptor::new(ctx, "mock", "mock.chat", OperationKind::Chat));
        let provider = InstrumentedProvider::new(MockProvider::new(), set);

        provider.embed(&["x".to_string()]).await.unwrap();
        assert!(spans.spans().is_empty());
    }
}
