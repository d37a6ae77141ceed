//! Telemetry-aware wrapper for streamed responses.
//!
//! ```text
//! Provider Stream ──► InstrumentedStream ──► consumer
//!        │                   │
//!        ▼                   ▼
//!   chunk items       StreamTimings      (first chunk, mean interval)
//!                     StreamAccumulator  (content, usage, finish reason)
//!                            │
//!                            ▼ exactly once
//!          exhausted ─► complete usage, status ok
//!          item error ─► partial usage, status error
//!          dropped   ─► partial usage
//! ```
//!
//! Items are passed through as they arrive: nothing is buffered, added or
//! reordered. Streams are single-consumer.

use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use opentelemetry::trace::{Status, TraceContextExt};
use opentelemetry::Context;
use pin_project_lite::pin_project;

use crate::config::TelemetryConfig;
use crate::extract::{Completion, ResponseExtractor};
use crate::interceptor::{error_type_name, CallInterceptor, CallOutcome, CallRequest};
use crate::traits::StreamChunk;
use crate::usage::TokenUsage;

/// Characters per token estimation (average across models).
const CHARS_PER_TOKEN: u64 = 4;

/// Chunk arrival times for one stream.
#[derive(Debug, Clone)]
pub struct StreamTimings {
    /// When the call that opened the stream started.
    request_start: Instant,
    first_chunk: Option<Instant>,
    last_chunk: Option<Instant>,
    chunks: u64,
    /// Provider-reported time to first token, if any.
    provider_ttft: Option<Duration>,
}

impl Default for StreamTimings {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTimings {
    pub fn new() -> Self {
        Self::with_start_time(Instant::now())
    }

    pub fn with_start_time(start: Instant) -> Self {
        Self {
            request_start: start,
            first_chunk: None,
            last_chunk: None,
            chunks: 0,
            provider_ttft: None,
        }
    }

    pub fn record_chunk(&mut self) {
        self.record_chunk_at(Instant::now());
    }

    pub fn record_chunk_at(&mut self, at: Instant) {
        if self.first_chunk.is_none() {
            self.first_chunk = Some(at);
        }
        self.last_chunk = Some(at);
        self.chunks += 1;
    }

    /// When available, this takes precedence over the measured value.
    pub fn set_provider_ttft(&mut self, ttft: Duration) {
        self.provider_ttft = Some(ttft);
    }

    /// Time to first chunk. `None` until a chunk arrived.
    pub fn ttft(&self) -> Option<Duration> {
        if let Some(ttft) = self.provider_ttft {
            return Some(ttft);
        }
        self.first_chunk
            .map(|first| first.saturating_duration_since(self.request_start))
    }

    /// Mean interval between chunks. Needs at least two chunks.
    pub fn time_per_chunk(&self) -> Option<Duration> {
        match (self.first_chunk, self.last_chunk) {
            (Some(first), Some(last)) if self.chunks >= 2 => {
                let span = last.saturating_duration_since(first);
                Some(Duration::from_secs_f64(
                    span.as_secs_f64() / (self.chunks - 1) as f64,
                ))
            }
            _ => None,
        }
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunks
    }

    pub fn elapsed(&self) -> Duration {
        self.request_start.elapsed()
    }
}

/// Everything learned from the chunks seen so far.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning_tokens: u64,
    finish_reason: Option<String>,
    model: Option<String>,
    response_id: Option<String>,
    reported: Option<TokenUsage>,
    prompt_characters: u64,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompt size, used to estimate prompt tokens when none are reported.
    pub fn with_prompt_characters(mut self, characters: u64) -> Self {
        self.prompt_characters = characters;
        self
    }

    pub fn push_content(&mut self, text: &str) {
        self.content.push_str(text);
    }

    pub fn push_reasoning(&mut self, tokens: Option<usize>) {
        if let Some(tokens) = tokens {
            self.reasoning_tokens += tokens as u64;
        }
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    pub fn set_usage(&mut self, usage: TokenUsage) {
        self.reported = Some(usage);
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = Some(model.into());
    }

    pub fn set_response_id(&mut self, id: impl Into<String>) {
        self.response_id = Some(id.into());
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// True when usage comes from the character heuristic.
    pub fn is_estimated(&self) -> bool {
        self.reported.is_none() && (!self.content.is_empty() || self.prompt_characters > 0)
    }
}

fn estimate_tokens(characters: u64) -> u64 {
    if characters == 0 {
        return 0;
    }
    std::cmp::max(1, characters / CHARS_PER_TOKEN)
}

impl ResponseExtractor for StreamAccumulator {
    fn response_model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    fn usage(&self) -> TokenUsage {
        let usage = self.reported.unwrap_or_else(|| {
            TokenUsage::new(
                estimate_tokens(self.prompt_characters),
                estimate_tokens(self.content.chars().count() as u64),
            )
        });
        usage.with_reasoning_tokens(usage.reasoning_tokens.max(self.reasoning_tokens))
    }

    fn completions(&self) -> Vec<Completion<'_>> {
        if self.content.is_empty() && self.finish_reason.is_none() {
            return Vec::new();
        }
        vec![Completion {
            index: 0,
            content: &self.content,
            finish_reason: self.finish_reason.as_deref(),
        }]
    }
}

/// Folds one streamed item into a [`StreamAccumulator`].
pub trait ChunkExtractor {
    fn apply(&self, accumulator: &mut StreamAccumulator);

    /// Time to first token as reported by the provider.
    fn provider_ttft(&self) -> Option<Duration> {
        None
    }
}

impl ChunkExtractor for StreamChunk {
    fn apply(&self, accumulator: &mut StreamAccumulator) {
        match self {
            StreamChunk::Content(text) => accumulator.push_content(text),
            StreamChunk::ThinkingContent { tokens_used, .. } => {
                accumulator.push_reasoning(*tokens_used)
            }
            StreamChunk::Model(model) => accumulator.set_model(model.clone()),
            StreamChunk::Usage {
                prompt_tokens,
                completion_tokens,
            } => accumulator.set_usage(TokenUsage::new(
                *prompt_tokens as u64,
                *completion_tokens as u64,
            )),
            StreamChunk::Finished { reason, .. } => accumulator.set_finish_reason(reason.clone()),
        }
    }

    fn provider_ttft(&self) -> Option<Duration> {
        match self {
            StreamChunk::Finished {
                ttft_ms: Some(ms), ..
            } if ms.is_finite() && *ms >= 0.0 => Some(Duration::from_secs_f64(ms / 1000.0)),
            _ => None,
        }
    }
}

impl ChunkExtractor for String {
    fn apply(&self, accumulator: &mut StreamAccumulator) {
        accumulator.push_content(self);
    }
}

/// Telemetry state of one open stream. Consumed by exactly one of
/// [`StreamState::complete`], [`StreamState::fail`] or
/// [`StreamState::abandon`].
pub(crate) struct StreamState {
    interceptor: CallInterceptor,
    cx: Context,
    config: Arc<TelemetryConfig>,
    request: CallRequest,
    timings: StreamTimings,
    accumulator: StreamAccumulator,
}

impl StreamState {
    pub(crate) fn new(
        interceptor: CallInterceptor,
        cx: Context,
        config: Arc<TelemetryConfig>,
        request: CallRequest,
        started: Instant,
    ) -> Self {
        let accumulator =
            StreamAccumulator::new().with_prompt_characters(request.input_characters.unwrap_or(0));
        Self {
            interceptor,
            cx,
            config,
            request,
            timings: StreamTimings::with_start_time(started),
            accumulator,
        }
    }

    fn observe<C: ChunkExtractor>(&mut self, chunk: &C) {
        self.timings.record_chunk();
        if let Some(ttft) = chunk.provider_ttft() {
            self.timings.set_provider_ttft(ttft);
        }
        chunk.apply(&mut self.accumulator);
    }

    fn outcome(&self, partial: bool, error_type: Option<&'static str>) -> CallOutcome {
        CallOutcome {
            duration: self.timings.elapsed(),
            time_to_first_chunk: self.timings.ttft(),
            time_per_chunk: self.timings.time_per_chunk(),
            partial,
            estimated: self.accumulator.is_estimated(),
            error_type,
        }
    }

    fn record(&self, outcome: &CallOutcome) {
        self.interceptor.record_response(
            &self.cx,
            &self.config,
            &self.request,
            &self.accumulator,
            outcome,
        );
    }

    fn complete(self) {
        self.record(&self.outcome(false, None));
        let span = self.cx.span();
        span.set_status(Status::Ok);
        span.end();
    }

    fn fail<E: Error>(self, err: &E) {
        let span = self.cx.span();
        span.record_error(err);
        self.record(&self.outcome(true, Some(error_type_name::<E>())));
        span.set_status(Status::error(err.to_string()));
        span.end();
    }

    fn abandon(self) {
        self.record(&self.outcome(true, None));
        self.cx.span().end();
    }
}

pin_project! {
    /// A stream with the same items as `S` that finalizes its span once.
    ///
    /// Not `Clone`: a stream has a single consumer. `S` need not be `Unpin`.
    pub struct InstrumentedStream<S> {
        #[pin]
        inner: S,
        state: Option<StreamState>,
    }

    impl<S> PinnedDrop for InstrumentedStream<S> {
        fn drop(this: Pin<&mut Self>) {
            if let Some(state) = this.project().state.take() {
                state.abandon();
            }
        }
    }
}

impl<S> InstrumentedStream<S> {
    pub(crate) fn new(inner: S, state: StreamState) -> Self {
        Self {
            inner,
            state: Some(state),
        }
    }

    /// A wrapper that records nothing.
    pub(crate) fn passthrough(inner: S) -> Self {
        Self { inner, state: None }
    }

    /// Whether the span is still open.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }
}

impl<S, C, E> Stream for InstrumentedStream<S>
where
    S: Stream<Item = Result<C, E>>,
    C: ChunkExtractor,
    E: Error,
{
    type Item = Result<C, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _attached = this.state.as_ref().map(|state| state.cx.clone().attach());
        let polled = this.inner.poll_next(cx);

        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(state) = this.state.as_mut() {
                    state.observe(chunk);
                }
            }
            Poll::Ready(Some(Err(err))) => {
                if let Some(state) = this.state.take() {
                    state.fail(err);
                }
            }
            Poll::Ready(None) => {
                if let Some(state) = this.state.take() {
                    state.complete();
                }
            }
            Poll::Pending => {}
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TelemetryContext;
    use crate::error::LlmError;
    use crate::metrics::MetricsRegistry;
    use crate::semconv::{self, metric};
    use crate::test_support::{find_attribute, MetricsHarness, SpanHarness};
    use crate::usage::OperationKind;
    use futures::stream::{self, StreamExt};
    use opentelemetry::Value;

    fn setup() -> (SpanHarness, MetricsHarness, CallInterceptor) {
        let spans = SpanHarness::new();
        let metrics = MetricsHarness::new();
        let context = TelemetryContext::from_config(
            TelemetryConfig::new("app").with_pricing_source(r#"{"chat":{}}"#),
            spans.tracer(),
            MetricsRegistry::new(&metrics.meter()),
        );
        let interceptor =
            CallInterceptor::new(context, "openai", "openai.chat.stream", OperationKind::Chat);
        (spans, metrics, interceptor)
    }

    fn chunks() -> Vec<Result<StreamChunk, LlmError>> {
        vec![
            Ok(StreamChunk::Model("gpt-4o-2024".into())),
            Ok(StreamChunk::Content("Hello".into())),
            Ok(StreamChunk::Content(", world".into())),
            Ok(StreamChunk::Usage {
                prompt_tokens: 12,
                completion_tokens: 3,
            }),
            Ok(StreamChunk::Finished {
                reason: "stop".into(),
                ttft_ms: None,
            }),
        ]
    }

    #[test]
    fn test_timings_ttft_and_mean_interval() {
        let start = Instant::now();
        let mut timings = StreamTimings::with_start_time(start);
        assert!(timings.ttft().is_none());

        timings.record_chunk_at(start + Duration::from_millis(100));
        assert_eq!(timings.ttft(), Some(Duration::from_millis(100)));
        assert!(timings.time_per_chunk().is_none());

        timings.record_chunk_at(start + Duration::from_millis(120));
        timings.record_chunk_at(start + Duration::from_millis(160));
        assert_eq!(timings.time_per_chunk(), Some(Duration::from_millis(30)));
        assert_eq!(timings.chunk_count(), 3);
    }

    #[test]
    fn test_mean_interval_with_huge_chunk_count() {
        let start = Instant::now();
        let mut timings = StreamTimings::with_start_time(start);
        timings.record_chunk_at(start);
        timings.record_chunk_at(start + Duration::from_secs(4));
        timings.chunks = (1u64 << 32) + 1;

        let mean = timings.time_per_chunk().unwrap();
        assert!(mean < Duration::from_micros(1));
    }

    #[test]
    fn test_provider_ttft_preferred() {
        let start = Instant::now();
        let mut timings = StreamTimings::with_start_time(start);
        timings.record_chunk_at(start + Duration::from_millis(500));
        timings.set_provider_ttft(Duration::from_millis(90));
        assert_eq!(timings.ttft(), Some(Duration::from_millis(90)));
    }

    #[test]
    fn test_accumulator_estimates_without_reported_usage() {
        let mut acc = StreamAccumulator::new().with_prompt_characters(40);
        acc.push_content("abcdefgh");
        assert!(acc.is_estimated());
        assert_eq!(acc.usage(), TokenUsage::new(10, 2));

        acc.set_usage(TokenUsage::new(7, 5));
        assert!(!acc.is_estimated());
        assert_eq!(acc.usage().prompt_tokens, 7);
    }

    #[test]
    fn test_chunk_extraction() {
        let mut acc = StreamAccumulator::new();
        for chunk in chunks().into_iter().flatten() {
            chunk.apply(&mut acc);
        }
        assert_eq!(acc.content(), "Hello, world");
        assert_eq!(acc.response_model(), Some("gpt-4o-2024"));
        assert_eq!(acc.completions()[0].finish_reason, Some("stop"));

        let finished = StreamChunk::Finished {
            reason: "stop".into(),
            ttft_ms: Some(250.0),
        };
        assert_eq!(finished.provider_ttft(), Some(Duration::from_millis(250)));
    }

    #[tokio::test]
    async fn test_full_consumption_emits_once() {
        let (spans, metrics, interceptor) = setup();
        let stream = interceptor
            .intercept_stream(CallRequest::new("gpt-4o"), async {
                Ok::<_, LlmError>(stream::iter(chunks()))
            })
            .await
            .unwrap();
        assert!(spans.spans().is_empty());

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 5);

        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        let span = &finished[0];
        assert_eq!(span.status, Status::Ok);
        assert_eq!(
            find_attribute(span, semconv::USAGE_OUTPUT_TOKENS),
            Some(&Value::I64(3))
        );
        assert_eq!(
            find_attribute(span, semconv::REQUEST_IS_STREAM),
            Some(&Value::Bool(true))
        );
        assert!(find_attribute(span, semconv::RESPONSE_PARTIAL).is_none());
        assert!(find_attribute(span, semconv::SERVER_TIME_TO_FIRST_TOKEN).is_some());
        assert_eq!(metrics.counter_total(metric::REQUESTS), 1);
        assert!(metrics
            .metric_names()
            .contains(&metric::TIME_TO_FIRST_TOKEN.to_string()));
    }

    #[tokio::test]
    async fn test_non_unpin_stream_is_adapted_without_boxing() {
        let (spans, _metrics, interceptor) = setup();
        let source = stream::iter(chunks()).then(|item| async move {
            tokio::task::yield_now().await;
            item
        });
        let stream = interceptor
            .intercept_stream(CallRequest::new("gpt-4o"), async {
                Ok::<_, LlmError>(source)
            })
            .await
            .unwrap();

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 5);
        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, Status::Ok);
    }

    #[tokio::test]
    async fn test_early_drop_emits_partial_once() {
        let (spans, metrics, interceptor) = setup();
        let mut stream = interceptor
            .intercept_stream(CallRequest::new("gpt-4o").with_input_characters(8), async {
                Ok::<_, LlmError>(stream::iter(chunks()))
            })
            .await
            .unwrap();

        let _ = stream.next().await;
        let _ = stream.next().await;
        assert!(stream.is_active());
        drop(stream);

        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        let span = &finished[0];
        assert_eq!(
            find_attribute(span, semconv::RESPONSE_PARTIAL),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            find_attribute(span, semconv::USAGE_ESTIMATED),
            Some(&Value::Bool(true))
        );
        assert_eq!(metrics.counter_total(metric::REQUESTS), 1);
    }

    #[tokio::test]
    async fn test_stream_error_is_yielded_and_recorded() {
        let (spans, _metrics, interceptor) = setup();
        let items: Vec<Result<StreamChunk, LlmError>> = vec![
            Ok(StreamChunk::Content("partial".into())),
            Err(LlmError::NetworkError("stream reset".into())),
        ];
        let stream = interceptor
            .intercept_stream(CallRequest::new("gpt-4o"), async {
                Ok::<_, LlmError>(stream::iter(items))
            })
            .await
            .unwrap();

        let seen: Vec<_> = stream.collect().await;
        assert!(matches!(seen[1], Err(LlmError::NetworkError(_))));

        let finished = spans.spans();
        assert_eq!(finished.len(), 1);
        assert!(matches!(finished[0].status, Status::Error { .. }));
        assert_eq!(
            find_attribute(&finished[0], semconv::RESPONSE_PARTIAL),
            Some(&Value::Bool(true))
        );
        assert_eq!(
            find_attribute(&finished[0], semconv::ERROR_TYPE),
            Some(&Value::from("LlmError"))
        );
    }

    #[tokio::test]
    async fn test_open_failure_ends_span() {
        let (spans, _metrics, interceptor) = setup();
        let result = interceptor
            .intercept_stream::<stream::Iter<std::vec::IntoIter<Result<StreamChunk, LlmError>>>, _, _, _, _>(
                CallRequest::new("gpt-4o"),
                async { Err(LlmError::AuthError("bad key".into())) },
            )
            .await;
        assert!(matches!(result, Err(LlmError::AuthError(_))));
        assert_eq!(spans.spans().len(), 1);
    }
}
