//! Per-call span, cost and metric emission.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  caller              │
//! └─────────┬────────────┘
//!           │ intercept(request, call)
//!           ▼
//! ┌──────────────────────┐     ┌─────────────────────┐
//! │  CallInterceptor     │────►│  span (kind=client) │ active while `call` runs
//! │  • start span        │     └─────────────────────┘
//! │  • await call        │     ┌─────────────────────┐
//! │  • extract + price   │────►│  PricingProvider    │ cached table, never blocks
//! │  • record metrics    │     └─────────────────────┘
//! │  • end span once     │     ┌─────────────────────┐
//! └─────────┬────────────┘────►│  MetricsRegistry    │ skipped when disabled
//!           │                  └─────────────────────┘
//!           ▼
//!   the call's own Result, untouched
//! ```
//!
//! Everything between "await call" and "end span" is telemetry-internal:
//! a panic there is caught and logged and the caller still receives the
//! value or error the call produced.

use std::borrow::Cow;
use std::error::Error;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use opentelemetry::context::FutureExt as _;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Array, Context, KeyValue, StringValue, Value};
use tracing::{debug, warn};

use crate::config::TelemetryConfig;
use crate::context::TelemetryContext;
use crate::extract::ResponseExtractor;
use crate::providers::genai_events;
use crate::semconv;
use crate::streaming::{ChunkExtractor, InstrumentedStream, StreamState};
use crate::traits::CompletionOptions;
use crate::usage::{ImageOptions, OperationKind, UsageRecord};

/// Maximum captured content size, in bytes.
const MAX_CONTENT_BYTES: usize = 10 * 1024;

/// Request-side description of one intercepted call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRequest {
    pub model: String,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Number of results requested (`n`).
    pub choice_count: Option<u64>,
    pub seed: Option<i64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub output_type: Option<String>,
    /// Prompt text. Only recorded when content capture is enabled.
    pub prompt: Option<String>,
    /// Characters of input, used for character-priced calls and for
    /// estimating prompt tokens of streams without reported usage.
    pub input_characters: Option<u64>,
    pub image: Option<ImageOptions>,
    pub voice: Option<String>,
    pub stream: bool,
}

impl CallRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Copy the sampling parameters from chat options.
    pub fn with_options(mut self, options: Option<&CompletionOptions>) -> Self {
        if let Some(options) = options {
            self.max_tokens = options.max_tokens.map(|t| t as u64);
            self.temperature = options.temperature.map(f64::from);
            self.top_p = options.top_p.map(f64::from);
            self.choice_count = options.n.map(|n| n as u64);
            self.seed = options.seed;
            self.frequency_penalty = options.frequency_penalty.map(f64::from);
            self.presence_penalty = options.presence_penalty.map(f64::from);
            self.stop_sequences = options.stop.clone().unwrap_or_default();
            self.output_type = options.response_format.clone();
        }
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_input_characters(mut self, characters: u64) -> Self {
        self.input_characters = Some(characters);
        self
    }

    pub fn with_choice_count(mut self, n: u64) -> Self {
        self.choice_count = Some(n);
        self
    }

    pub fn with_image(mut self, image: ImageOptions) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    fn attributes(&self) -> Vec<KeyValue> {
        let mut attrs = vec![KeyValue::new(semconv::REQUEST_IS_STREAM, self.stream)];
        if let Some(v) = self.max_tokens {
            attrs.push(KeyValue::new(semconv::REQUEST_MAX_TOKENS, v as i64));
        }
        if let Some(v) = self.temperature {
            attrs.push(KeyValue::new(semconv::REQUEST_TEMPERATURE, v));
        }
        if let Some(v) = self.top_p {
            attrs.push(KeyValue::new(semconv::REQUEST_TOP_P, v));
        }
        if let Some(v) = self.choice_count {
            attrs.push(KeyValue::new(semconv::REQUEST_CHOICE_COUNT, v as i64));
        }
        if let Some(v) = self.seed {
            attrs.push(KeyValue::new(semconv::REQUEST_SEED, v));
        }
        if let Some(v) = self.frequency_penalty {
            attrs.push(KeyValue::new(semconv::REQUEST_FREQUENCY_PENALTY, v));
        }
        if let Some(v) = self.presence_penalty {
            attrs.push(KeyValue::new(semconv::REQUEST_PRESENCE_PENALTY, v));
        }
        if !self.stop_sequences.is_empty() {
            let stops: Vec<StringValue> = self
                .stop_sequences
                .iter()
                .map(|s| StringValue::from(s.clone()))
                .collect();
            attrs.push(KeyValue::new(
                semconv::REQUEST_STOP_SEQUENCES,
                Value::Array(Array::String(stops)),
            ));
        }
        if let Some(format) = &self.output_type {
            attrs.push(KeyValue::new(semconv::OUTPUT_TYPE, format.clone()));
        }
        if let Some(image) = &self.image {
            attrs.push(KeyValue::new(semconv::REQUEST_IMAGE_SIZE, image.size.clone()));
            attrs.push(KeyValue::new(
                semconv::REQUEST_IMAGE_QUALITY,
                image.quality.clone(),
            ));
        }
        if let Some(voice) = &self.voice {
            attrs.push(KeyValue::new(semconv::REQUEST_AUDIO_VOICE, voice.clone()));
        }
        attrs
    }
}

/// How a call ended, as far as telemetry is concerned.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallOutcome {
    pub duration: Duration,
    pub time_to_first_chunk: Option<Duration>,
    pub time_per_chunk: Option<Duration>,
    pub partial: bool,
    pub estimated: bool,
    pub error_type: Option<&'static str>,
}

/// Wraps calls to one provider endpoint.
///
/// Cloning is cheap; every clone shares the same context and enabled flag.
#[derive(Debug, Clone)]
pub struct CallInterceptor {
    context: TelemetryContext,
    system: Arc<str>,
    endpoint: Arc<str>,
    operation: OperationKind,
    enabled: Arc<AtomicBool>,
}

impl CallInterceptor {
    /// Create an interceptor for `endpoint` (also the span name) of `system`.
    pub fn new(
        context: TelemetryContext,
        system: impl Into<Arc<str>>,
        endpoint: impl Into<Arc<str>>,
        operation: OperationKind,
    ) -> Self {
        Self {
            context,
            system: system.into(),
            endpoint: endpoint.into(),
            operation,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share an enable switch with other interceptors of the same provider.
    pub(crate) fn with_switch(mut self, enabled: Arc<AtomicBool>) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn context(&self) -> &TelemetryContext {
        &self.context
    }

    /// A disabled interceptor runs calls without producing any telemetry.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn captures_content(&self) -> bool {
        self.context.config().trace_content_capture
    }

    /// Run `call` inside a client span and record its usage, cost and
    /// latency. The call's result is returned exactly as produced.
    pub async fn intercept<T, E, Fut>(&self, request: CallRequest, call: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: ResponseExtractor,
        E: Error,
    {
        if !self.is_enabled() {
            return call.await;
        }

        let config = self.context.config();
        let started = Instant::now();
        let guard = SpanGuard::new(self.start_span(&config, &request));
        let result = call.with_context(guard.cx.clone()).await;
        let duration = started.elapsed();

        match &result {
            Ok(response) => {
                let outcome = CallOutcome {
                    duration,
                    ..Default::default()
                };
                self.record_response(&guard.cx, &config, &request, response, &outcome);
                guard.cx.span().set_status(Status::Ok);
            }
            Err(err) => self.record_failure(&guard.cx, &config, &request, err, duration),
        }
        guard.end();
        result
    }

    /// Open a stream inside a client span. The returned stream finalizes
    /// the span when it completes, fails, or is dropped.
    pub async fn intercept_stream<S, C, SE, E, Fut>(
        &self,
        request: CallRequest,
        open: Fut,
    ) -> Result<InstrumentedStream<S>, E>
    where
        Fut: Future<Output = Result<S, E>>,
        S: Stream<Item = Result<C, SE>>,
        C: ChunkExtractor,
        SE: Error,
        E: Error,
    {
        if !self.is_enabled() {
            return open.await.map(InstrumentedStream::passthrough);
        }

        let request = CallRequest {
            stream: true,
            ..request
        };
        let config = self.context.config();
        let started = Instant::now();
        let guard = SpanGuard::new(self.start_span(&config, &request));

        match open.with_context(guard.cx.clone()).await {
            Ok(stream) => {
                let cx = guard.into_context();
                let state = StreamState::new(self.clone(), cx, config, request, started);
                Ok(InstrumentedStream::new(stream, state))
            }
            Err(err) => {
                self.record_failure(&guard.cx, &config, &request, &err, started.elapsed());
                guard.end();
                Err(err)
            }
        }
    }

    /// Turn `method` into a function with the same arguments and result
    /// that runs through this interceptor. `describe` builds the request
    /// description from the arguments.
    pub fn wrap<D, F>(&self, describe: D, method: F) -> Intercepted<D, F> {
        Intercepted {
            interceptor: self.clone(),
            describe,
            method,
        }
    }

    fn metric_attributes(&self, config: &TelemetryConfig, model: &str) -> Vec<KeyValue> {
        vec![
            KeyValue::new(semconv::SYSTEM, self.system.to_string()),
            KeyValue::new(semconv::OPERATION_NAME, self.operation.as_str()),
            KeyValue::new(semconv::REQUEST_MODEL, model.to_string()),
            KeyValue::new(semconv::DEPLOYMENT_ENVIRONMENT, config.environment.clone()),
            KeyValue::new(semconv::SERVICE_NAME, config.application_name.clone()),
        ]
    }

    fn start_span(&self, config: &TelemetryConfig, request: &CallRequest) -> Context {
        let mut attributes = self.metric_attributes(config, &request.model);
        attributes.push(KeyValue::new(semconv::ENDPOINT, self.endpoint.to_string()));
        attributes.extend(request.attributes());

        let capture = config.trace_content_capture;
        if let (true, Some(prompt)) = (capture, &request.prompt) {
            attributes.push(KeyValue::new(
                semconv::PROMPT,
                truncate_content(prompt).into_owned(),
            ));
        }

        let tracer = self.context.tracer();
        let span = tracer
            .span_builder(self.endpoint.to_string())
            .with_kind(SpanKind::Client)
            .with_attributes(attributes)
            .start(tracer);
        let cx = Context::current_with_span(span);

        if let (true, Some(prompt)) = (capture, &request.prompt) {
            cx.span().add_event(
                semconv::CONTENT_PROMPT_EVENT,
                vec![KeyValue::new(
                    semconv::PROMPT,
                    truncate_content(prompt).into_owned(),
                )],
            );
        }
        cx
    }

    /// Populate response attributes, price the call and record metrics.
    ///
    /// Does not set the span status and does not end the span.
    pub(crate) fn record_response(
        &self,
        cx: &Context,
        config: &TelemetryConfig,
        request: &CallRequest,
        response: &dyn ResponseExtractor,
        outcome: &CallOutcome,
    ) {
        let populated = panic::catch_unwind(AssertUnwindSafe(|| {
            self.populate_response(cx, config, request, response, outcome)
        }));
        if populated.is_err() {
            warn!(
                system = %self.system,
                endpoint = %self.endpoint,
                "Telemetry population panicked; span ends without response attributes"
            );
        }
    }

    fn populate_response(
        &self,
        cx: &Context,
        config: &TelemetryConfig,
        request: &CallRequest,
        response: &dyn ResponseExtractor,
        outcome: &CallOutcome,
    ) {
        let span = cx.span();
        let usage = response.usage();
        let completions = response.completions();
        let finish_reasons: Vec<String> = completions
            .iter()
            .filter_map(|c| c.finish_reason.map(str::to_string))
            .collect();

        let pricing_model = match (request.model.as_str(), response.response_model()) {
            ("", Some(reported)) => reported,
            (requested, _) => requested,
        };
        let mut record = UsageRecord::new(pricing_model, self.operation)
            .with_usage(usage)
            .with_duration(outcome.duration)
            .with_input_characters(request.input_characters.unwrap_or(0))
            .with_image_count(response.image_count())
            .with_finish_reasons(finish_reasons.clone());
        record.partial = outcome.partial;
        record.estimated = outcome.estimated;
        let pricing = self.context.pricing().current();
        record.price(&pricing, request.image.as_ref());

        let mut attrs = Vec::new();
        if let Some(model) = response.response_model() {
            attrs.push(KeyValue::new(semconv::RESPONSE_MODEL, model.to_string()));
        }
        if let Some(id) = response.response_id() {
            attrs.push(KeyValue::new(semconv::RESPONSE_ID, id.to_string()));
        }
        if self.operation != OperationKind::Retrieval {
            attrs.push(KeyValue::new(
                semconv::USAGE_INPUT_TOKENS,
                usage.prompt_tokens as i64,
            ));
            attrs.push(KeyValue::new(
                semconv::USAGE_OUTPUT_TOKENS,
                usage.completion_tokens as i64,
            ));
            attrs.push(KeyValue::new(semconv::USAGE_TOTAL_TOKENS, usage.total() as i64));
            attrs.push(KeyValue::new(semconv::USAGE_COST, record.cost));
        }
        if usage.reasoning_tokens > 0 {
            attrs.push(KeyValue::new(
                semconv::USAGE_REASONING_TOKENS,
                usage.reasoning_tokens as i64,
            ));
        }
        if record.input_characters > 0 {
            attrs.push(KeyValue::new(
                semconv::USAGE_INPUT_CHARACTERS,
                record.input_characters as i64,
            ));
        }
        if record.image_count > 0 {
            attrs.push(KeyValue::new(
                semconv::RESPONSE_IMAGE_COUNT,
                record.image_count as i64,
            ));
        }
        if let Some(documents) = response.document_count() {
            attrs.push(KeyValue::new(
                semconv::RETRIEVAL_DOCUMENT_COUNT,
                documents as i64,
            ));
        }
        if !finish_reasons.is_empty() {
            attrs.push(KeyValue::new(
                semconv::RESPONSE_FINISH_REASONS,
                string_array(&finish_reasons),
            ));
        }
        for completion in &completions {
            if let Some(reason) = completion.finish_reason {
                attrs.push(KeyValue::new(
                    semconv::completion_finish_reason(completion.index),
                    reason.to_string(),
                ));
            }
            if config.trace_content_capture {
                attrs.push(KeyValue::new(
                    semconv::completion_content(completion.index),
                    truncate_content(completion.content).into_owned(),
                ));
            }
        }
        if outcome.partial {
            attrs.push(KeyValue::new(semconv::RESPONSE_PARTIAL, true));
        }
        if outcome.estimated {
            attrs.push(KeyValue::new(semconv::USAGE_ESTIMATED, true));
        }
        if let Some(ttft) = outcome.time_to_first_chunk {
            attrs.push(KeyValue::new(
                semconv::SERVER_TIME_TO_FIRST_TOKEN,
                ttft.as_secs_f64(),
            ));
        }
        if let Some(tpot) = outcome.time_per_chunk {
            attrs.push(KeyValue::new(
                semconv::SERVER_TIME_PER_OUTPUT_TOKEN,
                tpot.as_secs_f64(),
            ));
        }
        if let Some(error_type) = outcome.error_type {
            attrs.push(KeyValue::new(semconv::ERROR_TYPE, error_type));
        }
        span.set_attributes(attrs);

        if config.trace_content_capture && !completions.is_empty() {
            let messages = genai_events::completion_messages_json(&completions);
            span.add_event(
                semconv::CONTENT_COMPLETION_EVENT,
                vec![KeyValue::new(
                    semconv::COMPLETION,
                    truncate_content(&messages).into_owned(),
                )],
            );
        }

        if !config.disable_metrics {
            let mut metric_attrs = self.metric_attributes(config, &request.model);
            if let Some(error_type) = outcome.error_type {
                metric_attrs.push(KeyValue::new(semconv::ERROR_TYPE, error_type));
            }
            let metrics = self.context.metrics();
            metrics.record_usage(&record, &metric_attrs);
            metrics.record_stream_timings(
                outcome.time_to_first_chunk,
                outcome.time_per_chunk,
                &metric_attrs,
            );
        }

        debug!(
            target: "gen_ai.usage",
            system = %self.system,
            endpoint = %self.endpoint,
            model = %record.model,
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            cost = record.cost,
            duration_ms = outcome.duration.as_millis() as u64,
            partial = record.partial,
            "GenAI call completed"
        );
    }

    /// Record a failed call on the span and, when enabled, in metrics.
    pub(crate) fn record_failure<E: Error>(
        &self,
        cx: &Context,
        config: &TelemetryConfig,
        request: &CallRequest,
        err: &E,
        duration: Duration,
    ) {
        let error_type = error_type_name::<E>();
        let span = cx.span();
        span.record_error(err);
        span.set_attribute(KeyValue::new(semconv::ERROR_TYPE, error_type));
        span.set_status(Status::error(err.to_string()));

        if !config.disable_metrics {
            let mut attrs = self.metric_attributes(config, &request.model);
            attrs.push(KeyValue::new(semconv::ERROR_TYPE, error_type));
            let recorded = panic::catch_unwind(AssertUnwindSafe(|| {
                self.context
                    .metrics()
                    .record_failure(self.operation, duration, &attrs)
            }));
            if recorded.is_err() {
                warn!(system = %self.system, "Failure metric recording panicked");
            }
        }

        debug!(
            target: "gen_ai.usage",
            system = %self.system,
            endpoint = %self.endpoint,
            error.type = error_type,
            error = %err,
            "GenAI call failed"
        );
    }
}

/// A provider method bound to a [`CallInterceptor`].
///
/// `call` takes the same arguments and returns the same result as the
/// wrapped method.
pub struct Intercepted<D, F> {
    interceptor: CallInterceptor,
    describe: D,
    method: F,
}

impl<D, F> Intercepted<D, F> {
    pub async fn call<A, Fut, T, E>(&self, args: A) -> Result<T, E>
    where
        D: Fn(&A) -> CallRequest,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: ResponseExtractor,
        E: Error,
    {
        let request = (self.describe)(&args);
        self.interceptor
            .intercept(request, (self.method)(args))
            .await
    }

    pub fn interceptor(&self) -> &CallInterceptor {
        &self.interceptor
    }
}

/// Ends the span exactly once. Dropped without [`SpanGuard::end`] means the
/// caller abandoned the call.
struct SpanGuard {
    cx: Context,
    ended: bool,
}

impl SpanGuard {
    fn new(cx: Context) -> Self {
        Self { cx, ended: false }
    }

    fn end(mut self) {
        self.ended = true;
        self.cx.span().end();
    }

    /// Hand ownership of the span to someone else.
    fn into_context(mut self) -> Context {
        self.ended = true;
        self.cx.clone()
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        let span = self.cx.span();
        span.set_attribute(KeyValue::new(semconv::CALL_CANCELLED, true));
        span.set_status(Status::error("call cancelled before completion"));
        span.end();
    }
}

/// Short type name of an error, for `error.type`.
pub(crate) fn error_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Cut `text` to [`MAX_CONTENT_BYTES`] on a character boundary.
pub(crate) fn truncate_content(text: &str) -> Cow<'_, str> {
    if text.len() <= MAX_CONTENT_BYTES {
        return Cow::Borrowed(text);
    }
    let cut = text
        .char_indices()
        .take_while(|(idx, c)| idx + c.len_utf8() <= MAX_CONTENT_BYTES)
        .last()
        .map(|(idx, c)| idx + c.len_utf8())
        .unwrap_or(0);
    Cow::Owned(format!("{}...[truncated]", &text[..cut]))
}

fn string_array(values: &[String]) -> Value {
    let values: Vec<StringValue> = values.iter().cloned().map(StringValue::from).collect();
    Value::Array(Array::from(values))
}
