//! Mock provider for testing.
//!
//! `MockProvider` implements every provider trait with deterministic
//! behavior:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    MockProvider                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  add_response()   queued answers, then "Mock response"          │
//! │  fail_next()      queued errors, returned before any answer     │
//! │  with_usage()     token counts reported on every chat           │
//! │  with_delay()     latency before each call returns              │
//! │  hanging()        calls never return (cancellation tests)       │
//! │  chat_stream()    Model, one Content per word, Usage, Finished  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex;

use crate::error::{LlmError, Result};
use crate::traits::{
    AudioProvider, AudioResponse, ChatMessage, Choice, CompletionOptions, EmbeddingProvider,
    EmbeddingResponse, GeneratedImage, ImageProvider, ImageRequest, ImageResponse, LLMProvider,
    LLMResponse, QueryEngine, QueryResponse, SourceNode, SpeechRequest, StreamChunk,
};

const DEFAULT_RESPONSE: &str = "Mock response";
const EMBEDDING_DIMENSION: usize = 8;

/// Mock provider for every operation family.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    model: String,
    responses: Arc<Mutex<VecDeque<String>>>,
    failures: Arc<Mutex<VecDeque<LlmError>>>,
    usage: Option<(usize, usize)>,
    delay: Option<Duration>,
    hanging: bool,
    stream_usage: bool,
    stream_error_after: Option<usize>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a mock provider named "mock" serving "mock-model".
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Create a mock that reports `name` as its provider id.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: "mock-model".to_string(),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            usage: None,
            delay: None,
            hanging: false,
            stream_usage: true,
            stream_error_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Report these token counts on chat responses and streams.
    pub fn with_usage(mut self, prompt_tokens: usize, completion_tokens: usize) -> Self {
        self.usage = Some((prompt_tokens, completion_tokens));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls never complete.
    pub fn hanging(mut self) -> Self {
        self.hanging = true;
        self
    }

    /// Whether streams carry a `Usage` chunk.
    pub fn with_stream_usage(mut self, enabled: bool) -> Self {
        self.stream_usage = enabled;
        self
    }

    /// Streams yield an error after `chunks` chunks.
    pub fn with_stream_error_after(mut self, chunks: usize) -> Self {
        self.stream_error_after = Some(chunks);
        self
    }

    /// Add a response to the queue.
    pub async fn add_response(&self, response: impl Into<String>) {
        self.responses.lock().await.push_back(response.into());
    }

    /// Make the next call fail with `error`.
    pub async fn fail_next(&self, error: LlmError) {
        self.failures.lock().await.push_back(error);
    }

    /// Number of calls received, across all operations.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hanging {
            futures::future::pending::<()>().await;
        }
        match self.failures.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn next_response(&self) -> String {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| DEFAULT_RESPONSE.to_string())
    }

    fn chat_usage(&self, messages: &[ChatMessage], content: &str) -> (usize, usize) {
        self.usage.unwrap_or_else(|| {
            let prompt: usize = messages.iter().map(|m| m.content.len()).sum();
            (prompt.div_ceil(4), content.len().div_ceil(4))
        })
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        self.begin_call().await?;
        let content = self.next_response().await;
        let n = options.and_then(|o| o.n).unwrap_or(1).max(1);
        let choices = (0..n)
            .map(|index| Choice {
                index,
                content: if index == 0 {
                    content.clone()
                } else {
                    format!("{content} ({index})")
                },
                finish_reason: Some("stop".to_string()),
            })
            .collect();
        let (prompt, completion) = self.chat_usage(messages, &content);

        Ok(LLMResponse::new(content, self.model.clone())
            .with_choices(choices)
            .with_usage(prompt, completion)
            .with_id(format!("mock-{}", self.call_count())))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        self.begin_call().await?;
        let content = self.next_response().await;
        let (prompt, completion) = self.chat_usage(messages, &content);

        let mut chunks: Vec<Result<StreamChunk>> = vec![Ok(StreamChunk::Model(self.model.clone()))];
        let words: Vec<&str> = content.split_inclusive(' ').collect();
        chunks.extend(
            words
                .into_iter()
                .map(|word| Ok(StreamChunk::Content(word.to_string()))),
        );
        if self.stream_usage {
            chunks.push(Ok(StreamChunk::Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
            }));
        }
        chunks.push(Ok(StreamChunk::Finished {
            reason: "stop".to_string(),
            ttft_ms: None,
        }));
        if let Some(after) = self.stream_error_after {
            chunks.truncate(after);
            chunks.push(Err(LlmError::NetworkError("mock stream interrupted".into())));
        }

        Ok(futures::stream::iter(chunks).boxed())
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        self.begin_call().await?;
        let prompt_tokens = texts.iter().map(|t| t.len().div_ceil(4)).sum();
        Ok(EmbeddingResponse {
            embeddings: vec![vec![0.1; EMBEDDING_DIMENSION]; texts.len()],
            model: self.model.clone(),
            prompt_tokens,
        })
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        self.begin_call().await?;
        let images = (0..request.n)
            .map(|i| GeneratedImage {
                url: Some(format!("https://mock.invalid/image-{i}.png")),
                b64_json: None,
                revised_prompt: Some(request.prompt.clone()),
            })
            .collect();
        Ok(ImageResponse {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            images,
        })
    }
}

#[async_trait]
impl AudioProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn speech(&self, request: &SpeechRequest) -> Result<AudioResponse> {
        self.begin_call().await?;
        Ok(AudioResponse {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            audio: request.input.as_bytes().to_vec(),
            format: request.format.clone(),
        })
    }
}

#[async_trait]
impl QueryEngine for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn query(&self, query: &str) -> Result<QueryResponse> {
        self.begin_call().await?;
        let answer = self.next_response().await;
        Ok(QueryResponse {
            answer,
            sources: vec![
                SourceNode {
                    id: "doc-1".to_string(),
                    text: format!("context for {query}"),
                    score: Some(0.9),
                },
                SourceNode {
                    id: "doc-2".to_string(),
                    text: "more context".to_string(),
                    score: Some(0.7),
                },
            ],
            model: None,
        })
    }
}
