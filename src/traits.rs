//! Provider traits for chat, embedding, image, audio and retrieval calls.
//!
//! # WHY: Trait-Based Provider Abstraction
//!
//! Interception is applied by composition: [`crate::InstrumentedProvider`]
//! implements every trait below by delegating to an inner value of the same
//! trait. Any client that implements these traits can be instrumented
//! without changing its code.
//!
//! # Key Traits
//!
//! - [`LLMProvider`]: chat completion, optionally streamed
//! - [`EmbeddingProvider`]: vector embedding generation
//! - [`ImageProvider`]: image generation
//! - [`AudioProvider`]: text to speech
//! - [`QueryEngine`]: retrieval / chat-engine queries
//!
//! All traits have blanket impls for `Arc<T>` so shared providers can be
//! wrapped directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};

// ============================================================================
// Chat
// ============================================================================

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    /// Convert role to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// One candidate completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub content: String,
    /// Finish reason (e.g., "stop", "length", "content_filter", "tool_calls").
    pub finish_reason: Option<String>,
}

/// Response from a chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    /// Candidates, one per requested completion (`n`).
    pub choices: Vec<Choice>,

    /// Number of tokens in the prompt.
    pub prompt_tokens: usize,

    /// Number of tokens in the completion.
    pub completion_tokens: usize,

    /// Total tokens used.
    pub total_tokens: usize,

    /// Model used for the request.
    pub model: String,

    /// Provider response id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Number of reasoning/thinking tokens used by the model.
    ///
    /// These tokens are billed as output tokens but represent internal
    /// reasoning that precedes the visible response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_tokens: Option<usize>,
}

impl LLMResponse {
    /// Create a single-choice response.
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                index: 0,
                content: content.into(),
                finish_reason: None,
            }],
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            model: model.into(),
            id: None,
            thinking_tokens: None,
        }
    }

    /// Replace the candidate list.
    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }

    /// Set token usage.
    pub fn with_usage(mut self, prompt: usize, completion: usize) -> Self {
        self.prompt_tokens = prompt;
        self.completion_tokens = completion;
        self.total_tokens = prompt + completion;
        self
    }

    /// Set the finish reason of the first choice.
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        if let Some(first) = self.choices.first_mut() {
            first.finish_reason = Some(reason.into());
        }
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the number of reasoning/thinking tokens.
    pub fn with_thinking_tokens(mut self, tokens: usize) -> Self {
        self.thinking_tokens = Some(tokens);
        self
    }

    /// Text of the first choice.
    pub fn content(&self) -> &str {
        self.choices.first().map(|c| c.content.as_str()).unwrap_or("")
    }

    /// Finish reason of the first choice.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

/// Options for chat requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Maximum number of tokens to generate.
    pub max_tokens: Option<usize>,

    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative).
    pub temperature: Option<f32>,

    /// Top-p (nucleus) sampling.
    pub top_p: Option<f32>,

    /// Number of completions to generate.
    pub n: Option<usize>,

    pub seed: Option<i64>,

    /// Stop sequences.
    pub stop: Option<Vec<String>>,

    pub frequency_penalty: Option<f32>,

    pub presence_penalty: Option<f32>,

    /// Response format (e.g., "json").
    pub response_format: Option<String>,
}

/// A chunk of a streamed chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamChunk {
    /// Partial content text.
    Content(String),

    /// Extended thinking/reasoning content.
    ThinkingContent {
        text: String,
        /// Tokens used for this thinking chunk (if provider reports it)
        tokens_used: Option<usize>,
    },

    /// Model reported by the provider, usually on the first chunk.
    Model(String),

    /// Usage reported in-stream, usually on the last chunk.
    Usage {
        prompt_tokens: usize,
        completion_tokens: usize,
    },

    /// Stream finished with reason.
    Finished {
        /// Finish reason (e.g., "stop", "tool_calls", "length").
        reason: String,
        /// Time to first token in milliseconds (if provider reports it).
        ttft_ms: Option<f64>,
    },
}

/// Trait for chat providers.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider id, used to look up its instrumentation.
    fn name(&self) -> &str;

    /// Get the current model.
    fn model(&self) -> &str;

    /// Generate a response for a conversation.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse>;

    /// Single-prompt convenience over [`LLMProvider::chat`].
    async fn complete(&self, prompt: &str) -> Result<LLMResponse> {
        self.chat(&[ChatMessage::user(prompt)], None).await
    }

    /// Stream a response for a conversation.
    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        Err(LlmError::NotSupported("Streaming not supported".to_string()))
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

// ============================================================================
// Embeddings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub prompt_tokens: usize,
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Dimension of the produced vectors.
    fn dimension(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResponse>;
}

// ============================================================================
// Images
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    /// Model override; the provider's default is used when unset.
    pub model: Option<String>,
    pub n: usize,
    pub size: String,
    pub quality: String,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            n: 1,
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_count(mut self, n: usize) -> Self {
        self.n = n;
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = size.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub b64_json: Option<String>,
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub model: String,
    pub images: Vec<GeneratedImage>,
}

/// Trait for image generation providers.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse>;
}

// ============================================================================
// Audio
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub input: String,
    pub voice: String,
    pub model: Option<String>,
    pub format: String,
}

impl SpeechRequest {
    pub fn new(input: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            voice: voice.into(),
            model: None,
            format: "mp3".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioResponse {
    pub model: String,
    pub audio: Vec<u8>,
    pub format: String,
}

/// Trait for text-to-speech providers.
#[async_trait]
pub trait AudioProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn speech(&self, request: &SpeechRequest) -> Result<AudioResponse>;
}

// ============================================================================
// Retrieval
// ============================================================================

/// A document returned by a retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNode {
    pub id: String,
    pub text: String,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceNode>,
    /// Model that synthesized the answer, when one was involved.
    pub model: Option<String>,
}

/// Trait for retrieval / chat-engine backends.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Backend model or index identifier.
    fn model(&self) -> &str;

    async fn query(&self, query: &str) -> Result<QueryResponse>;
}

// ============================================================================
// Arc blanket impls
// ============================================================================

#[async_trait]
impl<T: LLMProvider + ?Sized> LLMProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        (**self).chat(messages, options).await
    }

    async fn complete(&self, prompt: &str) -> Result<LLMResponse> {
        (**self).complete(prompt).await
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        (**self).chat_stream(messages, options).await
    }

    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResponse> {
        (**self).embed(texts).await
    }
}

#[async_trait]
impl<T: ImageProvider + ?Sized> ImageProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        (**self).generate_image(request).await
    }
}

#[async_trait]
impl<T: AudioProvider + ?Sized> AudioProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn speech(&self, request: &SpeechRequest) -> Result<AudioResponse> {
        (**self).speech(request).await
    }
}

#[async_trait]
impl<T: QueryEngine + ?Sized> QueryEngine for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    async fn query(&self, query: &str) -> Result<QueryResponse> {
        (**self).query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_response_builder() {
        let response = LLMResponse::new("hello", "gpt-4o")
            .with_usage(10, 5)
            .with_finish_reason("stop")
            .with_id("chatcmpl-1")
            .with_thinking_tokens(3);

        assert_eq!(response.content(), "hello");
        assert_eq!(response.finish_reason(), Some("stop"));
        assert_eq!(response.total_tokens, 15);
        assert_eq!(response.id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(response.thinking_tokens, Some(3));
    }

    #[test]
    fn test_llm_response_empty_choices() {
        let response = LLMResponse::new("x", "m").with_choices(Vec::new());
        assert_eq!(response.content(), "");
        assert!(response.finish_reason().is_none());
    }

    #[test]
    fn test_chat_role_serialization() {
        let json = serde_json::to_string(&ChatMessage::system("be brief")).unwrap();
        assert!(json.contains(r#""role":"system""#));
        assert!(!json.contains("name"));
    }

    #[test]
    fn test_image_request_defaults() {
        let request = ImageRequest::new("a cat").with_count(2).with_quality("hd");
        assert_eq!(request.n, 2);
        assert_eq!(request.size, "1024x1024");
        assert_eq!(request.quality, "hd");
        assert!(request.model.is_none());
    }

    #[test]
    fn test_completion_options_default_is_empty() {
        let options = CompletionOptions::default();
        assert!(options.stop.is_none());
        assert!(options.response_format.is_none());
        assert!(options.n.is_none());
    }
}
