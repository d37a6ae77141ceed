//! Per-call usage records.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cost;
use crate::pricing::PricingTable;

/// Operation family of an intercepted call. Selects the cost function and
/// the metric instruments used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Chat,
    Embedding,
    Image,
    Audio,
    /// Retrieval or chat-engine query against a non-LLM backend.
    Retrieval,
}

impl OperationKind {
    /// Value of the `gen_ai.operation.name` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embedding => "embeddings",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Retrieval => "retrieve",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts reported (or estimated) for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Reasoning/thinking tokens, already included in `completion_tokens`
    /// for providers that report them that way.
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            reasoning_tokens: 0,
        }
    }

    pub fn with_reasoning_tokens(mut self, reasoning_tokens: u64) -> Self {
        self.reasoning_tokens = reasoning_tokens;
        self
    }

    /// Total tokens, falling back to prompt + completion when the provider
    /// did not report a total.
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

/// Image generation options that select the price row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    pub quality: String,
    pub size: String,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            quality: "standard".to_string(),
            size: "1024x1024".to_string(),
        }
    }
}

/// Usage and cost of a single intercepted call.
///
/// Built by the interceptor after the call returns and dropped once the
/// span and metrics are written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    /// Model used for pricing and metric attributes.
    pub model: String,
    pub operation: OperationKind,
    pub usage: TokenUsage,
    /// Characters of input, for character-priced operations.
    pub input_characters: u64,
    pub image_count: u64,
    /// Calculated cost in USD.
    pub cost: f64,
    pub duration: Duration,
    pub finish_reasons: Vec<String>,
    /// The call ended before the provider finished (stream dropped or failed).
    pub partial: bool,
    /// Token counts were estimated locally.
    pub estimated: bool,
}

impl UsageRecord {
    pub fn new(model: impl Into<String>, operation: OperationKind) -> Self {
        Self {
            model: model.into(),
            operation,
            usage: TokenUsage::default(),
            input_characters: 0,
            image_count: 0,
            cost: 0.0,
            duration: Duration::ZERO,
            finish_reasons: Vec::new(),
            partial: false,
            estimated: false,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_input_characters(mut self, characters: u64) -> Self {
        self.input_characters = characters;
        self
    }

    pub fn with_image_count(mut self, count: u64) -> Self {
        self.image_count = count;
        self
    }

    pub fn with_finish_reasons(mut self, reasons: Vec<String>) -> Self {
        self.finish_reasons = reasons;
        self
    }

    /// Compute and store the cost of this call.
    pub fn price(&mut self, pricing: &PricingTable, image: Option<&ImageOptions>) -> f64 {
        self.cost = match self.operation {
            OperationKind::Chat => chat_like_cost(self, pricing),
            OperationKind::Embedding => {
                cost::embedding_cost(&self.model, pricing, self.usage.prompt_tokens)
            }
            OperationKind::Image => {
                let defaults = ImageOptions::default();
                let options = image.unwrap_or(&defaults);
                cost::image_cost(
                    &self.model,
                    pricing,
                    &options.quality,
                    &options.size,
                    self.image_count,
                )
            }
            OperationKind::Audio => cost::audio_cost(&self.model, pricing, self.input_characters),
            OperationKind::Retrieval => 0.0,
        };
        self.cost
    }
}

fn chat_like_cost(record: &UsageRecord, pricing: &PricingTable) -> f64 {
    cost::chat_cost(
        &record.model,
        pricing,
        record.usage.prompt_tokens,
        record.usage.completion_tokens,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> PricingTable {
        r#"{
            "chat": { "gpt-4o-mini": { "promptPrice": 0.00015, "completionPrice": 0.0006 } },
            "embeddings": { "text-embedding-3-small": 0.00002 },
            "images": { "dall-e-2": { "standard": { "1024x1024": 0.02, "512x512": 0.018 } } },
            "audio": { "tts-1": 0.015 }
        }"#
        .parse()
        .unwrap()
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(OperationKind::Chat.as_str(), "chat");
        assert_eq!(OperationKind::Embedding.to_string(), "embeddings");
        assert_eq!(OperationKind::Retrieval.as_str(), "retrieve");
    }

    #[test]
    fn test_token_usage_total_fallback() {
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 0,
            reasoning_tokens: 0,
        };
        assert_eq!(usage.total(), 15);
        assert_eq!(TokenUsage::new(3, 4).total(), 7);
        assert!(TokenUsage::default().is_empty());
    }

    #[test]
    fn test_price_chat() {
        let mut record = UsageRecord::new("gpt-4o-mini", OperationKind::Chat)
            .with_usage(TokenUsage::new(2000, 1000));
        let cost = record.price(&pricing(), None);
        assert!((cost - 0.0009).abs() < 1e-12);
        assert_eq!(record.cost, cost);
    }

    #[test]
    fn test_price_embedding() {
        let mut record = UsageRecord::new("text-embedding-3-small", OperationKind::Embedding)
            .with_usage(TokenUsage::new(5000, 0));
        assert!((record.price(&pricing(), None) - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn test_price_image_uses_options() {
        let mut record = UsageRecord::new("dall-e-2", OperationKind::Image).with_image_count(2);
        assert!((record.price(&pricing(), None) - 0.04).abs() < 1e-12);

        let small = ImageOptions {
            quality: "standard".into(),
            size: "512x512".into(),
        };
        assert!((record.price(&pricing(), Some(&small)) - 0.036).abs() < 1e-12);
    }

    #[test]
    fn test_price_audio_by_characters() {
        let mut record = UsageRecord::new("tts-1", OperationKind::Audio).with_input_characters(2000);
        assert!((record.price(&pricing(), None) - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_price_retrieval_is_zero() {
        let mut record = UsageRecord::new("index", OperationKind::Retrieval);
        assert_eq!(record.price(&pricing(), None), 0.0);
    }
}
