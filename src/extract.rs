//! Extraction of telemetry fields from provider responses.
//!
//! [`crate::CallInterceptor`] only sees responses through
//! [`ResponseExtractor`]. Every method has a default, so a response type
//! that cannot report a field simply leaves it out and the interceptor
//! records a default instead.

use crate::traits::{AudioResponse, EmbeddingResponse, ImageResponse, LLMResponse, QueryResponse};
use crate::usage::TokenUsage;

/// One result of a call, by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion<'a> {
    pub index: usize,
    pub content: &'a str,
    pub finish_reason: Option<&'a str>,
}

/// Uniform view over a provider response.
pub trait ResponseExtractor {
    /// Model reported by the provider.
    fn response_model(&self) -> Option<&str> {
        None
    }

    fn response_id(&self) -> Option<&str> {
        None
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage::default()
    }

    /// Per-index results. Content is only read when capture is enabled.
    fn completions(&self) -> Vec<Completion<'_>> {
        Vec::new()
    }

    fn image_count(&self) -> u64 {
        0
    }

    /// Documents returned by a retrieval call.
    fn document_count(&self) -> Option<u64> {
        None
    }
}

impl<T: ResponseExtractor + ?Sized> ResponseExtractor for &T {
    fn response_model(&self) -> Option<&str> {
        (**self).response_model()
    }

    fn response_id(&self) -> Option<&str> {
        (**self).response_id()
    }

    fn usage(&self) -> TokenUsage {
        (**self).usage()
    }

    fn completions(&self) -> Vec<Completion<'_>> {
        (**self).completions()
    }

    fn image_count(&self) -> u64 {
        (**self).image_count()
    }

    fn document_count(&self) -> Option<u64> {
        (**self).document_count()
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

impl ResponseExtractor for LLMResponse {
    fn response_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }

    fn response_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens as u64,
            completion_tokens: self.completion_tokens as u64,
            total_tokens: self.total_tokens as u64,
            reasoning_tokens: self.thinking_tokens.unwrap_or(0) as u64,
        }
    }

    fn completions(&self) -> Vec<Completion<'_>> {
        self.choices
            .iter()
            .map(|choice| Completion {
                index: choice.index,
                content: &choice.content,
                finish_reason: choice.finish_reason.as_deref(),
            })
            .collect()
    }
}

impl ResponseExtractor for EmbeddingResponse {
    fn response_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens as u64, 0)
    }
}

impl ResponseExtractor for ImageResponse {
    fn response_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }

    fn completions(&self) -> Vec<Completion<'_>> {
        self.images
            .iter()
            .enumerate()
            .map(|(index, image)| Completion {
                index,
                content: image
                    .revised_prompt
                    .as_deref()
                    .or(image.url.as_deref())
                    .unwrap_or(""),
                finish_reason: None,
            })
            .collect()
    }

    fn image_count(&self) -> u64 {
        self.images.len() as u64
    }
}

impl ResponseExtractor for AudioResponse {
    fn response_model(&self) -> Option<&str> {
        non_empty(&self.model)
    }
}

impl ResponseExtractor for QueryResponse {
    fn response_model(&self) -> Option<&str> {
        self.model.as_deref().and_then(non_empty)
    }

    fn completions(&self) -> Vec<Completion<'_>> {
        vec![Completion {
            index: 0,
            content: &self.answer,
            finish_reason: None,
        }]
    }

    fn document_count(&self) -> Option<u64> {
        Some(self.sources.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Choice, GeneratedImage, SourceNode};

    #[test]
    fn test_llm_response_extraction() {
        let response = LLMResponse::new("first", "gpt-4o-2024-08-06")
            .with_choices(vec![
                Choice {
                    index: 0,
                    content: "first".into(),
                    finish_reason: Some("stop".into()),
                },
                Choice {
                    index: 1,
                    content: "second".into(),
                    finish_reason: Some("length".into()),
                },
            ])
            .with_usage(12, 30)
            .with_thinking_tokens(8)
            .with_id("resp-1");

        assert_eq!(response.response_model(), Some("gpt-4o-2024-08-06"));
        assert_eq!(response.response_id(), Some("resp-1"));
        let usage = response.usage();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 42);
        assert_eq!(usage.reasoning_tokens, 8);

        let completions = response.completions();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[1].content, "second");
        assert_eq!(completions[1].finish_reason, Some("length"));
    }

    #[test]
    fn test_empty_model_is_absent() {
        let response = LLMResponse::new("x", "");
        assert!(response.response_model().is_none());
        assert!(response.response_id().is_none());
    }

    #[test]
    fn test_image_response_counts_images() {
        let response = ImageResponse {
            model: "dall-e-3".into(),
            images: vec![
                GeneratedImage {
                    url: Some("https://img/1.png".into()),
                    ..Default::default()
                },
                GeneratedImage {
                    revised_prompt: Some("a cat, watercolor".into()),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(response.image_count(), 2);
        assert_eq!(response.completions()[0].content, "https://img/1.png");
        assert_eq!(response.completions()[1].content, "a cat, watercolor");
        assert!(response.usage().is_empty());
    }

    #[test]
    fn test_query_response_documents() {
        let response = QueryResponse {
            answer: "42".into(),
            sources: vec![SourceNode {
                id: "doc-1".into(),
                text: "...".into(),
                score: Some(0.9),
            }],
            model: None,
        };
        assert_eq!(response.document_count(), Some(1));
        assert!(response.response_model().is_none());
        assert_eq!(response.completions()[0].content, "42");
    }

    #[test]
    fn test_reference_delegates() {
        let response = EmbeddingResponse {
            embeddings: vec![vec![0.0; 3]],
            model: "text-embedding-3-small".into(),
            prompt_tokens: 7,
        };
        let by_ref: &dyn ResponseExtractor = &response;
        assert_eq!((&by_ref).usage().prompt_tokens, 7);
        assert_eq!(by_ref.response_model(), Some("text-embedding-3-small"));
    }
}
