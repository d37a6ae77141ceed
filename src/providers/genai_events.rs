//! GenAI message payloads for content capture.
//!
//! Captured prompts and completions are serialized in the message shape of
//! the OpenTelemetry GenAI events conventions:
//! <https://opentelemetry.io/docs/specs/semconv/gen-ai/gen-ai-events/>
//!
//! ```json
//! [{"role":"user","content":[{"type":"text","text":"Hello"}]}]
//! ```

use serde::{Deserialize, Serialize};

use crate::extract::Completion;
use crate::traits::ChatMessage;

/// GenAI message part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenAIMessagePart {
    Text { text: String },
}

/// GenAI message following OpenTelemetry schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenAIMessage {
    pub role: String,
    pub content: Vec<GenAIMessagePart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl GenAIMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: vec![GenAIMessagePart::Text {
                text: text.to_string(),
            }],
            index: None,
            finish_reason: None,
        }
    }
}

/// Convert ChatMessage to GenAI message format
pub fn convert_to_genai_messages(messages: &[ChatMessage]) -> Vec<GenAIMessage> {
    messages
        .iter()
        .map(|msg| GenAIMessage::text(msg.role.as_str(), &msg.content))
        .collect()
}

/// One assistant message per completion index.
pub fn convert_completions(completions: &[Completion<'_>]) -> Vec<GenAIMessage> {
    completions
        .iter()
        .map(|completion| GenAIMessage {
            index: Some(completion.index),
            finish_reason: completion.finish_reason.map(str::to_string),
            ..GenAIMessage::text("assistant", completion.content)
        })
        .collect()
}

/// Prompt messages as a JSON string.
pub fn prompt_messages_json(messages: &[ChatMessage]) -> String {
    to_json(&convert_to_genai_messages(messages))
}

/// Completions as a JSON string.
pub fn completion_messages_json(completions: &[Completion<'_>]) -> String {
    to_json(&convert_completions(completions))
}

fn to_json(messages: &[GenAIMessage]) -> String {
    serde_json::to_string(messages).unwrap_or_else(|e| {
        tracing::warn!("Failed to serialize GenAI messages: {}", e);
        String::new()
    })
}
