//! Attribute keys and metric names emitted by every interceptor.
//!
//! Keys follow the OpenTelemetry GenAI semantic conventions where one exists:
//! <https://opentelemetry.io/docs/specs/semconv/gen-ai/gen-ai-spans/>
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | gen_ai.system | Provider id (openai, anthropic, ...) |
//! | gen_ai.operation.name | "chat", "embeddings", "image", "audio", "retrieve" |
//! | gen_ai.endpoint | Intercepted method, also the span name |
//! | gen_ai.request.model | Requested model name |
//! | gen_ai.response.model | Model reported by the provider |
//! | gen_ai.usage.* | Token counts and cost |
//! | gen_ai.response.finish_reasons | Finish reason array |
//!
//! The set is versioned as a whole. Renaming or removing a key bumps
//! [`ATTRIBUTE_SET_VERSION`].

/// Version of the attribute set below.
pub const ATTRIBUTE_SET_VERSION: i64 = 1;

/// Resource attribute carrying [`ATTRIBUTE_SET_VERSION`].
pub const ATTRIBUTE_SET_VERSION_KEY: &str = "genai_lens.attributes.version";

/// Instrumentation scope name for the tracer and meter.
pub const INSTRUMENTATION_SCOPE: &str = "genai-lens";

// ============================================================================
// Request attributes
// ============================================================================

/// The name of the GenAI system (provider).
pub const SYSTEM: &str = "gen_ai.system";
/// The name of the operation being performed.
pub const OPERATION_NAME: &str = "gen_ai.operation.name";
/// The intercepted provider method.
pub const ENDPOINT: &str = "gen_ai.endpoint";
/// Deployment environment.
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
/// Application name.
pub const SERVICE_NAME: &str = "service.name";
/// The requested model name.
pub const REQUEST_MODEL: &str = "gen_ai.request.model";
/// Maximum tokens to generate.
pub const REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";
/// Temperature for generation.
pub const REQUEST_TEMPERATURE: &str = "gen_ai.request.temperature";
/// Top-p sampling parameter.
pub const REQUEST_TOP_P: &str = "gen_ai.request.top_p";
/// Number of completions requested (`n`).
pub const REQUEST_CHOICE_COUNT: &str = "gen_ai.request.choice.count";
pub const REQUEST_SEED: &str = "gen_ai.request.seed";
pub const REQUEST_FREQUENCY_PENALTY: &str = "gen_ai.request.frequency_penalty";
pub const REQUEST_PRESENCE_PENALTY: &str = "gen_ai.request.presence_penalty";
/// Stop sequences, as a string array.
pub const REQUEST_STOP_SEQUENCES: &str = "gen_ai.request.stop_sequences";
/// Requested output format (`json_object`, `text`, ...).
pub const OUTPUT_TYPE: &str = "gen_ai.output.type";
pub const REQUEST_IS_STREAM: &str = "gen_ai.request.is_stream";
pub const REQUEST_IMAGE_SIZE: &str = "gen_ai.request.image_size";
pub const REQUEST_IMAGE_QUALITY: &str = "gen_ai.request.image_quality";
pub const REQUEST_AUDIO_VOICE: &str = "gen_ai.request.audio_voice";

// ============================================================================
// Response attributes
// ============================================================================

/// The actual model used in response.
pub const RESPONSE_MODEL: &str = "gen_ai.response.model";
pub const RESPONSE_ID: &str = "gen_ai.response.id";
/// Finish reasons array.
pub const RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";
pub const RESPONSE_IMAGE_COUNT: &str = "gen_ai.response.image_count";
/// Set when a stream ended before the provider finished it.
pub const RESPONSE_PARTIAL: &str = "gen_ai.response.partial";
pub const RETRIEVAL_DOCUMENT_COUNT: &str = "gen_ai.retrieval.document_count";

// ============================================================================
// Usage attributes
// ============================================================================

/// Input/prompt token count.
pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
/// Output/completion token count.
pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
pub const USAGE_TOTAL_TOKENS: &str = "gen_ai.usage.total_tokens";
/// Number of reasoning/thinking tokens used by the model.
pub const USAGE_REASONING_TOKENS: &str = "gen_ai.usage.reasoning_tokens";
/// Characters of input, for character-priced operations (audio).
pub const USAGE_INPUT_CHARACTERS: &str = "gen_ai.usage.input_characters";
/// Cost of the call in USD.
pub const USAGE_COST: &str = "gen_ai.usage.cost";
/// Token counts were estimated rather than reported by the provider.
pub const USAGE_ESTIMATED: &str = "gen_ai.usage.estimated";

// ============================================================================
// Streaming, content, failure
// ============================================================================

pub const SERVER_TIME_TO_FIRST_TOKEN: &str = "gen_ai.server.time_to_first_token";
pub const SERVER_TIME_PER_OUTPUT_TOKEN: &str = "gen_ai.server.time_per_output_token";

/// Prompt text (content capture only).
pub const PROMPT: &str = "gen_ai.prompt";
pub const CONTENT_PROMPT_EVENT: &str = "gen_ai.content.prompt";
pub const CONTENT_COMPLETION_EVENT: &str = "gen_ai.content.completion";
pub const COMPLETION: &str = "gen_ai.completion";

pub const ERROR_TYPE: &str = "error.type";
pub const CALL_CANCELLED: &str = "gen_ai.call.cancelled";
pub const TOKEN_TYPE: &str = "gen_ai.token.type";

/// `gen_ai.completion.{index}.content`
pub fn completion_content(index: usize) -> String {
    format!("{COMPLETION}.{index}.content")
}

/// `gen_ai.completion.{index}.finish_reason`
pub fn completion_finish_reason(index: usize) -> String {
    format!("{COMPLETION}.{index}.finish_reason")
}

/// Metric instrument names.
pub mod metric {
    pub const REQUESTS: &str = "gen_ai.client.requests";
    pub const INPUT_TOKENS: &str = "gen_ai.client.usage.input_tokens";
    pub const OUTPUT_TOKENS: &str = "gen_ai.client.usage.output_tokens";
    pub const TOTAL_TOKENS: &str = "gen_ai.client.usage.total_tokens";
    pub const REASONING_TOKENS: &str = "gen_ai.client.usage.reasoning_tokens";
    pub const TOKEN_USAGE: &str = "gen_ai.client.token.usage";
    pub const COST: &str = "gen_ai.client.usage.cost";
    pub const OPERATION_DURATION: &str = "gen_ai.client.operation.duration";
    pub const TIME_TO_FIRST_TOKEN: &str = "gen_ai.server.time_to_first_token";
    pub const TIME_PER_OUTPUT_TOKEN: &str = "gen_ai.server.time_per_output_token";
    pub const BACKEND_OPERATION_DURATION: &str = "db.client.operation.duration";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genai_attrs_constants() {
        assert_eq!(OPERATION_NAME, "gen_ai.operation.name");
        assert_eq!(SYSTEM, "gen_ai.system");
        assert_eq!(REQUEST_MODEL, "gen_ai.request.model");
        assert_eq!(RESPONSE_MODEL, "gen_ai.response.model");
        assert_eq!(USAGE_INPUT_TOKENS, "gen_ai.usage.input_tokens");
        assert_eq!(USAGE_OUTPUT_TOKENS, "gen_ai.usage.output_tokens");
        assert_eq!(RESPONSE_FINISH_REASONS, "gen_ai.response.finish_reasons");
        assert_eq!(USAGE_REASONING_TOKENS, "gen_ai.usage.reasoning_tokens");
    }

    #[test]
    fn test_indexed_completion_keys() {
        assert_eq!(completion_content(0), "gen_ai.completion.0.content");
        assert_eq!(completion_finish_reason(2), "gen_ai.completion.2.finish_reason");
    }
}
