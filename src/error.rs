//! Error types.
//!
//! # Error Classes
//!
//! | Class | Type | Surfaced to caller? |
//! |-------|------|---------------------|
//! | Provider call failure | [`LlmError`] (or any `E: std::error::Error`) | Always, unchanged |
//! | Telemetry-internal failure | logged, replaced with defaults | Never |
//! | Configuration failure | [`TelemetryError`] | At setup only |
//!
//! Interceptors are generic over the provider's error type. `LlmError` is the
//! error type of the provider traits shipped in [`crate::traits`]; it is
//! recorded on spans and handed back exactly as the provider produced it.

use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Result type for telemetry setup and lifecycle operations.
pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

/// Errors returned by provider calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// API error from the provider.
    #[error("API error: {0}")]
    ApiError(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Model not found.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Provider-specific error.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Timeout error.
    #[error("Request timed out")]
    Timeout,

    /// Feature not supported.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Unknown error.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_connect() {
            LlmError::NetworkError(format!("Connection failed: {}", err))
        } else {
            LlmError::NetworkError(err.to_string())
        }
    }
}

/// Errors raised while configuring or running the telemetry pipeline itself.
///
/// Only [`TelemetryError::Config`] escapes to callers during normal operation,
/// from [`crate::ExporterBootstrap::setup`] and [`crate::TelemetryConfig::from_env`].
/// The other variants are produced internally and logged.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid configuration or an exporter that could not be built.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Exporter flush or shutdown failure.
    #[error("Exporter error: {0}")]
    Exporter(String),

    /// Pricing table could not be resolved.
    #[error("Pricing error: {0}")]
    Pricing(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display() {
        let error = LlmError::ApiError("something went wrong".to_string());
        assert_eq!(error.to_string(), "API error: something went wrong");

        let error = LlmError::RateLimited("too many requests".to_string());
        assert_eq!(error.to_string(), "Rate limit exceeded: too many requests");

        let error = LlmError::InvalidRequest("bad params".to_string());
        assert_eq!(error.to_string(), "Invalid request: bad params");
    }

    #[test]
    fn test_llm_error_network() {
        let error = LlmError::NetworkError("connection refused".to_string());
        assert_eq!(error.to_string(), "Network error: connection refused");
    }

    #[test]
    fn test_llm_error_timeout() {
        assert_eq!(LlmError::Timeout.to_string(), "Request timed out");
    }

    #[test]
    fn test_llm_error_from_serde_json() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("not json at all").unwrap_err();
        let llm_err: LlmError = json_err.into();
        assert!(matches!(llm_err, LlmError::SerializationError(_)));
    }

    #[test]
    fn test_telemetry_error_display() {
        let error = TelemetryError::Config("bad endpoint".to_string());
        assert_eq!(error.to_string(), "Configuration error: bad endpoint");

        let error = TelemetryError::Exporter("flush failed".to_string());
        assert_eq!(error.to_string(), "Exporter error: flush failed");
    }

    #[test]
    fn test_telemetry_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TelemetryError = json_err.into();
        assert!(matches!(err, TelemetryError::Serialization(_)));
    }
}
