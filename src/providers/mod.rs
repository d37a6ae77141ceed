//! Provider implementations and decorators.

// Telemetry decorator applied by InstrumentationRegistry
pub mod instrumented;
pub use instrumented::InstrumentedProvider;

pub mod mock;
pub use mock::MockProvider;

// GenAI message payloads for captured prompts and completions
pub mod genai_events;
