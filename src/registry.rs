//! Provider Registry - named providers per operation family
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ProviderRegistry                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  llm:        name → Arc<dyn LLMProvider>                    │
//! │  embedding:  name → Arc<dyn EmbeddingProvider>              │
//! │  image:      name → Arc<dyn ImageProvider>                  │
//! │  audio:      name → Arc<dyn AudioProvider>                  │
//! │  query:      name → Arc<dyn QueryEngine>                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`crate::InstrumentationRegistry::instrument_registry`] rewraps every
//! provider whose `name()` has an enabled instrumentation, so a registry
//! built by the application can be instrumented in one step.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = ProviderRegistry::new();
//! registry.register_llm("primary", Arc::new(openai_client));
//! let registry = telemetry.registry().instrument_registry(registry);
//!
//! let provider = registry.get_llm("primary").unwrap();
//! let response = provider.chat(&messages, None).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::{AudioProvider, EmbeddingProvider, ImageProvider, LLMProvider, QueryEngine};

/// Providers keyed by registration name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    pub(crate) llm_providers: HashMap<String, Arc<dyn LLMProvider>>,
    pub(crate) embedding_providers: HashMap<String, Arc<dyn EmbeddingProvider>>,
    pub(crate) image_providers: HashMap<String, Arc<dyn ImageProvider>>,
    pub(crate) audio_providers: HashMap<String, Arc<dyn AudioProvider>>,
    pub(crate) query_engines: HashMap<String, Arc<dyn QueryEngine>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("llm", &self.list_llm())
            .field("embedding", &self.list_embedding())
            .field("image", &sorted_keys(&self.image_providers))
            .field("audio", &sorted_keys(&self.audio_providers))
            .field("query", &sorted_keys(&self.query_engines))
            .finish()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an LLM provider
    ///
    /// If a provider with the same name exists, it will be replaced.
    pub fn register_llm(&mut self, name: impl Into<String>, provider: Arc<dyn LLMProvider>) {
        self.llm_providers.insert(name.into(), provider);
    }

    pub fn register_embedding(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn EmbeddingProvider>,
    ) {
        self.embedding_providers.insert(name.into(), provider);
    }

    pub fn register_image(&mut self, name: impl Into<String>, provider: Arc<dyn ImageProvider>) {
        self.image_providers.insert(name.into(), provider);
    }

    pub fn register_audio(&mut self, name: impl Into<String>, provider: Arc<dyn AudioProvider>) {
        self.audio_providers.insert(name.into(), provider);
    }

    pub fn register_query(&mut self, name: impl Into<String>, engine: Arc<dyn QueryEngine>) {
        self.query_engines.insert(name.into(), engine);
    }

    /// Get an LLM provider by name. Returns a clone of the `Arc`.
    pub fn get_llm(&self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.llm_providers.get(name).cloned()
    }

    pub fn get_embedding(&self, name: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        self.embedding_providers.get(name).cloned()
    }

    pub fn get_image(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.image_providers.get(name).cloned()
    }

    pub fn get_audio(&self, name: &str) -> Option<Arc<dyn AudioProvider>> {
        self.audio_providers.get(name).cloned()
    }

    pub fn get_query(&self, name: &str) -> Option<Arc<dyn QueryEngine>> {
        self.query_engines.get(name).cloned()
    }

    /// Registered LLM provider names, sorted.
    pub fn list_llm(&self) -> Vec<String> {
        sorted_keys(&self.llm_providers)
    }

    pub fn list_embedding(&self) -> Vec<String> {
        sorted_keys(&self.embedding_providers)
    }

    pub fn has_llm(&self, name: &str) -> bool {
        self.llm_providers.contains_key(name)
    }

    pub fn has_embedding(&self, name: &str) -> bool {
        self.embedding_providers.contains_key(name)
    }

    pub fn remove_llm(&mut self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.llm_providers.remove(name)
    }

    pub fn remove_embedding(&mut self, name: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        self.embedding_providers.remove(name)
    }

    /// Total number of registered providers across all families.
    pub fn len(&self) -> usize {
        self.llm_providers.len()
            + self.embedding_providers.len()
            + self.image_providers.len()
            + self.audio_providers.len()
            + self.query_engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
