//! Instrumentation registry.
//!
//! Maps a provider identifier to the [`CallInterceptor`]s that wrap its
//! client, and owns the per-provider enable switch.
//!
//! ```text
//! setup(context, disabled, custom)
//!   │
//!   ├─ builtin() + custom  ──► "openai" → {chat, embeddings, images, audio}
//!   │                          "anthropic" → {chat}
//!   │                          ...
//!   │
//!   ├─ attach(id, client)          ──► InstrumentedProvider<C>    (manual)
//!   └─ instrument_registry(reg)    ──► every provider by name()   (auto)
//! ```
//!
//! A provider listed as disabled at setup gets an empty [`InterceptorSet`]:
//! nothing is wrapped and none of its instruments receive data. Disabling
//! at runtime flips a switch shared by every interceptor already handed
//! out for that provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::context::TelemetryContext;
use crate::interceptor::CallInterceptor;
use crate::providers::InstrumentedProvider;
use crate::registry::ProviderRegistry;
use crate::traits::{AudioProvider, EmbeddingProvider, ImageProvider, LLMProvider, QueryEngine};
use crate::usage::OperationKind;

/// Interceptors for one provider, at most one per operation kind.
#[derive(Debug, Clone, Default)]
pub struct InterceptorSet {
    interceptors: HashMap<OperationKind, CallInterceptor>,
}

impl InterceptorSet {
    pub fn get(&self, operation: OperationKind) -> Option<&CallInterceptor> {
        self.interceptors.get(&operation)
    }

    /// Insert an interceptor, replacing any previous one for the same operation.
    pub fn insert(&mut self, interceptor: CallInterceptor) {
        self.interceptors.insert(interceptor.operation(), interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn operations(&self) -> Vec<OperationKind> {
        let mut operations: Vec<_> = self.interceptors.keys().copied().collect();
        operations.sort_by_key(|op| op.as_str());
        operations
    }
}

/// Describes which endpoints of a provider are intercepted.
///
/// The endpoint name doubles as the span name, e.g. `openai.chat.completions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumentation {
    system: String,
    endpoints: Vec<(OperationKind, String)>,
}

/// Lower-case and map `-` to `_`, so `Azure-OpenAI` and `azure_openai` match.
pub fn normalize_provider_id(id: &str) -> String {
    id.trim().to_ascii_lowercase().replace('-', "_")
}

impl Instrumentation {
    pub fn new(system: impl AsRef<str>) -> Self {
        Self {
            system: normalize_provider_id(system.as_ref()),
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, operation: OperationKind, name: impl Into<String>) -> Self {
        self.endpoints.retain(|(op, _)| *op != operation);
        self.endpoints.push((operation, name.into()));
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn endpoints(&self) -> &[(OperationKind, String)] {
        &self.endpoints
    }

    fn chat_and_embeddings(system: &str) -> Self {
        Self::new(system)
            .with_endpoint(OperationKind::Chat, format!("{system}.chat"))
            .with_endpoint(OperationKind::Embedding, format!("{system}.embeddings"))
    }

    fn chat_only(system: &str) -> Self {
        Self::new(system).with_endpoint(OperationKind::Chat, format!("{system}.chat"))
    }

    fn retrieval(system: &str) -> Self {
        Self::new(system).with_endpoint(OperationKind::Retrieval, format!("{system}.query"))
    }

    /// The instrumentations shipped with the crate.
    pub fn builtin() -> Vec<Instrumentation> {
        let mut all = Vec::new();
        for system in ["openai", "azure_openai"] {
            all.push(
                Self::new(system)
                    .with_endpoint(OperationKind::Chat, format!("{system}.chat.completions"))
                    .with_endpoint(OperationKind::Embedding, format!("{system}.embeddings"))
                    .with_endpoint(OperationKind::Image, format!("{system}.images.generate"))
                    .with_endpoint(OperationKind::Audio, format!("{system}.audio.speech")),
            );
        }
        all.push(Self::new("anthropic").with_endpoint(OperationKind::Chat, "anthropic.messages"));
        for system in ["mistral", "cohere", "ollama", "gemini"] {
            all.push(Self::chat_and_embeddings(system));
        }
        for system in ["groq", "bedrock", "huggingface", "openrouter"] {
            all.push(Self::chat_only(system));
        }
        all.push(
            Self::chat_only("xai").with_endpoint(OperationKind::Image, "xai.images.generate"),
        );
        all.push(
            Self::new("elevenlabs")
                .with_endpoint(OperationKind::Audio, "elevenlabs.text_to_speech"),
        );
        all.push(Self::retrieval("llamaindex"));
        all.push(Self::retrieval("langchain"));
        all
    }
}

#[derive(Debug)]
struct Entry {
    instrumentation: Instrumentation,
    enabled: Arc<AtomicBool>,
    interceptors: InterceptorSet,
}

/// Provider id → interceptor set, plus enable/disable per provider.
#[derive(Debug)]
pub struct InstrumentationRegistry {
    context: TelemetryContext,
    entries: HashMap<String, Entry>,
}

impl InstrumentationRegistry {
    /// Build interceptors for the built-in instrumentations plus `custom`.
    ///
    /// A custom instrumentation with the same provider id replaces the
    /// built-in one. Ids in `disabled` are matched after normalization.
    pub fn setup(
        context: TelemetryContext,
        disabled: &[String],
        custom: Vec<Instrumentation>,
    ) -> Self {
        let disabled: Vec<String> = disabled.iter().map(|id| normalize_provider_id(id)).collect();

        let mut registry = Self {
            context,
            entries: HashMap::new(),
        };
        for instrumentation in Instrumentation::builtin().into_iter().chain(custom) {
            let enabled = !disabled.iter().any(|id| id == instrumentation.system());
            registry.insert(instrumentation, enabled);
        }

        let enabled_count = registry
            .entries
            .values()
            .filter(|e| e.enabled.load(Ordering::Acquire))
            .count();
        info!(
            providers = registry.entries.len(),
            enabled = enabled_count,
            disabled = ?disabled,
            "Instrumentation registry ready"
        );

        registry
    }

    /// Add or replace an instrumentation after setup. It starts enabled
    /// unless the provider id appears in the configured disabled list.
    pub fn register(&mut self, instrumentation: Instrumentation) {
        let config = self.context.config();
        let enabled = !config
            .disabled_providers
            .iter()
            .any(|id| normalize_provider_id(id) == instrumentation.system());
        debug!(provider = instrumentation.system(), enabled, "Registering instrumentation");
        self.insert(instrumentation, enabled);
    }

    fn insert(&mut self, instrumentation: Instrumentation, enabled: bool) {
        let enabled = Arc::new(AtomicBool::new(enabled));
        let mut interceptors = InterceptorSet::default();
        for (operation, endpoint) in instrumentation.endpoints() {
            interceptors.insert(
                CallInterceptor::new(
                    self.context.clone(),
                    instrumentation.system(),
                    endpoint.as_str(),
                    *operation,
                )
                .with_switch(Arc::clone(&enabled)),
            );
        }
        self.entries.insert(
            instrumentation.system().to_string(),
            Entry {
                instrumentation,
                enabled,
                interceptors,
            },
        );
    }

    pub fn context(&self) -> &TelemetryContext {
        &self.context
    }

    /// Provider ids known to the registry, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn instrumentation(&self, provider_id: &str) -> Option<&Instrumentation> {
        self.entries
            .get(&normalize_provider_id(provider_id))
            .map(|e| &e.instrumentation)
    }

    /// Returns false for unknown providers.
    pub fn is_enabled(&self, provider_id: &str) -> bool {
        self.entries
            .get(&normalize_provider_id(provider_id))
            .is_some_and(|e| e.enabled.load(Ordering::Acquire))
    }

    /// Re-enable telemetry for a provider. Returns false if it is unknown.
    pub fn enable(&self, provider_id: &str) -> bool {
        self.set_enabled(provider_id, true)
    }

    /// Stop producing telemetry for a provider, including for clients that
    /// were already attached. Returns false if it is unknown.
    pub fn disable(&self, provider_id: &str) -> bool {
        self.set_enabled(provider_id, false)
    }

    fn set_enabled(&self, provider_id: &str, enabled: bool) -> bool {
        match self.entries.get(&normalize_provider_id(provider_id)) {
            Some(entry) => {
                entry.enabled.store(enabled, Ordering::Release);
                info!(provider = provider_id, enabled, "Instrumentation switched");
                true
            }
            None => false,
        }
    }

    /// The interceptors for a provider, or `None` if it is unknown or disabled.
    pub fn interceptors(&self, provider_id: &str) -> Option<&InterceptorSet> {
        self.entries
            .get(&normalize_provider_id(provider_id))
            .filter(|e| e.enabled.load(Ordering::Acquire))
            .map(|e| &e.interceptors)
    }

    /// Wrap one client instance with the interceptors of `provider_id`.
    ///
    /// Unknown or disabled providers come back wrapped in an empty set, so
    /// every call is delegated untouched.
    pub fn attach<P>(&self, provider_id: &str, client: P) -> InstrumentedProvider<P> {
        let interceptors = match self.interceptors(provider_id) {
            Some(set) => set.clone(),
            None => {
                debug!(provider = provider_id, "No active instrumentation, attaching passthrough");
                InterceptorSet::default()
            }
        };
        InstrumentedProvider::new(client, interceptors)
    }

    pub fn instrument_llm(&self, provider: Arc<dyn LLMProvider>) -> Arc<dyn LLMProvider> {
        match self.interceptors(provider.name()) {
            Some(set) => Arc::new(InstrumentedProvider::new(provider, set.clone())),
            None => provider,
        }
    }

    pub fn instrument_embedding(
        &self,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Arc<dyn EmbeddingProvider> {
        match self.interceptors(provider.name()) {
            Some(set) => Arc::new(InstrumentedProvider::new(provider, set.clone())),
            None => provider,
        }
    }

    pub fn instrument_image(&self, provider: Arc<dyn ImageProvider>) -> Arc<dyn ImageProvider> {
        match self.interceptors(provider.name()) {
            Some(set) => Arc::new(InstrumentedProvider::new(provider, set.clone())),
            None => provider,
        }
    }

    pub fn instrument_audio(&self, provider: Arc<dyn AudioProvider>) -> Arc<dyn AudioProvider> {
        match self.interceptors(provider.name()) {
            Some(set) => Arc::new(InstrumentedProvider::new(provider, set.clone())),
            None => provider,
        }
    }

    pub fn instrument_query(&self, engine: Arc<dyn QueryEngine>) -> Arc<dyn QueryEngine> {
        match self.interceptors(engine.name()) {
            Some(set) => Arc::new(InstrumentedProvider::new(engine, set.clone())),
            None => engine,
        }
    }

    /// Rewrap every provider in `registry` whose `name()` has an enabled
    /// instrumentation. Registration names are preserved.
    pub fn instrument_registry(&self, registry: ProviderRegistry) -> ProviderRegistry {
        let ProviderRegistry {
            llm_providers,
            embedding_providers,
            image_providers,
            audio_providers,
            query_engines,
        } = registry;

        ProviderRegistry {
            llm_providers: llm_providers
                .into_iter()
                .map(|(name, p)| (name, self.instrument_llm(p)))
                .collect(),
            embedding_providers: embedding_providers
                .into_iter()
                .map(|(name, p)| (name, self.instrument_embedding(p)))
                .collect(),
            image_providers: image_providers
                .into_iter()
                .map(|(name, p)| (name, self.instrument_image(p)))
                .collect(),
            audio_providers: audio_providers
                .into_iter()
                .map(|(name, p)| (name, self.instrument_audio(p)))
                .collect(),
            query_engines: query_engines
                .into_iter()
                .map(|(name, p)| (name, self.instrument_query(p)))
                .collect(),
        }
    }
}
