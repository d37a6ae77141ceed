//! Model pricing resolution and caching.
//!
//! # Sources
//!
//! | [`PricingSource`] | Resolution |
//! |-------------------|------------|
//! | `Default` | fetch [`DEFAULT_PRICING_URL`] |
//! | `Url` | HTTP GET, body parsed as a pricing document |
//! | `Json` | literal JSON text |
//! | `Value` / `Table` | already parsed, used as-is |
//!
//! # Document Shape
//!
//! ```json
//! {
//!   "chat":       { "gpt-4": { "promptPrice": 0.03, "completionPrice": 0.06 } },
//!   "embeddings": { "text-embedding-3-small": 0.00002 },
//!   "images":     { "dall-e-3": { "standard": { "1024x1024": 0.04 } } },
//!   "audio":      { "tts-1": 0.015 }
//! }
//! ```
//!
//! Prices are per 1000 units. Parsing is lenient: a malformed entry is
//! skipped, the rest of the document is kept.
//!
//! Resolution never fails. Every network or parse failure degrades to an
//! empty [`PricingTable`], which prices every call at zero.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{TelemetryError, TelemetryResult};

/// Public pricing document used when no source is configured.
pub const DEFAULT_PRICING_URL: &str =
    "https://raw.githubusercontent.com/openlit/openlit/main/assets/pricing.json";

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a pricing table comes from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PricingSource {
    /// The built-in remote document.
    #[default]
    Default,
    /// A remote JSON document.
    Url(String),
    /// Literal JSON text.
    Json(String),
    /// An already-parsed JSON document.
    Value(Value),
    /// An already-built table.
    Table(Arc<PricingTable>),
}

impl PricingSource {
    /// Classify user input: an http(s) URL is fetched, anything else is JSON.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        match reqwest::Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(trimmed.to_string()),
            _ => Self::Json(trimmed.to_string()),
        }
    }

    /// Whether resolving this source requires a network fetch.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Default | Self::Url(_))
    }
}

impl From<&str> for PricingSource {
    fn from(input: &str) -> Self {
        Self::from_input(input)
    }
}

impl From<String> for PricingSource {
    fn from(input: String) -> Self {
        Self::from_input(&input)
    }
}

impl From<Value> for PricingSource {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::from_input(&s),
            other => Self::Value(other),
        }
    }
}

impl From<PricingTable> for PricingSource {
    fn from(table: PricingTable) -> Self {
        Self::Table(Arc::new(table))
    }
}

/// Per-1000-token chat prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPrice {
    pub prompt_price: f64,
    pub completion_price: f64,
}

/// Immutable snapshot of model prices.
///
/// A missing model is a normal condition: lookups return `None` and the
/// cost functions price the call at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default)]
    pub chat: HashMap<String, ChatPrice>,
    #[serde(default)]
    pub embeddings: HashMap<String, f64>,
    /// `images[model][quality][size]`
    #[serde(default)]
    pub images: HashMap<String, HashMap<String, HashMap<String, f64>>>,
    #[serde(default)]
    pub audio: HashMap<String, f64>,
}

impl PricingTable {
    /// Build a table from a JSON document, skipping malformed entries.
    pub fn from_value(value: &Value) -> Self {
        let mut table = Self::default();
        let Some(root) = value.as_object() else {
            debug!(kind = json_kind(value), "Pricing document is not an object");
            return table;
        };

        for (model, entry) in section(root, "chat") {
            let prompt = entry.get("promptPrice").and_then(Value::as_f64);
            let completion = entry.get("completionPrice").and_then(Value::as_f64);
            match (prompt, completion) {
                (Some(prompt_price), Some(completion_price)) => {
                    table.chat.insert(
                        model.clone(),
                        ChatPrice {
                            prompt_price,
                            completion_price,
                        },
                    );
                }
                _ => debug!(model = %model, "Skipping malformed chat price entry"),
            }
        }

        for (model, entry) in section(root, "embeddings") {
            match entry.as_f64() {
                Some(price) => {
                    table.embeddings.insert(model.clone(), price);
                }
                None => debug!(model = %model, "Skipping malformed embedding price entry"),
            }
        }

        for (model, qualities) in section(root, "images") {
            let Some(qualities) = qualities.as_object() else {
                debug!(model = %model, "Skipping malformed image price entry");
                continue;
            };
            let mut by_quality = HashMap::new();
            for (quality, sizes) in qualities {
                let Some(sizes) = sizes.as_object() else {
                    debug!(model = %model, quality = %quality, "Skipping malformed image quality entry");
                    continue;
                };
                let by_size: HashMap<String, f64> = sizes
                    .iter()
                    .filter_map(|(size, price)| price.as_f64().map(|p| (size.clone(), p)))
                    .collect();
                by_quality.insert(quality.clone(), by_size);
            }
            table.images.insert(model.clone(), by_quality);
        }

        for (model, entry) in section(root, "audio") {
            match entry.as_f64() {
                Some(price) => {
                    table.audio.insert(model.clone(), price);
                }
                None => debug!(model = %model, "Skipping malformed audio price entry"),
            }
        }

        table
    }

    pub fn chat_price(&self, model: &str) -> Option<ChatPrice> {
        self.chat.get(model).copied()
    }

    pub fn embedding_price(&self, model: &str) -> Option<f64> {
        self.embeddings.get(model).copied()
    }

    pub fn image_price(&self, model: &str, quality: &str, size: &str) -> Option<f64> {
        self.images.get(model)?.get(quality)?.get(size).copied()
    }

    pub fn audio_price(&self, model: &str) -> Option<f64> {
        self.audio.get(model).copied()
    }

    /// True when no section holds any entry.
    pub fn is_empty(&self) -> bool {
        self.chat.is_empty()
            && self.embeddings.is_empty()
            && self.images.is_empty()
            && self.audio.is_empty()
    }

    /// Number of priced models across all sections.
    pub fn model_count(&self) -> usize {
        self.chat.len() + self.embeddings.len() + self.images.len() + self.audio.len()
    }
}

impl FromStr for PricingTable {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)?;
        Ok(Self::from_value(&value))
    }
}

fn section<'a>(
    root: &'a Map<String, Value>,
    name: &str,
) -> impl Iterator<Item = (&'a String, &'a Value)> {
    root.get(name)
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|m| m.iter())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Resolution
// ============================================================================

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Resolve a pricing source into a table.
///
/// Never fails: on any error the result is an empty table.
pub async fn resolve(source: &PricingSource) -> PricingTable {
    try_resolve(&http_client(), source)
        .await
        .unwrap_or_else(|err| {
            warn!(error = %err, "Pricing resolution failed; costs will be reported as 0");
            PricingTable::default()
        })
}

async fn try_resolve(client: &reqwest::Client, source: &PricingSource) -> TelemetryResult<PricingTable> {
    match source {
        PricingSource::Default => fetch(client, DEFAULT_PRICING_URL).await,
        PricingSource::Url(url) => fetch(client, url).await,
        inline => resolve_inline(inline),
    }
}

fn resolve_inline(source: &PricingSource) -> TelemetryResult<PricingTable> {
    match source {
        PricingSource::Json(text) => Ok(text.parse()?),
        PricingSource::Value(value) => Ok(PricingTable::from_value(value)),
        PricingSource::Table(table) => Ok(PricingTable::clone(table)),
        PricingSource::Default | PricingSource::Url(_) => Err(TelemetryError::Pricing(
            "remote pricing source cannot be resolved inline".to_string(),
        )),
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> TelemetryResult<PricingTable> {
    debug!(url = %url, "Fetching pricing table");
    let value: Value = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let table = PricingTable::from_value(&value);
    debug!(url = %url, models = table.model_count(), "Pricing table fetched");
    Ok(table)
}

// ============================================================================
// Cached provider
// ============================================================================

#[derive(Debug, Clone)]
struct Snapshot {
    table: Arc<PricingTable>,
    resolved_at: Option<Instant>,
}

/// Holds the current pricing table and keeps it fresh.
///
/// Readers get an `Arc` to an immutable table; a refresh swaps the pointer
/// whole. Remote sources are refreshed on a background tokio task when the
/// snapshot is older than the refresh interval, so reads never wait on the
/// network.
#[derive(Debug)]
pub struct PricingProvider {
    source: RwLock<PricingSource>,
    snapshot: RwLock<Snapshot>,
    refresh_interval: Duration,
    refreshing: AtomicBool,
    generation: AtomicU64,
    client: reqwest::Client,
}

impl PricingProvider {
    /// Create a provider. Inline sources are resolved immediately; remote
    /// sources start empty and are fetched on first use.
    pub fn new(source: PricingSource, refresh_interval: Duration) -> Self {
        let snapshot = initial_snapshot(&source, None);
        Self {
            source: RwLock::new(source),
            snapshot: RwLock::new(snapshot),
            refresh_interval,
            refreshing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            client: http_client(),
        }
    }

    /// Current table, scheduling a background refresh if it is stale.
    pub fn current(self: &Arc<Self>) -> Arc<PricingTable> {
        if self.is_stale() {
            self.spawn_refresh();
        }
        self.cached()
    }

    /// Current table without any refresh side effect.
    pub fn cached(&self) -> Arc<PricingTable> {
        Arc::clone(&read(&self.snapshot).table)
    }

    pub fn source(&self) -> PricingSource {
        read(&self.source).clone()
    }

    pub fn is_stale(&self) -> bool {
        if !read(&self.source).is_remote() {
            return false;
        }
        match read(&self.snapshot).resolved_at {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Point the provider at a new source.
    ///
    /// Inline sources take effect immediately. For remote sources the old
    /// table keeps serving until the new one is fetched.
    pub fn set_source(&self, source: PricingSource) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let previous = self.cached();
        let snapshot = initial_snapshot(&source, Some(previous));
        *write(&self.source) = source;
        *write(&self.snapshot) = snapshot;
    }

    /// Resolve the source now and swap in the result.
    ///
    /// On failure the last good table is kept and stays stale, so the next
    /// call retries.
    pub async fn refresh(&self) -> Arc<PricingTable> {
        let generation = self.generation.load(Ordering::Acquire);
        let source = self.source();
        match try_resolve(&self.client, &source).await {
            Ok(table) => {
                let table = Arc::new(table);
                // A source swapped mid-fetch wins over this result.
                if self.generation.load(Ordering::Acquire) == generation {
                    *write(&self.snapshot) = Snapshot {
                        table: Arc::clone(&table),
                        resolved_at: Some(Instant::now()),
                    };
                }
                table
            }
            Err(err) => {
                warn!(error = %err, "Pricing refresh failed; keeping previous table");
                self.cached()
            }
        }
    }

    /// Start a background refresh on the current tokio runtime.
    ///
    /// Returns false if a refresh is already running or no runtime is
    /// available.
    pub fn spawn_refresh(self: &Arc<Self>) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No tokio runtime; pricing refresh deferred");
            return false;
        };
        if self.refreshing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let this = Arc::clone(self);
        handle.spawn(async move {
            this.refresh().await;
            this.refreshing.store(false, Ordering::Release);
        });
        true
    }
}

fn initial_snapshot(source: &PricingSource, previous: Option<Arc<PricingTable>>) -> Snapshot {
    if source.is_remote() {
        return Snapshot {
            table: previous.unwrap_or_default(),
            resolved_at: None,
        };
    }
    let table = resolve_inline(source).unwrap_or_else(|err| {
        warn!(error = %err, "Inline pricing document is invalid; costs will be reported as 0");
        PricingTable::default()
    });
    Snapshot {
        table: Arc::new(table),
        resolved_at: Some(Instant::now()),
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
