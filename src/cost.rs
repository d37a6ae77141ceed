//! Cost calculation.
//!
//! One pure function per operation family. Prices come from a
//! [`PricingTable`] and are expressed per 1000 units:
//!
//! | Operation | Formula |
//! |-----------|---------|
//! | Chat | `prompt/1000 * promptPrice + completion/1000 * completionPrice` |
//! | Embedding | `prompt/1000 * price` |
//! | Image | `price[model][quality][size] * count` |
//! | Audio | `input_length/1000 * price` |
//!
//! Every function is total: an unknown model, a missing quality/size, or a
//! non-finite or negative result yields `0.0` and a debug log line.

use tracing::debug;

use crate::pricing::PricingTable;

/// Cost of a chat/completion call in USD.
pub fn chat_cost(
    model: &str,
    pricing: &PricingTable,
    prompt_tokens: u64,
    completion_tokens: u64,
) -> f64 {
    let Some(price) = pricing.chat_price(model) else {
        return unpriced("chat", model);
    };
    let cost = per_thousand(prompt_tokens) * price.prompt_price
        + per_thousand(completion_tokens) * price.completion_price;
    sanitize("chat", model, cost)
}

/// Cost of an embedding call in USD.
pub fn embedding_cost(model: &str, pricing: &PricingTable, prompt_tokens: u64) -> f64 {
    let Some(price) = pricing.embedding_price(model) else {
        return unpriced("embeddings", model);
    };
    sanitize("embeddings", model, per_thousand(prompt_tokens) * price)
}

/// Cost of an image generation call in USD.
pub fn image_cost(
    model: &str,
    pricing: &PricingTable,
    quality: &str,
    size: &str,
    image_count: u64,
) -> f64 {
    let Some(price) = pricing.image_price(model, quality, size) else {
        debug!(model = %model, quality = %quality, size = %size, "No image price; cost is 0");
        return 0.0;
    };
    sanitize("image", model, price * image_count as f64)
}

/// Cost of an audio call in USD. `input_length` is in the unit the provider
/// prices by, usually characters.
pub fn audio_cost(model: &str, pricing: &PricingTable, input_length: u64) -> f64 {
    let Some(price) = pricing.audio_price(model) else {
        return unpriced("audio", model);
    };
    sanitize("audio", model, per_thousand(input_length) * price)
}

/// Format cost in a human-readable way.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("${:.4}", cost)
    } else if cost < 1.0 {
        format!("${:.3}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

fn per_thousand(units: u64) -> f64 {
    units as f64 / 1000.0
}

fn unpriced(operation: &'static str, model: &str) -> f64 {
    debug!(operation, model = %model, "No price for model; cost is 0");
    0.0
}

fn sanitize(operation: &'static str, model: &str, cost: f64) -> f64 {
    if cost.is_finite() && cost >= 0.0 {
        cost
    } else {
        debug!(operation, model = %model, cost, "Invalid computed cost; using 0");
        0.0
    }
}
