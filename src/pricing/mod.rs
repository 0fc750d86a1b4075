//! `PricingProvider`: resolves (model, token-kind) to a unit price, layered
//! `default -> remote -> cached`, each layer falling back to the one before
//! it.

mod cache;
mod default_provider;
#[cfg(feature = "pricing")]
mod remote;

pub use cache::CachedPricingProvider;
pub use default_provider::DefaultPricingProvider;
#[cfg(feature = "pricing")]
pub use remote::RemotePricingProvider;

use crate::error::MonitorError;
use crate::models::{TokenCounts, TokenKind};

/// Per-million-token prices for one model.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ModelRate {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_create_per_million: f64,
    pub cache_read_per_million: f64,
}

impl ModelRate {
    /// Build a rate from input/output costs alone, defaulting cache-create
    /// to 1.25x input and cache-read to 0.10x input when the source
    /// catalog omits them.
    pub fn with_cache_defaults(
        input_per_million: f64,
        output_per_million: f64,
        cache_create_per_million: Option<f64>,
        cache_read_per_million: Option<f64>,
    ) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cache_create_per_million: cache_create_per_million.unwrap_or(input_per_million * 1.25),
            cache_read_per_million: cache_read_per_million.unwrap_or(input_per_million * 0.10),
        }
    }

    pub fn rate_for(&self, kind: TokenKind) -> f64 {
        match kind {
            TokenKind::Input => self.input_per_million,
            TokenKind::Output => self.output_per_million,
            TokenKind::CacheCreate => self.cache_create_per_million,
            TokenKind::CacheRead => self.cache_read_per_million,
        }
    }
}

/// The capability the core consumes for pricing lookups. `Send + Sync` so
/// the orchestrator and CLI can share one provider behind an `Arc` across
/// the data and UI cadences.
pub trait PricingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// `price(model, kind) -> unit price per million tokens`. Resolution
    /// order: exact match, vendor-prefixed variants, case-insensitive
    /// substring match on keys.
    fn price(&self, model: &str, kind: TokenKind) -> Result<f64, MonitorError>;

    /// Re-fetch the underlying catalog, if this provider has one.
    fn refresh(&self) -> Result<(), MonitorError>;

    /// A point-in-time copy of whatever catalog this provider currently
    /// holds, for the cache layer to persist. Providers with no catalog of
    /// their own (the default table) return an empty map.
    fn snapshot(&self) -> std::collections::HashMap<String, ModelRate> {
        std::collections::HashMap::new()
    }

    /// Total cost for a set of token counts against one model. Missing
    /// prices are treated as zero for that kind rather than failing the
    /// whole calculation — a cost figure is still useful even if one kind
    /// of token has no matching price.
    fn calculate_cost(&self, model: &str, tokens: &TokenCounts) -> f64 {
        TokenKind::ALL
            .iter()
            .map(|&kind| {
                let count = tokens.get(kind);
                if count == 0 {
                    return 0.0;
                }
                let rate = self.price(model, kind).unwrap_or(0.0);
                (count as f64) * rate / 1_000_000.0
            })
            .sum()
    }
}

/// Find a model rate in a catalog using the resolution order: exact,
/// vendor-prefixed, case-insensitive substring.
pub(crate) fn resolve_model<'a>(
    catalog: &'a std::collections::HashMap<String, ModelRate>,
    model: &str,
) -> Option<&'a ModelRate> {
    if let Some(rate) = catalog.get(model) {
        return Some(rate);
    }

    let vendor_prefixed = [
        format!("anthropic/{model}"),
        format!("claude-{model}"),
        format!("vertex_ai/{model}"),
        format!("bedrock/{model}"),
    ];
    for candidate in &vendor_prefixed {
        if let Some(rate) = catalog.get(candidate) {
            return Some(rate);
        }
    }

    let needle = model.to_lowercase();
    catalog
        .iter()
        .find(|(key, _)| key.to_lowercase().contains(&needle) || needle.contains(&key.to_lowercase()))
        .map(|(_, rate)| rate)
}
