//! The built-in pricing table. Never fails: an unknown model still gets the
//! closest generic Claude-family rate via the normal resolution order.

use super::{resolve_model, ModelRate, PricingProvider};
use crate::error::MonitorError;
use crate::models::TokenKind;
use std::collections::HashMap;

pub struct DefaultPricingProvider {
    catalog: HashMap<String, ModelRate>,
}

impl Default for DefaultPricingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultPricingProvider {
    pub fn new() -> Self {
        let mut catalog = HashMap::new();

        catalog.insert(
            "claude-opus-4".to_string(),
            ModelRate::with_cache_defaults(15.0, 75.0, Some(18.75), Some(1.50)),
        );
        catalog.insert(
            "claude-sonnet-4".to_string(),
            ModelRate::with_cache_defaults(3.0, 15.0, Some(3.75), Some(0.30)),
        );
        catalog.insert(
            "claude-3-5-sonnet".to_string(),
            ModelRate::with_cache_defaults(3.0, 15.0, Some(3.75), Some(0.30)),
        );
        catalog.insert(
            "claude-3-5-haiku".to_string(),
            ModelRate::with_cache_defaults(0.80, 4.0, Some(1.0), Some(0.08)),
        );
        catalog.insert(
            "claude-3-opus".to_string(),
            ModelRate::with_cache_defaults(15.0, 75.0, Some(18.75), Some(1.50)),
        );
        catalog.insert(
            "claude-3-haiku".to_string(),
            ModelRate::with_cache_defaults(0.25, 1.25, Some(0.30), Some(0.03)),
        );

        // A generic fallback used when no entry, even a substring match,
        // resolves for a model name this table has never seen.
        catalog.insert(
            "unknown".to_string(),
            ModelRate::with_cache_defaults(3.0, 15.0, None, None),
        );

        Self { catalog }
    }
}

impl PricingProvider for DefaultPricingProvider {
    fn name(&self) -> &str {
        "default"
    }

    fn price(&self, model: &str, kind: TokenKind) -> Result<f64, MonitorError> {
        let rate = resolve_model(&self.catalog, model)
            .or_else(|| self.catalog.get("unknown"))
            .ok_or_else(|| MonitorError::PricingNotFound {
                model: model.to_string(),
                kind: kind.as_str().to_string(),
            })?;
        Ok(rate.rate_for(kind))
    }

    fn refresh(&self) -> Result<(), MonitorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_resolves() {
        let provider = DefaultPricingProvider::new();
        let price = provider.price("claude-sonnet-4", TokenKind::Input).unwrap();
        assert_eq!(price, 3.0);
    }

    #[test]
    fn unknown_model_falls_back_rather_than_erroring() {
        let provider = DefaultPricingProvider::new();
        assert!(provider.price("some-future-model", TokenKind::Input).is_ok());
    }

    #[test]
    fn cache_create_defaults_to_1_25x_input_when_absent() {
        let rate = ModelRate::with_cache_defaults(4.0, 20.0, None, None);
        assert_eq!(rate.cache_create_per_million, 5.0);
        assert_eq!(rate.cache_read_per_million, 0.4);
    }

    #[test]
    fn never_fails_even_for_garbage_input() {
        let provider = DefaultPricingProvider::new();
        assert!(provider.price("", TokenKind::Output).is_ok());
    }
}
