//! Wraps any provider with an atomic on-disk cache keyed by provider name.
//! In offline mode the cache is authoritative: no refresh is attempted.

use super::{ModelRate, PricingProvider};
use crate::error::MonitorError;
use crate::models::TokenKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CachedCatalog {
    provider: String,
    fetched_at: i64,
    models: HashMap<String, ModelRate>,
}

pub struct CachedPricingProvider<P: PricingProvider> {
    inner: P,
    cache_path: PathBuf,
    offline: bool,
    catalog: RwLock<HashMap<String, ModelRate>>,
}

impl<P: PricingProvider> CachedPricingProvider<P> {
    pub fn new(inner: P, state_root: &std::path::Path, offline: bool) -> Self {
        let cache_path = state_root.join("pricing.json");
        let catalog = load_cache(&cache_path).unwrap_or_default();
        Self {
            inner,
            cache_path,
            offline,
            catalog: RwLock::new(catalog),
        }
    }

    fn write_cache(&self, catalog: &HashMap<String, ModelRate>) {
        let payload = CachedCatalog {
            provider: self.inner.name().to_string(),
            fetched_at: 0,
            models: catalog.clone(),
        };
        if let Err(e) = write_cache_atomic(&self.cache_path, &payload) {
            warn!(error = %e, path = %self.cache_path.display(), "failed to write pricing cache");
        }
    }
}

fn load_cache(path: &std::path::Path) -> Option<HashMap<String, ModelRate>> {
    if !path.exists() {
        debug!(path = %path.display(), "no pricing cache present yet");
        return None;
    }
    let content = std::fs::read_to_string(path).ok()?;
    let cached: CachedCatalog = serde_json::from_str(&content).ok()?;
    info!(models = cached.models.len(), "loaded pricing cache");
    Some(cached.models)
}

fn write_cache_atomic(path: &std::path::Path, payload: &CachedCatalog) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(payload)?;
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

impl<P: PricingProvider> PricingProvider for CachedPricingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn price(&self, model: &str, kind: TokenKind) -> Result<f64, MonitorError> {
        match self.inner.price(model, kind) {
            Ok(price) => Ok(price),
            Err(e) => {
                let catalog = self.catalog.read().unwrap();
                super::resolve_model(&catalog, model)
                    .map(|rate| rate.rate_for(kind))
                    .ok_or(e)
            }
        }
    }

    fn refresh(&self) -> Result<(), MonitorError> {
        if self.offline {
            return Ok(());
        }
        self.inner.refresh()?;
        let fresh = self.inner.snapshot();
        if !fresh.is_empty() {
            self.write_cache(&fresh);
            *self.catalog.write().unwrap() = fresh;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::DefaultPricingProvider;

    #[test]
    fn cache_path_lives_under_state_root() {
        let dir = tempfile::tempdir().unwrap();
        let cached = CachedPricingProvider::new(DefaultPricingProvider::new(), dir.path(), false);
        assert!(cached.cache_path.starts_with(dir.path()));
        assert!(cached.cache_path.ends_with("pricing.json"));
    }

    #[test]
    fn writes_and_reloads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = HashMap::new();
        catalog.insert(
            "claude-sonnet-4".to_string(),
            ModelRate::with_cache_defaults(3.0, 15.0, None, None),
        );
        let cached = CachedPricingProvider::new(DefaultPricingProvider::new(), dir.path(), false);
        cached.write_cache(&catalog);

        let reloaded = load_cache(&cached.cache_path).unwrap();
        assert_eq!(reloaded.get("claude-sonnet-4").unwrap().input_per_million, 3.0);
    }

    #[test]
    fn offline_refresh_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let cached = CachedPricingProvider::new(DefaultPricingProvider::new(), dir.path(), true);
        assert!(cached.refresh().is_ok());
    }
}
