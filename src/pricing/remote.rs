//! Fetches the LiteLLM-style model price catalog over HTTP and normalizes
//! its per-token floats to the per-million-token unit the core works in.

use super::{resolve_model, ModelRate, PricingProvider};
use crate::error::MonitorError;
use crate::models::TokenKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct RawModelPrice {
    input_cost_per_token: Option<f64>,
    output_cost_per_token: Option<f64>,
    cache_creation_input_token_cost: Option<f64>,
    cache_read_input_token_cost: Option<f64>,
}

const FETCH_TIMEOUT_SECS: u64 = 30;
const MAX_CONTENT_BYTES: u64 = 5 * 1024 * 1024;

pub struct RemotePricingProvider {
    url: String,
    catalog: RwLock<HashMap<String, ModelRate>>,
}

impl RemotePricingProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            catalog: RwLock::new(HashMap::new()),
        }
    }

    fn fetch_blocking(&self) -> Result<HashMap<String, ModelRate>, MonitorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("quota-monitor")
            .build()
            .map_err(|e| MonitorError::PricingUnavailable {
                provider: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let response = client.get(&self.url).send().map_err(|e| MonitorError::PricingUnavailable {
            provider: self.name().to_string(),
            reason: e.to_string(),
        })?;

        if let Some(len) = response.content_length() {
            if len > MAX_CONTENT_BYTES {
                return Err(MonitorError::PricingUnavailable {
                    provider: self.name().to_string(),
                    reason: format!("catalog too large ({len} bytes)"),
                });
            }
        }

        let raw: HashMap<String, RawModelPrice> = response.json().map_err(|e| MonitorError::PricingUnavailable {
            provider: self.name().to_string(),
            reason: e.to_string(),
        })?;

        let mut catalog = HashMap::with_capacity(raw.len());
        for (model, price) in raw {
            let (Some(input), Some(output)) = (price.input_cost_per_token, price.output_cost_per_token) else {
                continue;
            };
            if !model.starts_with("claude") && !model.contains("claude") {
                continue;
            }
            catalog.insert(
                model,
                ModelRate::with_cache_defaults(
                    input * 1_000_000.0,
                    output * 1_000_000.0,
                    price.cache_creation_input_token_cost.map(|c| c * 1_000_000.0),
                    price.cache_read_input_token_cost.map(|c| c * 1_000_000.0),
                ),
            );
        }

        info!(models = catalog.len(), url = %self.url, "fetched remote pricing catalog");
        Ok(catalog)
    }
}

impl PricingProvider for RemotePricingProvider {
    fn name(&self) -> &str {
        "remote"
    }

    fn price(&self, model: &str, kind: TokenKind) -> Result<f64, MonitorError> {
        let catalog = self.catalog.read().unwrap();
        resolve_model(&catalog, model)
            .map(|rate| rate.rate_for(kind))
            .ok_or_else(|| MonitorError::PricingNotFound {
                model: model.to_string(),
                kind: kind.as_str().to_string(),
            })
    }

    fn refresh(&self) -> Result<(), MonitorError> {
        match self.fetch_blocking() {
            Ok(fresh) => {
                *self.catalog.write().unwrap() = fresh;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "remote pricing refresh failed");
                Err(e)
            }
        }
    }

    fn snapshot(&self) -> HashMap<String, ModelRate> {
        self.catalog.read().unwrap().clone()
    }
}
