//! Aggregate provider - first valid price wins
//!
//! Children are asked in a freshly shuffled order on every lookup so that no
//! single source is favored under rate limiting.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::metrics;
use crate::priceprovider::PriceProvider;
use crate::types::{AssetPair, Price};

pub struct AggregatePriceProvider {
    providers: Vec<Box<dyn PriceProvider>>,
}

impl AggregatePriceProvider {
    pub fn new(providers: Vec<Box<dyn PriceProvider>>) -> Self {
        Self { providers }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn lookup_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.providers.len()).collect();
        order.shuffle(&mut rand::thread_rng());
        order
    }
}

#[async_trait]
impl PriceProvider for AggregatePriceProvider {
    async fn get_price(&self, pair: &AssetPair) -> Price {
        for idx in self.lookup_order() {
            let price = self.providers[idx].get_price(pair).await;
            if price.valid {
                metrics::track_aggregate(&pair.to_string(), &price.source_name, true);
                return price;
            }
            debug!(component = "aggregate-price-provider", pair = %pair, source = %price.source_name, "invalid price, trying next source");
        }

        warn!(component = "aggregate-price-provider", pair = %pair, "no valid price found");
        let missing = Price::missing(pair.clone());
        metrics::track_aggregate(&pair.to_string(), &missing.source_name, false);
        missing
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        let mut failed = 0;
        for provider in self.providers.iter_mut() {
            if let Err(e) = provider.close().await {
                warn!(component = "aggregate-price-provider", error = %e, "failed to close price provider");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(ProviderError::Partial(failed));
        }
        Ok(())
    }
}
