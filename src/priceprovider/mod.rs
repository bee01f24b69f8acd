//! Price providers - per-source price caches and the fail-over aggregate
//!
//! Every provider absorbs its own failures: a missing, stale or unreachable
//! price comes back as `valid = false`, never as an error.

mod aggregate;
mod source;
pub mod sources;

pub use aggregate::AggregatePriceProvider;
pub use source::{RefreshConfig, SourcePriceProvider};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{AssetPair, Price};

/// Anything that can quote a price for an asset pair
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Price for `pair`; never blocks indefinitely and never fails
    async fn get_price(&self, pair: &AssetPair) -> Price;

    /// Stop background work and release connections
    async fn close(&mut self) -> Result<(), ProviderError>;
}
