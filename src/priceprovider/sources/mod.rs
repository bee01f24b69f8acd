//! Price source implementations

mod http_json;

pub use http_json::HttpJsonSource;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::types::Symbol;

/// Trait for price source clients
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Get the source name
    fn name(&self) -> &str;

    /// Fetch the latest price for each symbol.
    ///
    /// Symbols that could not be priced are left out of the map; an error
    /// means nothing usable came back.
    async fn fetch_prices(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, f64>, SourceError>;
}

/// Build the source described by a `sources.<name>` config entry
pub fn build_source(
    name: &str,
    config: &SourceConfig,
    request_timeout: Duration,
) -> Result<Box<dyn PriceSource>, SourceError> {
    match config.kind.as_str() {
        "http_json" => Ok(Box::new(HttpJsonSource::new(
            name,
            &config.url,
            &config.price_pointer,
            request_timeout,
        )?)),
        other => Err(SourceError::UnknownKind(other.to_string())),
    }
}
