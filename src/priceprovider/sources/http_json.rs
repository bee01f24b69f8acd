//! Generic JSON-over-HTTP price source
//!
//! Requests `url` with `{symbol}` substituted and reads the price at a JSON
//! pointer. The price may be a number or a numeric string.

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::SourceError;
use crate::priceprovider::sources::PriceSource;
use crate::types::Symbol;

const SYMBOL_PLACEHOLDER: &str = "{symbol}";

#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    name: String,
    client: Client,
    url_template: String,
    price_pointer: String,
}

impl HttpJsonSource {
    pub fn new(
        name: &str,
        url_template: &str,
        price_pointer: &str,
        request_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| SourceError::Http {
                source_name: name.to_string(),
                error,
            })?;

        Ok(Self {
            name: name.to_string(),
            client,
            url_template: url_template.to_string(),
            price_pointer: price_pointer.to_string(),
        })
    }

    fn url_for(&self, symbol: &str) -> String {
        self.url_template.replace(SYMBOL_PLACEHOLDER, symbol)
    }

    async fn fetch_one(&self, symbol: &str) -> Result<Option<f64>, SourceError> {
        let http_err = |error: reqwest::Error| SourceError::Http {
            source_name: self.name.clone(),
            error,
        };

        let body: Value = self
            .client
            .get(self.url_for(symbol))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?
            .json()
            .await
            .map_err(http_err)?;

        Ok(extract_price(&body, &self.price_pointer))
    }
}

/// Read a positive, finite price at `pointer`
fn extract_price(body: &Value, pointer: &str) -> Option<f64> {
    let value = match body.pointer(pointer)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

#[async_trait]
impl PriceSource for HttpJsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_prices(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, f64>, SourceError> {
        // concurrent so one slow symbol does not hold back the batch
        let results = join_all(symbols.iter().map(|symbol| self.fetch_one(symbol))).await;

        let mut prices = HashMap::with_capacity(symbols.len());
        let mut last_error = None;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(Some(price)) => {
                    prices.insert(symbol.clone(), price);
                }
                Ok(None) => {
                    debug!(source = %self.name, symbol = %symbol, pointer = %self.price_pointer, "no price in response");
                }
                Err(e) => {
                    debug!(source = %self.name, symbol = %symbol, error = %e, "symbol fetch failed");
                    last_error = Some(e);
                }
            }
        }

        if prices.is_empty() && !symbols.is_empty() {
            return Err(last_error.unwrap_or_else(|| SourceError::Empty(self.name.clone())));
        }
        Ok(prices)
    }
}
