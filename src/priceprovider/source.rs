//! Single-source provider backed by a periodically refreshed price cache
//!
//! A background loop polls the source for every configured symbol; lookups
//! only read the cache and apply the staleness window.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{ProviderError, SourceError};
use crate::metrics;
use crate::priceprovider::sources::PriceSource;
use crate::priceprovider::PriceProvider;
use crate::shutdown::stopped;
use crate::types::{AssetPair, Price, RawPrice, Symbol, PRICE_TIMEOUT};

/// Refresh cadence and validity policy for a source
#[derive(Debug, Clone, Copy)]
pub struct RefreshConfig {
    /// Time between two fetches
    pub update_interval: Duration,
    /// Upper bound for a single fetch
    pub fetch_timeout: Duration,
    /// Age after which a cached price is reported invalid
    pub price_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(8),
            fetch_timeout: Duration::from_secs(5),
            price_timeout: PRICE_TIMEOUT,
        }
    }
}

type PriceCache = Arc<RwLock<HashMap<Symbol, RawPrice>>>;

pub struct SourcePriceProvider {
    name: String,
    pair_symbols: HashMap<AssetPair, Symbol>,
    prices: PriceCache,
    price_timeout: Duration,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SourcePriceProvider {
    /// Start refreshing `source` for the symbols in `pair_symbols`
    pub fn spawn(
        source: Box<dyn PriceSource>,
        pair_symbols: HashMap<AssetPair, Symbol>,
        config: RefreshConfig,
    ) -> Self {
        let name = source.name().to_string();
        let prices: PriceCache = Arc::new(RwLock::new(HashMap::new()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut symbols: Vec<Symbol> = pair_symbols.values().cloned().collect();
        symbols.sort();
        symbols.dedup();

        info!(component = "source-price-provider", source = %name, symbols = ?symbols, "starting price source");
        let task = tokio::spawn(refresh_loop(
            source,
            symbols,
            prices.clone(),
            config,
            stop_rx,
        ));

        Self {
            name,
            pair_symbols,
            prices,
            price_timeout: config.price_timeout,
            stop_tx,
            task: Some(task),
        }
    }

    fn invalid(&self, pair: &AssetPair) -> Price {
        Price {
            pair: pair.clone(),
            value: 0.0,
            source_name: self.name.clone(),
            valid: false,
        }
    }
}

#[async_trait]
impl PriceProvider for SourcePriceProvider {
    async fn get_price(&self, pair: &AssetPair) -> Price {
        let Some(symbol) = self.pair_symbols.get(pair) else {
            debug!(component = "source-price-provider", source = %self.name, pair = %pair, "pair not supported by source");
            return self.invalid(pair);
        };

        let raw = self
            .prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied();

        match raw {
            Some(raw) => Price {
                pair: pair.clone(),
                value: raw.value,
                source_name: self.name.clone(),
                valid: raw.is_fresh(Utc::now(), self.price_timeout),
            },
            None => {
                debug!(component = "source-price-provider", source = %self.name, symbol = %symbol, "no price fetched yet");
                self.invalid(pair)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| ProviderError::Shutdown(self.name.clone(), e))?;
        }
        Ok(())
    }
}

async fn refresh_loop(
    source: Box<dyn PriceSource>,
    symbols: Vec<Symbol>,
    prices: PriceCache,
    config: RefreshConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let name = source.name().to_string();
    let mut tick = interval(config.update_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stopped(&mut stop_rx) => break,
            _ = tick.tick() => {
                let started = Instant::now();
                let result = match timeout(config.fetch_timeout, source.fetch_prices(&symbols)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(name.clone(), config.fetch_timeout)),
                };

                match result {
                    Ok(fetched) => {
                        let now = Utc::now();
                        let mut cache = prices.write().unwrap_or_else(PoisonError::into_inner);
                        for (symbol, value) in fetched {
                            cache.insert(symbol, RawPrice::new(value, now));
                        }
                        drop(cache);
                        metrics::track_fetch(&name, true, started.elapsed());
                    }
                    Err(e) => {
                        warn!(component = "source-price-provider", source = %name, error = %e, "failed to fetch prices");
                        metrics::track_fetch(&name, false, started.elapsed());
                    }
                }
            }
        }
    }

    debug!(component = "source-price-provider", source = %name, "exited refresh loop");
}
