//! Pricefeeder daemon entry point

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pricefeeder::config::{AppConfig, LogConfig, PRIVATE_KEY_VAR};
use pricefeeder::eventstream::Stream;
use pricefeeder::feeder::Feeder;
use pricefeeder::priceposter::{Client, LocalKeySigner, RestChainClient};
use pricefeeder::priceprovider::sources::build_source;
use pricefeeder::priceprovider::{AggregatePriceProvider, PriceProvider, SourcePriceProvider};

/// Request timeout for node REST calls; the submit timeout bounds the whole post
const CHAIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.log);

    info!(version = env!("CARGO_PKG_VERSION"), config = %config, "starting pricefeeder");
    config.validate_env()?;

    if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .listen_addr
            .parse()
            .context("Invalid metrics.listen_addr")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let provider = build_provider(&config)?;

    let stream = Stream::dial(
        &config.chain.websocket_url,
        &config.chain.lcd_url,
        config.stream_config(),
    )
    .context("Failed to set up chain event stream")?;

    let private_key = std::env::var(PRIVATE_KEY_VAR)
        .with_context(|| format!("{} is not set", PRIVATE_KEY_VAR))?;
    let signer = LocalKeySigner::from_hex(&private_key).context("Invalid feeder private key")?;
    let chain = RestChainClient::new(&config.chain.lcd_url, CHAIN_REQUEST_TIMEOUT)
        .context("Failed to build chain client")?;
    let poster = Client::new(
        &config.feeder.validator_address,
        &config.feeder.feeder_address,
        chain,
        signer,
        config.poster_config(),
    );

    let handle = Feeder::run(
        Box::new(stream),
        Box::new(provider),
        Box::new(poster),
        config.init_timeout(),
    )
    .await
    .context("Feeder failed to start")?;

    info!("pricefeeder running, press Ctrl+C to stop");
    wait_for_shutdown().await;

    info!("shutting down");
    handle.close().await;
    info!("shutdown complete");
    Ok(())
}

fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_provider(config: &AppConfig) -> Result<AggregatePriceProvider> {
    let refresh = config.refresh_config();
    let mut providers: Vec<Box<dyn PriceProvider>> = Vec::with_capacity(config.sources.len());

    for (name, source_config) in &config.sources {
        let source = build_source(name, source_config, refresh.fetch_timeout)
            .with_context(|| format!("Failed to build price source '{}'", name))?;
        let pair_symbols = source_config.pair_symbols()?;
        providers.push(Box::new(SourcePriceProvider::spawn(
            source,
            pair_symbols,
            refresh,
        )));
    }

    let aggregate = AggregatePriceProvider::new(providers);
    info!(sources = aggregate.len(), "price providers started");
    Ok(aggregate)
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!(error = %e, "failed to listen for ctrl-c");
                        }
                    }
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
}
