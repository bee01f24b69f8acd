//! Configuration management for the price feeder
//!
//! Loads from config files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::eventstream::StreamConfig;
use crate::priceposter::PosterConfig;
use crate::priceprovider::RefreshConfig;
use crate::types::{AssetPair, Symbol, PRICE_TIMEOUT};

/// Environment variable holding the feeder account's hex secret key
pub const PRIVATE_KEY_VAR: &str = "FEEDER_PRIVATE_KEY";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub feeder: FeederConfig,
    pub stream: StreamSettings,
    pub poster: PosterSettings,
    pub provider: ProviderSettings,
    /// Price sources keyed by name
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    /// Tendermint RPC websocket endpoint
    pub websocket_url: String,
    /// REST (LCD) endpoint for params, accounts and broadcasts
    pub lcd_url: String,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeederConfig {
    /// Validator operator address votes are cast for
    pub validator_address: String,
    /// Account signing the vote transactions
    pub feeder_address: String,
    /// Startup aborts when no params arrive within this window
    pub init_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    pub params_poll_interval_secs: u64,
    pub params_query_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PosterSettings {
    pub submit_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub update_interval_secs: u64,
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Source implementation; only `http_json` is built in
    pub kind: String,
    /// URL template, `{symbol}` is replaced per request
    pub url: String,
    /// JSON pointer to the price inside the response body
    pub price_pointer: String,
    /// Chain pair (`base:quote`) to source symbol
    #[serde(default)]
    pub pairs: HashMap<String, Symbol>,
}

impl SourceConfig {
    pub fn pair_symbols(&self) -> Result<HashMap<AssetPair, Symbol>> {
        self.pairs
            .iter()
            .map(|(pair, symbol)| {
                let pair: AssetPair = pair
                    .parse()
                    .with_context(|| format!("Invalid pair '{}' in source config", pair))?;
                Ok((pair, symbol.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEFEEDER__*)
            .add_source(Environment::with_prefix("PRICEFEEDER").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    fn builder() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            // Chain defaults
            .set_default("chain.chain_id", "nibiru-localnet-0")?
            .set_default("chain.websocket_url", "ws://localhost:26657/websocket")?
            .set_default("chain.lcd_url", "http://localhost:1317")?
            .set_default("chain.gas_limit", 200_000)?
            // Feeder defaults
            .set_default("feeder.validator_address", "")?
            .set_default("feeder.feeder_address", "")?
            .set_default("feeder.init_timeout_secs", 15)?
            // Stream defaults
            .set_default("stream.params_poll_interval_secs", 10)?
            .set_default("stream.params_query_timeout_secs", 3)?
            // Poster defaults
            .set_default("poster.submit_timeout_secs", 15)?
            // Provider defaults
            .set_default("provider.update_interval_secs", 8)?
            .set_default("provider.fetch_timeout_secs", 5)?
            // Logging defaults
            .set_default("log.level", "info")?
            .set_default("log.json", false)?
            // Metrics defaults
            .set_default("metrics.enabled", false)?
            .set_default("metrics.listen_addr", "0.0.0.0:3000")?)
    }

    /// Reject configurations the feeder cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.feeder.validator_address.is_empty() {
            bail!("feeder.validator_address must be set");
        }
        if self.feeder.feeder_address.is_empty() {
            bail!("feeder.feeder_address must be set");
        }
        if self.sources.is_empty() {
            bail!("At least one price source must be configured");
        }
        for (name, source) in &self.sources {
            if source.pairs.is_empty() {
                bail!("Source '{}' maps no pairs", name);
            }
            source
                .pair_symbols()
                .with_context(|| format!("Source '{}' is misconfigured", name))?;
        }
        if self.stream.params_poll_interval_secs == 0 || self.provider.update_interval_secs == 0 {
            bail!("Poll intervals must be at least one second");
        }
        Ok(())
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.feeder.init_timeout_secs)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            params_poll_interval: Duration::from_secs(self.stream.params_poll_interval_secs),
            params_query_timeout: Duration::from_secs(self.stream.params_query_timeout_secs),
        }
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            update_interval: Duration::from_secs(self.provider.update_interval_secs),
            fetch_timeout: Duration::from_secs(self.provider.fetch_timeout_secs),
            price_timeout: PRICE_TIMEOUT,
        }
    }

    pub fn poster_config(&self) -> PosterConfig {
        PosterConfig {
            chain_id: self.chain.chain_id.clone(),
            gas_limit: self.chain.gas_limit,
            submit_timeout: Duration::from_secs(self.poster.submit_timeout_secs),
        }
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "chain={} lcd={} validator={} feeder={} sources={:?}",
            self.chain.chain_id,
            self.chain.lcd_url,
            self.feeder.validator_address,
            self.feeder.feeder_address,
            self.sources.keys().collect::<Vec<_>>()
        )
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        let key = std::env::var(PRIVATE_KEY_VAR)
            .with_context(|| format!("Required environment variable {} is not set", PRIVATE_KEY_VAR))?;
        validate_private_key(&key)
    }
}

fn validate_private_key(key: &str) -> Result<()> {
    let hex_part = key.strip_prefix("0x").unwrap_or(key);
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!(
            "{} must be 64 hex characters, optionally prefixed with 0x",
            PRIVATE_KEY_VAR
        );
    }
    Ok(())
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const SOURCES: &str = r#"
[feeder]
validator_address = "nibivaloper1validator"
feeder_address = "nibi1feeder"

[sources.exchange]
kind = "http_json"
url = "https://api.example.com/ticker?symbol={symbol}"
price_pointer = "/price"

[sources.exchange.pairs]
"ubtc:unusd" = "BTCUSDT"
"ueth:unusd" = "ETHUSDT"
"#;

    fn load_from(toml: &str) -> Result<AppConfig> {
        let config = AppConfig::builder()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    #[test]
    fn test_defaults_and_sources() {
        let config = load_from(SOURCES).unwrap();
        assert_eq!(config.chain.gas_limit, 200_000);
        assert_eq!(config.init_timeout(), Duration::from_secs(15));
        assert_eq!(
            config.stream_config().params_poll_interval,
            Duration::from_secs(10)
        );
        assert_eq!(config.poster_config().submit_timeout, Duration::from_secs(15));
        assert_eq!(config.refresh_config().update_interval, Duration::from_secs(8));

        let symbols = config.sources["exchange"].pair_symbols().unwrap();
        assert_eq!(
            symbols.get(&AssetPair::new("ubtc", "unusd")).map(String::as_str),
            Some("BTCUSDT")
        );
        assert!(config.digest().contains("nibivaloper1validator"));
    }

    #[test]
    fn test_rejects_missing_sources() {
        let toml = r#"
[feeder]
validator_address = "nibivaloper1validator"
feeder_address = "nibi1feeder"
"#;
        assert!(load_from(toml).is_err());
    }

    #[test]
    fn test_rejects_bad_pair() {
        let toml = SOURCES.replace("\"ueth:unusd\"", "\"ueth\"");
        assert!(load_from(&toml).is_err());
    }

    #[test]
    fn test_private_key_format() {
        let key = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        assert!(validate_private_key(key).is_ok());
        assert!(validate_private_key(&format!("0x{key}")).is_ok());
        assert!(validate_private_key("0x1234").is_err());
        assert!(validate_private_key(&"zz".repeat(32)).is_err());
    }
}
