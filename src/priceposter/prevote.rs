//! Prevote construction - vote strings, salts and commitment hashes

use rust_decimal::prelude::{Decimal, FromPrimitive};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::Price;

/// Bytes of the SHA-256 digest kept in the on-chain commitment
const TRUNCATED_HASH_LEN: usize = 20;
/// Fixed-point decimals the chain uses when rendering rates
const RATE_DECIMALS: usize = 18;

/// Chain-defined commitment over a salted vote
pub trait CommitmentScheme: Send + Sync {
    fn commit(&self, salt: &str, exchange_rates: &str, validator: &str) -> String;
}

/// `hex(sha256("{salt}:{exchange_rates}:{validator}")[..20])`
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncatedSha256;

impl CommitmentScheme for TruncatedSha256 {
    fn commit(&self, salt: &str, exchange_rates: &str, validator: &str) -> String {
        let digest = Sha256::digest(format!("{salt}:{exchange_rates}:{validator}").as_bytes());
        hex::encode(&digest[..TRUNCATED_HASH_LEN])
    }
}

/// Committed prices awaiting their reveal in the next voting period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prevote {
    pub hash: String,
    pub salt: String,
    pub exchange_rates: String,
}

impl Prevote {
    pub fn new(prices: &[Price], validator: &str, scheme: &dyn CommitmentScheme) -> Self {
        let exchange_rates = exchange_rates_string(prices);
        let salt = Uuid::new_v4().to_string();
        let hash = scheme.commit(&salt, &exchange_rates, validator);
        Self {
            hash,
            salt,
            exchange_rates,
        }
    }
}

/// `(pair,rate)` tuples joined by `|`, in the order given
pub fn exchange_rates_string(prices: &[Price]) -> String {
    prices
        .iter()
        .map(|p| format!("({},{})", p.pair, format_rate(p.value)))
        .collect::<Vec<_>>()
        .join("|")
}

fn format_rate(value: f64) -> String {
    let rate = if value.is_finite() {
        Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };
    format!("{:.*}", RATE_DECIMALS, rate)
}
