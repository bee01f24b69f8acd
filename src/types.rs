//! Core types used throughout the price feeder
//!
//! Defines asset pairs, oracle params, voting periods and prices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ParamsError, StreamError};

/// How long a fetched price stays valid
pub const PRICE_TIMEOUT: Duration = Duration::from_secs(15);

/// Source name reported when no provider had a valid price
pub const MISSING_SOURCE: &str = "missing";

/// Source-specific ticker (e.g. "BTCUSDT")
pub type Symbol = String;

/// Base/quote asset pair in the chain's `base:quote` notation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetPair {
    base: String,
    quote: String,
}

impl AssetPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base, self.quote)
    }
}

impl FromStr for AssetPair {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ParamsError::InvalidPair(s.to_string()))?;
        if base.is_empty() || quote.is_empty() || quote.contains(':') {
            return Err(ParamsError::InvalidPair(s.to_string()));
        }
        Ok(Self::new(base, quote))
    }
}

impl Serialize for AssetPair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AssetPair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Oracle module parameters relevant to the feeder.
///
/// Immutable once built; an update replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Params {
    pairs: Vec<AssetPair>,
    vote_period_blocks: u64,
}

impl Params {
    pub fn new(pairs: Vec<AssetPair>, vote_period_blocks: u64) -> Result<Self, ParamsError> {
        if vote_period_blocks == 0 {
            return Err(ParamsError::ZeroVotePeriod);
        }
        Ok(Self {
            pairs,
            vote_period_blocks,
        })
    }

    /// Pairs to vote on, in submission order
    pub fn pairs(&self) -> &[AssetPair] {
        &self.pairs
    }

    pub fn vote_period_blocks(&self) -> u64 {
        self.vote_period_blocks
    }

    /// True when the block after `height` opens a new voting period
    pub fn is_voting_period_start(&self, height: u64) -> bool {
        height
            .checked_add(1)
            .is_some_and(|next| next % self.vote_period_blocks == 0)
    }
}

/// Signal that a voting period starts at `height`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VotingPeriod {
    pub height: u64,
}

/// Price as submitted to the chain.
///
/// An invalid price is posted as an abstain vote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Price {
    pub pair: AssetPair,
    pub value: f64,
    pub source_name: String,
    pub valid: bool,
}

impl Price {
    /// Sentinel returned when no source has a valid price
    pub fn missing(pair: AssetPair) -> Self {
        Self {
            pair,
            value: 0.0,
            source_name: MISSING_SOURCE.to_string(),
            valid: false,
        }
    }

    /// Zero the value, keeping pair and source metadata
    pub fn abstain(mut self) -> Self {
        self.value = 0.0;
        self
    }
}

/// Price as fetched from a source, before the staleness check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPrice {
    pub value: f64,
    pub fetched_at: DateTime<Utc>,
}

impl RawPrice {
    pub fn new(value: f64, fetched_at: DateTime<Utc>) -> Self {
        Self { value, fetched_at }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match (now - self.fetched_at).to_std() {
            Ok(age) => age < timeout,
            // fetched_at in the future: clock skew, still fresh
            Err(_) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BlockEvent {
    result: BlockEventResult,
}

#[derive(Debug, Deserialize)]
struct BlockEventResult {
    data: Option<BlockEventData>,
}

#[derive(Debug, Deserialize)]
struct BlockEventData {
    value: BlockEventValue,
}

#[derive(Debug, Deserialize)]
struct BlockEventValue {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    #[serde(deserialize_with = "u64_from_str_or_int")]
    height: u64,
}

/// Extract the block height from a Tendermint `NewBlock` event message
pub fn block_height(msg: &[u8]) -> Result<u64, StreamError> {
    let event: BlockEvent = serde_json::from_slice(msg)?;
    let height = event
        .result
        .data
        .ok_or(StreamError::NotABlock)?
        .value
        .block
        .header
        .height;
    if height == 0 {
        return Err(StreamError::InvalidHeight(height));
    }
    Ok(height)
}

/// Accept u64 values encoded either as JSON numbers or strings
pub(crate) fn u64_from_str_or_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
