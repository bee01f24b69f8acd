//! Error types for the feeder components

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("vote period must be at least one block")]
    ZeroVotePeriod,
    #[error("invalid asset pair '{0}', expected base:quote")]
    InvalidPair(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed chain message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message carries no block")]
    NotABlock,
    #[error("invalid block height {0}")]
    InvalidHeight(u64),
    #[error("params query failed: {0}")]
    ParamsQuery(#[from] reqwest::Error),
    #[error("params query returned status {0}")]
    ParamsStatus(u16),
    #[error("params query timed out after {0:?}")]
    ParamsTimeout(Duration),
    #[error("invalid params: {0}")]
    InvalidParams(#[from] ParamsError),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_name}: http request failed: {error}")]
    Http {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("{0}: no prices returned")]
    Empty(String),
    #[error("{0}: fetch timed out after {1:?}")]
    Timeout(String, Duration),
    #[error("unknown source kind '{0}'")]
    UnknownKind(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}: refresh task failed to stop: {1}")]
    Shutdown(String, #[source] tokio::task::JoinError),
    #[error("{0} provider(s) failed to close")]
    Partial(usize),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("node returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum SignError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("sign doc encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Any reason a submission did not land; the pending prevote is kept
#[derive(Debug, Error)]
pub enum PostError {
    #[error("submission timed out after {0:?}")]
    Timeout(Duration),
    #[error("account query failed: {0}")]
    Account(#[source] ChainError),
    #[error("signing failed: {0}")]
    Sign(#[from] SignError),
    #[error("broadcast failed: {0}")]
    Broadcast(#[source] ChainError),
    #[error("tx {txhash} rejected with code {code}: {raw_log}")]
    Rejected {
        txhash: String,
        code: u32,
        raw_log: String,
    },
}

#[derive(Debug, Error)]
pub enum FeederError {
    #[error("no oracle params received within {0:?}")]
    InitTimeout(Duration),
    #[error("event stream closed before params were received")]
    StreamClosed,
}
