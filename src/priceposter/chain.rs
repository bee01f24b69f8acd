//! Oracle messages, transaction envelope and the node client used to post them
//!
//! Transactions use the legacy amino-JSON envelope: a sign doc with sorted
//! keys is signed and broadcast through the node's REST `/txs` endpoint.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ChainError, SignError};
use crate::types::u64_from_str_or_int;

const ACCOUNTS_PATH: &str = "/cosmos/auth/v1beta1/accounts";
const BROADCAST_PATH: &str = "/txs";
const SECP256K1_PUBKEY_TYPE: &str = "tendermint/PubKeySecp256k1";

/// Oracle module messages; field order is the sorted amino order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum OracleMsg {
    /// Reveal of the previous period's prevote
    #[serde(rename = "oracle/MsgAggregateExchangeRateVote")]
    AggregateVote {
        exchange_rates: String,
        feeder: String,
        salt: String,
        validator: String,
    },
    /// Commitment for the current period
    #[serde(rename = "oracle/MsgAggregateExchangeRatePrevote")]
    AggregatePrevote {
        feeder: String,
        hash: String,
        validator: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coin {
    pub amount: String,
    pub denom: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fee {
    pub amount: Vec<Coin>,
    pub gas: String,
}

impl Fee {
    /// Oracle votes are exempt from fees, only gas is declared
    pub fn gas_only(gas_limit: u64) -> Self {
        Self {
            amount: Vec::new(),
            gas: gas_limit.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignDoc<'a> {
    pub account_number: String,
    pub chain_id: &'a str,
    pub fee: &'a Fee,
    pub memo: &'a str,
    pub msgs: &'a [OracleMsg],
    pub sequence: String,
}

impl SignDoc<'_> {
    pub fn to_sign_bytes(&self) -> Result<Vec<u8>, SignError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PubKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdSignature {
    pub pub_key: PubKey,
    pub signature: String,
}

impl StdSignature {
    pub fn secp256k1(public_key: &[u8], signature: &[u8]) -> Self {
        Self {
            pub_key: PubKey {
                key_type: SECP256K1_PUBKEY_TYPE.to_string(),
                value: general_purpose::STANDARD.encode(public_key),
            },
            signature: general_purpose::STANDARD.encode(signature),
        }
    }
}

/// Signed transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StdTx {
    pub msg: Vec<OracleMsg>,
    pub fee: Fee,
    pub signatures: Vec<StdSignature>,
    pub memo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Account {
    #[serde(deserialize_with = "u64_from_str_or_int")]
    pub account_number: u64,
    #[serde(deserialize_with = "u64_from_str_or_int")]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TxResponse {
    pub txhash: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
}

/// Node operations the poster depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account number and current sequence of `address`
    async fn account(&self, address: &str) -> Result<Account, ChainError>;

    /// Submit a signed transaction; a non-zero `code` means rejection
    async fn broadcast(&self, tx: StdTx) -> Result<TxResponse, ChainError>;
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: Account,
}

#[derive(Debug, Serialize)]
struct BroadcastRequest<'a> {
    tx: &'a StdTx,
    mode: &'static str,
}

#[derive(Debug, Clone)]
pub struct RestChainClient {
    client: Client,
    base_url: String,
}

impl RestChainClient {
    pub fn new(lcd_url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: lcd_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, ChainError> {
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ChainError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ChainClient for RestChainClient {
    async fn account(&self, address: &str) -> Result<Account, ChainError> {
        let url = format!("{}{}/{}", self.base_url, ACCOUNTS_PATH, address);
        let response = self.client.get(url).send().await?;
        let body = Self::read_body(response).await?;
        parse_account(&body)
    }

    async fn broadcast(&self, tx: StdTx) -> Result<TxResponse, ChainError> {
        let url = format!("{}{}", self.base_url, BROADCAST_PATH);
        let request = BroadcastRequest {
            tx: &tx,
            mode: "sync",
        };
        let response = self.client.post(url).json(&request).send().await?;
        let body = Self::read_body(response).await?;
        serde_json::from_slice(&body).map_err(|e| ChainError::Decode(e.to_string()))
    }
}

fn parse_account(body: &[u8]) -> Result<Account, ChainError> {
    let response: AccountResponse =
        serde_json::from_slice(body).map_err(|e| ChainError::Decode(e.to_string()))?;
    Ok(response.account)
}
