//! Price poster - commit-reveal submission to the oracle module
//!
//! Every voting period one transaction is sent carrying the reveal of the
//! previous period's prevote (if any) followed by the prevote for the
//! current period. The pending prevote only advances when a submission
//! lands; after a failure the next call reveals the same commitment again.

pub mod chain;
mod prevote;
mod signer;

pub use chain::{ChainClient, OracleMsg, RestChainClient, StdTx};
pub use prevote::{exchange_rates_string, CommitmentScheme, Prevote, TruncatedSha256};
pub use signer::{LocalKeySigner, TxSigner};

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::PostError;
use crate::metrics;
use crate::types::{Price, VotingPeriod};
use chain::{Fee, SignDoc, StdSignature};

/// Upper bound for building, signing and broadcasting one submission
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PricePoster: Send + Sync {
    /// Submit `prices` for the voting period, returning the tx hash
    async fn send_prices(
        &mut self,
        voting_period: VotingPeriod,
        prices: Vec<Price>,
    ) -> Result<String, PostError>;

    /// Validator the poster votes for
    fn whoami(&self) -> String;

    async fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct PosterConfig {
    pub chain_id: String,
    pub gas_limit: u64,
    pub submit_timeout: Duration,
}

impl PosterConfig {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            gas_limit: DEFAULT_GAS_LIMIT,
            submit_timeout: SUBMIT_TIMEOUT,
        }
    }
}

pub struct Client<C, S> {
    validator: String,
    feeder: String,
    chain: C,
    signer: S,
    commitment: Box<dyn CommitmentScheme>,
    config: PosterConfig,
    previous_prevote: Option<Prevote>,
}

impl<C: ChainClient, S: TxSigner> Client<C, S> {
    pub fn new(
        validator: impl Into<String>,
        feeder: impl Into<String>,
        chain: C,
        signer: S,
        config: PosterConfig,
    ) -> Self {
        Self {
            validator: validator.into(),
            feeder: feeder.into(),
            chain,
            signer,
            commitment: Box::new(TruncatedSha256),
            config,
            previous_prevote: None,
        }
    }

    /// Replace the default commitment scheme
    pub fn with_commitment(mut self, commitment: Box<dyn CommitmentScheme>) -> Self {
        self.commitment = commitment;
        self
    }

    /// Prevote awaiting its reveal
    pub fn pending_prevote(&self) -> Option<&Prevote> {
        self.previous_prevote.as_ref()
    }

    fn build_msgs(&self, prevote: &Prevote) -> Vec<OracleMsg> {
        let mut msgs = Vec::with_capacity(2);
        if let Some(previous) = &self.previous_prevote {
            msgs.push(OracleMsg::AggregateVote {
                exchange_rates: previous.exchange_rates.clone(),
                feeder: self.feeder.clone(),
                salt: previous.salt.clone(),
                validator: self.validator.clone(),
            });
        }
        msgs.push(OracleMsg::AggregatePrevote {
            feeder: self.feeder.clone(),
            hash: prevote.hash.clone(),
            validator: self.validator.clone(),
        });
        msgs
    }

    async fn vote(&self, prevote: &Prevote) -> Result<String, PostError> {
        let msgs = self.build_msgs(prevote);
        let tx_type = if msgs.len() == 2 {
            "vote+prevote"
        } else {
            "prevote"
        };

        let account = self
            .chain
            .account(&self.feeder)
            .await
            .map_err(PostError::Account)?;

        let fee = Fee::gas_only(self.config.gas_limit);
        let sign_bytes = SignDoc {
            account_number: account.account_number.to_string(),
            chain_id: &self.config.chain_id,
            fee: &fee,
            memo: "",
            msgs: &msgs,
            sequence: account.sequence.to_string(),
        }
        .to_sign_bytes()?;
        let signature = self.signer.sign(&sign_bytes)?;

        let tx = StdTx {
            msg: msgs,
            fee,
            signatures: vec![StdSignature::secp256k1(
                &self.signer.public_key(),
                &signature,
            )],
            memo: String::new(),
        };

        let started = Instant::now();
        let response = self
            .chain
            .broadcast(tx)
            .await
            .map_err(PostError::Broadcast)?;
        metrics::track_broadcast_latency(tx_type, started.elapsed());

        if response.code != 0 {
            return Err(PostError::Rejected {
                txhash: response.txhash,
                code: response.code,
                raw_log: response.raw_log,
            });
        }
        Ok(response.txhash)
    }
}

#[async_trait]
impl<C: ChainClient, S: TxSigner> PricePoster for Client<C, S> {
    async fn send_prices(
        &mut self,
        voting_period: VotingPeriod,
        prices: Vec<Price>,
    ) -> Result<String, PostError> {
        let prevote = Prevote::new(&prices, &self.validator, self.commitment.as_ref());
        let submit_timeout = self.config.submit_timeout;

        let result = match timeout(submit_timeout, self.vote(&prevote)).await {
            Ok(result) => result,
            Err(_) => Err(PostError::Timeout(submit_timeout)),
        };

        match result {
            Ok(txhash) => {
                info!(
                    height = voting_period.height,
                    tx_hash = %txhash,
                    revealed = self.previous_prevote.is_some(),
                    "prices posted"
                );
                self.previous_prevote = Some(prevote);
                metrics::track_post(true);
                Ok(txhash)
            }
            Err(e) => {
                warn!(height = voting_period.height, error = %e, "failed to post prices");
                metrics::track_post(false);
                Err(e)
            }
        }
    }

    fn whoami(&self) -> String {
        self.validator.clone()
    }

    async fn close(&mut self) {
        if self.previous_prevote.is_some() {
            info!(validator = %self.validator, "closing with an unrevealed prevote");
        }
    }
}
