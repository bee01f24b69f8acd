//! End-to-end feeder tests: event stream -> aggregate provider -> poster

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use pricefeeder::error::{ChainError, FeederError, ProviderError, StreamError};
use pricefeeder::eventstream::{BlockFeed, ParamsQuerier, Stream, StreamConfig};
use pricefeeder::feeder::Feeder;
use pricefeeder::priceposter::chain::{Account, TxResponse};
use pricefeeder::priceposter::{
    ChainClient, Client, CommitmentScheme, LocalKeySigner, OracleMsg, PosterConfig, StdTx,
    TruncatedSha256,
};
use pricefeeder::priceprovider::{AggregatePriceProvider, PriceProvider};
use pricefeeder::types::{AssetPair, Params, Price};

const SECRET: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const VALIDATOR: &str = "nibivaloper1validator";
const FEEDER: &str = "nibi1feeder";

struct ChannelFeed {
    rx: mpsc::Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BlockFeed for ChannelFeed {
    async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct StaticParams(Option<Params>);

#[async_trait]
impl ParamsQuerier for StaticParams {
    async fn query_params(&self) -> Result<Params, StreamError> {
        self.0.clone().ok_or(StreamError::ParamsStatus(503))
    }
}

/// Provider with a fixed answer per base asset
struct FixedProvider {
    name: &'static str,
    prices: Vec<(&'static str, f64)>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PriceProvider for FixedProvider {
    async fn get_price(&self, pair: &AssetPair) -> Price {
        let value = self
            .prices
            .iter()
            .find(|(base, _)| *base == pair.base())
            .map(|(_, value)| *value);
        Price {
            pair: pair.clone(),
            value: value.unwrap_or(0.0),
            source_name: self.name.to_string(),
            valid: value.is_some(),
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingChain {
    sent: Arc<Mutex<Vec<StdTx>>>,
}

#[async_trait]
impl ChainClient for RecordingChain {
    async fn account(&self, _address: &str) -> Result<Account, ChainError> {
        let sequence = self.sent.lock().unwrap().len() as u64;
        Ok(Account {
            account_number: 3,
            sequence,
        })
    }

    async fn broadcast(&self, tx: StdTx) -> Result<TxResponse, ChainError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(tx);
        Ok(TxResponse {
            txhash: format!("TX{}", sent.len()),
            code: 0,
            raw_log: String::new(),
        })
    }
}

fn new_block(height: u64) -> Vec<u8> {
    format!(
        r#"{{"jsonrpc":"2.0","id":0,"result":{{"query":"tm.event='NewBlock'","data":{{"type":"tendermint/event/NewBlock","value":{{"block":{{"header":{{"height":"{height}"}}}}}}}}}}}}"#
    )
    .into_bytes()
}

fn pairs() -> Vec<AssetPair> {
    vec![AssetPair::new("ubtc", "unusd"), AssetPair::new("ueth", "unusd")]
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        params_poll_interval: Duration::from_millis(50),
        params_query_timeout: Duration::from_millis(50),
    }
}

async fn wait_for_txs(chain: &RecordingChain, count: usize) -> Vec<StdTx> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let sent = chain.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transactions were not broadcast in time")
}

#[tokio::test]
async fn test_voting_periods_drive_commit_reveal() {
    let (block_tx, block_rx) = mpsc::channel(16);
    let feed_closed = Arc::new(AtomicBool::new(false));
    let stream = Stream::new(
        ChannelFeed {
            rx: block_rx,
            closed: feed_closed.clone(),
        },
        StaticParams(Some(Params::new(pairs(), 5).unwrap())),
        stream_config(),
    );

    let provider_closed = Arc::new(AtomicBool::new(false));
    let provider = AggregatePriceProvider::new(vec![
        Box::new(FixedProvider {
            name: "exchange-a",
            prices: vec![("ubtc", 64_000.0)],
            closed: provider_closed.clone(),
        }),
        Box::new(FixedProvider {
            name: "exchange-b",
            prices: vec![],
            closed: provider_closed.clone(),
        }),
    ]);

    let chain = RecordingChain::default();
    let poster = Client::new(
        VALIDATOR,
        FEEDER,
        chain.clone(),
        LocalKeySigner::from_hex(SECRET).unwrap(),
        PosterConfig::new("nibiru-localnet-0"),
    );

    let handle = assert_ok!(
        Feeder::run(
            Box::new(stream),
            Box::new(provider),
            Box::new(poster),
            Duration::from_secs(2),
        )
        .await
    );

    // Only blocks 4 and 9 precede a new period of 5 blocks
    for height in 1..=6 {
        block_tx.send(new_block(height)).await.unwrap();
    }
    let first = wait_for_txs(&chain, 1).await;
    for height in 7..=9 {
        block_tx.send(new_block(height)).await.unwrap();
    }
    let sent = wait_for_txs(&chain, 2).await;
    assert_eq!(first.len(), 1);

    assert_eq!(sent[0].msg.len(), 1, "first period only commits");
    let first_hash = match &sent[0].msg[0] {
        OracleMsg::AggregatePrevote { hash, .. } => hash.clone(),
        other => panic!("expected prevote, got {other:?}"),
    };

    assert_eq!(sent[1].msg.len(), 2);
    match &sent[1].msg[0] {
        OracleMsg::AggregateVote {
            exchange_rates,
            salt,
            validator,
            feeder,
        } => {
            assert_eq!(
                exchange_rates,
                "(ubtc:unusd,64000.000000000000000000)|(ueth:unusd,0.000000000000000000)"
            );
            assert_eq!(validator, VALIDATOR);
            assert_eq!(feeder, FEEDER);
            assert_eq!(
                TruncatedSha256.commit(salt, exchange_rates, validator),
                first_hash
            );
        }
        other => panic!("expected reveal first, got {other:?}"),
    }
    assert!(matches!(sent[1].msg[1], OracleMsg::AggregatePrevote { .. }));

    tokio::time::timeout(Duration::from_secs(5), handle.close())
        .await
        .expect("feeder did not shut down in time");
    assert!(feed_closed.load(Ordering::SeqCst));
    assert!(provider_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_startup_aborts_without_params() {
    let (_block_tx, block_rx) = mpsc::channel(1);
    let feed_closed = Arc::new(AtomicBool::new(false));
    let stream = Stream::new(
        ChannelFeed {
            rx: block_rx,
            closed: feed_closed.clone(),
        },
        StaticParams(None),
        stream_config(),
    );

    let provider_closed = Arc::new(AtomicBool::new(false));
    let provider = AggregatePriceProvider::new(vec![Box::new(FixedProvider {
        name: "exchange-a",
        prices: vec![("ubtc", 1.0)],
        closed: provider_closed.clone(),
    })]);
    let chain = RecordingChain::default();
    let poster = Client::new(
        VALIDATOR,
        FEEDER,
        chain.clone(),
        LocalKeySigner::from_hex(SECRET).unwrap(),
        PosterConfig::new("nibiru-localnet-0"),
    );

    let result = Feeder::run(
        Box::new(stream),
        Box::new(provider),
        Box::new(poster),
        Duration::from_millis(200),
    )
    .await;

    assert!(matches!(result, Err(FeederError::InitTimeout(_))));
    assert!(feed_closed.load(Ordering::SeqCst));
    assert!(provider_closed.load(Ordering::SeqCst));
    assert!(chain.sent.lock().unwrap().is_empty());
}
