//! Chain event stream - voting period and params change signals
//!
//! Two loops run side by side:
//! - the block loop reads `NewBlock` events and signals a voting period when
//!   the next block opens one, using the most recently cached params
//! - the params loop polls the oracle params and signals structural changes
//!
//! The cached params sit in a `watch` cell written only by the params loop.

mod params;
mod websocket;

pub use params::{ParamsQuerier, RestParamsClient};
pub use websocket::TendermintWebsocket;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::shutdown::stopped;
use crate::types::{block_height, Params, VotingPeriod};

/// Signals consumed by the feeder
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    ParamsUpdate(Params),
    VotingPeriodStarted(VotingPeriod),
}

/// Source of "when to act" signals
#[async_trait]
pub trait EventStream: Send {
    /// Wait for the next params change
    async fn params_update(&mut self) -> Option<Params>;

    /// Wait for the next signal of either kind; params changes win ties
    async fn next_event(&mut self) -> Option<ChainEvent>;

    /// Stop all loops and wait until they have exited
    async fn close(&mut self);
}

/// Push feed of raw `NewBlock` messages
#[async_trait]
pub trait BlockFeed: Send {
    /// Next raw message, `None` once the feed is closed
    async fn next_message(&mut self) -> Option<Vec<u8>>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub params_poll_interval: Duration,
    pub params_query_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            params_poll_interval: Duration::from_secs(10),
            params_query_timeout: Duration::from_secs(3),
        }
    }
}

pub struct Stream {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    params_rx: mpsc::Receiver<Params>,
    voting_period_rx: mpsc::Receiver<VotingPeriod>,
}

impl Stream {
    /// Connect to a node: websocket for blocks, REST for params
    pub fn dial(
        websocket_url: &str,
        lcd_url: &str,
        config: StreamConfig,
    ) -> Result<Self, StreamError> {
        let feed = TendermintWebsocket::connect(websocket_url);
        let querier = RestParamsClient::new(lcd_url, config.params_query_timeout)?;
        Ok(Self::new(feed, querier, config))
    }

    pub fn new<F, Q>(feed: F, querier: Q, config: StreamConfig) -> Self
    where
        F: BlockFeed + 'static,
        Q: ParamsQuerier + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (cache_tx, cache_rx) = watch::channel::<Option<Params>>(None);
        let (params_tx, params_rx) = mpsc::channel(1);
        let (voting_period_tx, voting_period_rx) = mpsc::channel(1);

        let tasks = vec![
            tokio::spawn(voting_period_loop(
                feed,
                cache_rx,
                voting_period_tx,
                stop_rx.clone(),
            )),
            tokio::spawn(params_loop(querier, cache_tx, params_tx, config, stop_rx)),
        ];

        Self {
            stop_tx,
            tasks,
            params_rx,
            voting_period_rx,
        }
    }
}

#[async_trait]
impl EventStream for Stream {
    async fn params_update(&mut self) -> Option<Params> {
        self.params_rx.recv().await
    }

    async fn next_event(&mut self) -> Option<ChainEvent> {
        tokio::select! {
            biased;
            Some(params) = self.params_rx.recv() => Some(ChainEvent::ParamsUpdate(params)),
            Some(vp) = self.voting_period_rx.recv() => Some(ChainEvent::VotingPeriodStarted(vp)),
            else => None,
        }
    }

    async fn close(&mut self) {
        self.stop_tx.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "stream loop did not exit cleanly");
            }
        }
    }
}

async fn voting_period_loop<F: BlockFeed>(
    mut feed: F,
    cache_rx: watch::Receiver<Option<Params>>,
    voting_period_tx: mpsc::Sender<VotingPeriod>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            _ = stopped(&mut stop_rx) => break,
            msg = feed.next_message() => msg,
        };
        let Some(msg) = msg else {
            warn!(component = "voting-period-loop", "block feed closed");
            break;
        };

        let height = match block_height(&msg) {
            Ok(height) => height,
            Err(StreamError::NotABlock) => {
                debug!(component = "voting-period-loop", "skipping non-block message");
                continue;
            }
            Err(e) => {
                warn!(component = "voting-period-loop", error = %e, "could not obtain block height");
                continue;
            }
        };

        let Some(next_height) = height.checked_add(1) else {
            warn!(component = "voting-period-loop", height, "block height out of range, skipping");
            continue;
        };
        let starts = match cache_rx.borrow().as_ref() {
            Some(params) => params.is_voting_period_start(height),
            None => continue,
        };
        if !starts {
            continue;
        }

        let vp = VotingPeriod { height: next_height };
        debug!(component = "voting-period-loop", height = vp.height, "signaling new voting period");
        tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => {
                warn!(component = "voting-period-loop", height = vp.height, "dropped voting period signal");
            }
            res = voting_period_tx.send(vp) => {
                if res.is_err() {
                    debug!(component = "voting-period-loop", "voting period receiver gone");
                }
            }
        }
    }

    feed.close().await;
    info!(component = "voting-period-loop", "exited loop");
}

async fn params_loop<Q: ParamsQuerier>(
    querier: Q,
    cache_tx: watch::Sender<Option<Params>>,
    params_tx: mpsc::Sender<Params>,
    config: StreamConfig,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut tick = interval(config.params_poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stopped(&mut stop_rx) => break,
            _ = tick.tick() => {}
        }

        let new_params = match timeout(config.params_query_timeout, querier.query_params()).await {
            Ok(Ok(params)) => params,
            Ok(Err(e)) => {
                warn!(component = "params-loop", error = %e, "param update failed");
                continue;
            }
            Err(_) => {
                let e = StreamError::ParamsTimeout(config.params_query_timeout);
                warn!(component = "params-loop", error = %e, "param update failed");
                continue;
            }
        };

        let old_params = cache_tx.send_replace(Some(new_params.clone()));
        if old_params.as_ref() == Some(&new_params) {
            debug!(component = "params-loop", "skipping params update as they're not different from the old ones");
            continue;
        }

        tokio::select! {
            biased;
            _ = stopped(&mut stop_rx) => {
                warn!(component = "params-loop", "dropped params update due to shutdown");
            }
            res = params_tx.send(new_params.clone()) => {
                if res.is_ok() {
                    info!(
                        component = "params-loop",
                        vote_period_blocks = new_params.vote_period_blocks(),
                        pairs = ?new_params.pairs().iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "signaling new params update"
                    );
                }
            }
        }
    }

    info!(component = "params-loop", "exited loop");
}
