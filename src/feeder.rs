//! Feeder - orchestrates stream, providers and poster
//!
//! Owns the current oracle params and reacts to chain signals: params
//! updates replace them, voting period starts trigger a price round.

use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::error::FeederError;
use crate::eventstream::{ChainEvent, EventStream};
use crate::priceposter::PricePoster;
use crate::priceprovider::PriceProvider;
use crate::types::{Params, Price, VotingPeriod};

pub struct Feeder {
    stream: Box<dyn EventStream>,
    provider: Box<dyn PriceProvider>,
    poster: Box<dyn PricePoster>,
    params: Params,
}

/// Handle to a running feeder loop
pub struct FeederHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl FeederHandle {
    /// Stop the loop and wait until every collaborator is closed
    pub async fn close(self) {
        // Err means the loop already exited
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            error!(error = %e, "feeder loop panicked");
        }
    }
}

impl Feeder {
    /// Wait for the initial params, then start the event loop.
    ///
    /// Fails if no params arrive within `init_timeout`; the collaborators
    /// are closed before the error is returned.
    pub async fn run(
        mut stream: Box<dyn EventStream>,
        mut provider: Box<dyn PriceProvider>,
        mut poster: Box<dyn PricePoster>,
        init_timeout: Duration,
    ) -> Result<FeederHandle, FeederError> {
        let params = match timeout(init_timeout, stream.params_update()).await {
            Ok(Some(params)) => params,
            Ok(None) => {
                close_all(stream.as_mut(), provider.as_mut(), poster.as_mut()).await;
                return Err(FeederError::StreamClosed);
            }
            Err(_) => {
                close_all(stream.as_mut(), provider.as_mut(), poster.as_mut()).await;
                return Err(FeederError::InitTimeout(init_timeout));
            }
        };

        info!(
            validator = %poster.whoami(),
            pairs = params.pairs().len(),
            vote_period_blocks = params.vote_period_blocks(),
            "feeder initialized"
        );

        let feeder = Feeder {
            stream,
            provider,
            poster,
            params,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(feeder.event_loop(stop_rx));

        Ok(FeederHandle { stop_tx, task })
    }

    async fn event_loop(mut self, mut stop_rx: oneshot::Receiver<()>) {
        let mut stream_open = true;
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                event = self.stream.next_event(), if stream_open => match event {
                    Some(ChainEvent::ParamsUpdate(params)) => self.handle_params_update(params),
                    Some(ChainEvent::VotingPeriodStarted(vp)) => self.handle_voting_period(vp).await,
                    None => {
                        warn!("event stream ended, idling until shutdown");
                        stream_open = false;
                    }
                },
            }
        }

        close_all(
            self.stream.as_mut(),
            self.provider.as_mut(),
            self.poster.as_mut(),
        )
        .await;
        info!("feeder stopped");
    }

    fn handle_params_update(&mut self, params: Params) {
        info!(
            pairs = params.pairs().len(),
            vote_period_blocks = params.vote_period_blocks(),
            "params changed"
        );
        self.params = params;
    }

    async fn handle_voting_period(&mut self, vp: VotingPeriod) {
        info!(height = vp.height, "new voting period");

        let mut prices: Vec<Price> = Vec::with_capacity(self.params.pairs().len());
        for pair in self.params.pairs() {
            let price = self.provider.get_price(pair).await;
            if price.valid {
                prices.push(price);
            } else {
                warn!(pair = %pair, source = %price.source_name, "no valid price, voting abstain");
                prices.push(price.abstain());
            }
        }

        match self.poster.send_prices(vp, prices).await {
            Ok(txhash) => info!(height = vp.height, tx_hash = %txhash, "voting period handled"),
            Err(e) => error!(height = vp.height, error = %e, "failed to send prices"),
        }
    }
}

async fn close_all(
    stream: &mut dyn EventStream,
    provider: &mut dyn PriceProvider,
    poster: &mut dyn PricePoster,
) {
    stream.close().await;
    poster.close().await;
    if let Err(e) = provider.close().await {
        warn!(error = %e, "price provider did not close cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostError;
    use crate::priceposter::MockPricePoster;
    use crate::priceprovider::MockPriceProvider;
    use crate::types::AssetPair;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct ChannelStream {
        params_rx: mpsc::Receiver<Params>,
        events_rx: mpsc::Receiver<ChainEvent>,
        closed: Arc<AtomicBool>,
    }

    struct StreamControl {
        params_tx: mpsc::Sender<Params>,
        events_tx: mpsc::Sender<ChainEvent>,
        closed: Arc<AtomicBool>,
    }

    fn channel_stream() -> (Box<dyn EventStream>, StreamControl) {
        let (params_tx, params_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = mpsc::channel(4);
        let closed = Arc::new(AtomicBool::new(false));
        let stream = ChannelStream {
            params_rx,
            events_rx,
            closed: closed.clone(),
        };
        let control = StreamControl {
            params_tx,
            events_tx,
            closed,
        };
        (Box::new(stream), control)
    }

    #[async_trait]
    impl EventStream for ChannelStream {
        async fn params_update(&mut self) -> Option<Params> {
            self.params_rx.recv().await
        }

        async fn next_event(&mut self) -> Option<ChainEvent> {
            self.events_rx.recv().await
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn pair_a() -> AssetPair {
        AssetPair::new("ubtc", "unusd")
    }

    fn pair_b() -> AssetPair {
        AssetPair::new("ueth", "unusd")
    }

    fn params(pairs: Vec<AssetPair>) -> Params {
        Params::new(pairs, 10).unwrap()
    }

    fn closing_provider() -> MockPriceProvider {
        let mut provider = MockPriceProvider::new();
        provider.expect_close().times(1).returning(|| Ok(()));
        provider
    }

    fn closing_poster() -> MockPricePoster {
        let mut poster = MockPricePoster::new();
        poster
            .expect_whoami()
            .return_const("nibivaloper1validator".to_string());
        poster.expect_close().times(1).return_const(());
        poster
    }

    #[tokio::test]
    async fn test_prices_follow_pair_order_with_abstain() {
        let (stream, control) = channel_stream();

        let mut provider = closing_provider();
        provider.expect_get_price().returning(|pair| {
            if pair.base() == "ubtc" {
                Price {
                    pair: pair.clone(),
                    value: 10.0,
                    source_name: "source-a".to_string(),
                    valid: true,
                }
            } else {
                Price {
                    pair: pair.clone(),
                    value: 3.5,
                    source_name: "source-b".to_string(),
                    valid: false,
                }
            }
        });

        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut poster = closing_poster();
        poster.expect_send_prices().returning(move |vp, prices| {
            let _ = sent_tx.send((vp, prices));
            Ok("TX".to_string())
        });

        control.params_tx.send(params(vec![pair_a(), pair_b()])).await.unwrap();
        let handle = Feeder::run(
            stream,
            Box::new(provider),
            Box::new(poster),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        control
            .events_tx
            .send(ChainEvent::VotingPeriodStarted(VotingPeriod { height: 9 }))
            .await
            .unwrap();

        let (vp, prices) = sent_rx.recv().await.unwrap();
        assert_eq!(vp.height, 9);
        assert_eq!(
            prices,
            vec![
                Price {
                    pair: pair_a(),
                    value: 10.0,
                    source_name: "source-a".to_string(),
                    valid: true,
                },
                Price {
                    pair: pair_b(),
                    value: 0.0,
                    source_name: "source-b".to_string(),
                    valid: false,
                },
            ]
        );

        handle.close().await;
        assert!(control.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_init_timeout_aborts_and_closes() {
        let (stream, control) = channel_stream();
        let mut poster = MockPricePoster::new();
        poster.expect_close().times(1).return_const(());

        let result = Feeder::run(
            stream,
            Box::new(closing_provider()),
            Box::new(poster),
            Duration::from_millis(20),
        )
        .await;

        assert!(matches!(result, Err(FeederError::InitTimeout(_))));
        assert!(control.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stream_closed_before_params() {
        let (stream, control) = channel_stream();
        let StreamControl {
            params_tx, closed, ..
        } = control;
        drop(params_tx);
        let mut poster = MockPricePoster::new();
        poster.expect_close().times(1).return_const(());

        let result = Feeder::run(
            stream,
            Box::new(closing_provider()),
            Box::new(poster),
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(FeederError::StreamClosed)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_params_update_changes_voted_pairs() {
        let (stream, control) = channel_stream();

        let mut provider = closing_provider();
        provider.expect_get_price().returning(|pair| Price {
            pair: pair.clone(),
            value: 1.0,
            source_name: "source".to_string(),
            valid: true,
        });

        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut poster = closing_poster();
        poster.expect_send_prices().returning(move |_, prices| {
            let _ = sent_tx.send(prices);
            Ok("TX".to_string())
        });

        control.params_tx.send(params(vec![pair_a()])).await.unwrap();
        let handle = Feeder::run(
            stream,
            Box::new(provider),
            Box::new(poster),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        control
            .events_tx
            .send(ChainEvent::ParamsUpdate(params(vec![pair_b(), pair_a()])))
            .await
            .unwrap();
        control
            .events_tx
            .send(ChainEvent::VotingPeriodStarted(VotingPeriod { height: 19 }))
            .await
            .unwrap();

        let prices = sent_rx.recv().await.unwrap();
        let pairs: Vec<AssetPair> = prices.into_iter().map(|p| p.pair).collect();
        assert_eq!(pairs, vec![pair_b(), pair_a()]);

        handle.close().await;
    }

    #[tokio::test]
    async fn test_failed_submission_keeps_loop_running() {
        let (stream, control) = channel_stream();

        let mut provider = closing_provider();
        provider.expect_get_price().returning(|pair| Price {
            pair: pair.clone(),
            value: 1.0,
            source_name: "source".to_string(),
            valid: true,
        });

        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut poster = closing_poster();
        let mut calls = 0;
        poster.expect_send_prices().times(2).returning(move |vp, _| {
            calls += 1;
            let _ = sent_tx.send(vp.height);
            if calls == 1 {
                Err(PostError::Timeout(Duration::from_secs(15)))
            } else {
                Ok("TX".to_string())
            }
        });

        control.params_tx.send(params(vec![pair_a()])).await.unwrap();
        let handle = Feeder::run(
            stream,
            Box::new(provider),
            Box::new(poster),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        for height in [9, 19] {
            control
                .events_tx
                .send(ChainEvent::VotingPeriodStarted(VotingPeriod { height }))
                .await
                .unwrap();
        }

        assert_eq!(sent_rx.recv().await, Some(9));
        assert_eq!(sent_rx.recv().await, Some(19));
        handle.close().await;
    }

    #[tokio::test]
    async fn test_close_after_stream_ends() {
        let (stream, control) = channel_stream();
        let StreamControl {
            params_tx,
            events_tx,
            closed,
        } = control;

        params_tx.send(params(vec![pair_a()])).await.unwrap();
        let handle = Feeder::run(
            stream,
            Box::new(closing_provider()),
            Box::new(closing_poster()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        drop(events_tx);

        tokio::time::timeout(Duration::from_secs(1), handle.close())
            .await
            .unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }
}
