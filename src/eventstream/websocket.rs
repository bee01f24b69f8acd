//! Tendermint RPC websocket subscription to `NewBlock` events
//!
//! The connection is owned by a background task that resubscribes after
//! every disconnect, backing off between attempts, until closed.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::eventstream::BlockFeed;
use crate::shutdown::stopped;

const NEW_BLOCK_SUBSCRIBE: &str =
    r#"{"jsonrpc":"2.0","method":"subscribe","id":0,"params":{"query":"tm.event='NewBlock'"}}"#;
const BASE_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;
const BACKOFF_JITTER_RATIO: f64 = 0.20;
const MESSAGE_BUFFER: usize = 16;

fn reconnect_delay(attempt: u32) -> Duration {
    let capped_attempt = attempt.min(16);
    let base = BASE_BACKOFF_SECS
        .saturating_mul(1u64 << capped_attempt)
        .min(MAX_BACKOFF_SECS);
    let jitter = 1.0 + rand::thread_rng().gen_range(-BACKOFF_JITTER_RATIO..=BACKOFF_JITTER_RATIO);
    Duration::from_secs_f64((base as f64 * jitter).clamp(1.0, MAX_BACKOFF_SECS as f64))
}

pub struct TendermintWebsocket {
    messages_rx: mpsc::Receiver<Vec<u8>>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TendermintWebsocket {
    /// Start the subscription task; connection errors are retried, not returned
    pub fn connect(url: &str) -> Self {
        let (messages_tx, messages_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(url.to_string(), messages_tx, stop_rx));

        Self {
            messages_rx,
            stop_tx,
            task: Some(task),
        }
    }
}

#[async_trait]
impl BlockFeed for TendermintWebsocket {
    async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.messages_rx.recv().await
    }

    async fn close(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "websocket task did not exit cleanly");
            }
        }
    }
}

async fn run(url: String, messages_tx: mpsc::Sender<Vec<u8>>, mut stop_rx: watch::Receiver<bool>) {
    let mut attempt = 0u32;

    'reconnect: loop {
        info!(url = %url, attempt, "connecting to tendermint websocket");
        let connected = tokio::select! {
            _ = stopped(&mut stop_rx) => break 'reconnect,
            res = connect_async(url.as_str()) => res,
        };

        match connected {
            Ok((ws_stream, _)) => {
                let (mut write, mut read) = ws_stream.split();

                match write.send(Message::Text(NEW_BLOCK_SUBSCRIBE.to_string())).await {
                    Ok(()) => {
                        attempt = 0;
                        info!(url = %url, "subscribed to new blocks");

                        'socket: loop {
                            let payload = tokio::select! {
                                _ = stopped(&mut stop_rx) => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break 'reconnect;
                                }
                                msg = read.next() => match msg {
                                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                                    Some(Ok(Message::Binary(data))) => data,
                                    Some(Ok(Message::Ping(data))) => {
                                        let _ = write.send(Message::Pong(data)).await;
                                        continue 'socket;
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        warn!(?frame, "websocket closed by server");
                                        break 'socket;
                                    }
                                    Some(Err(e)) => {
                                        error!(error = %e, "websocket error");
                                        break 'socket;
                                    }
                                    None => {
                                        warn!("websocket stream ended");
                                        break 'socket;
                                    }
                                    _ => continue 'socket,
                                },
                            };

                            debug!(bytes = payload.len(), "received message from websocket");
                            tokio::select! {
                                _ = stopped(&mut stop_rx) => break 'reconnect,
                                res = messages_tx.send(payload) => {
                                    if res.is_err() {
                                        break 'reconnect;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "failed to send subscription");
                    }
                }
            }
            Err(e) => {
                error!(url = %url, error = %e, "connection failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = reconnect_delay(attempt);
        info!(delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = stopped(&mut stop_rx) => break 'reconnect,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!("websocket task exited");
}
