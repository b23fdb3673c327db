// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain transports.
//!
//! One contract, two implementations: a websocket push subscription and an
//! HTTP pull range scanner. Both deliver decoded bridge events into the same
//! sink channel; the supervisor in `subscriber::mod` owns reconnection.

use crate::abi::decode_bridge_log;
use crate::error::{WatchError, WatchResult};
use crate::metrics::WatchMetrics;
use crate::retry_with_max_elapsed_time;
use crate::types::ObservedEvent;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Max blocks fetched per polling iteration.
const POLL_MAX_BLOCK_RANGE: u64 = 1_000;
/// How long transient RPC errors are retried before the transport gives up
/// and lets the supervisor reconnect.
const RPC_RETRY_MAX_ELAPSED: Duration = Duration::from_secs(30);

/// A live connection delivering decoded bridge events.
#[async_trait]
pub trait BridgeTransport: Send {
    /// Streams decoded events into `sink` until the transport fails or
    /// `cancel` fires. Returns Ok(()) only on cancellation; any transport
    /// failure is an error the supervisor reacts to.
    async fn stream_events(
        &mut self,
        sink: &mpsc::Sender<ObservedEvent>,
        cancel: &CancellationToken,
    ) -> WatchResult<()>;
}

/// Builds a fresh transport for every (re)connect, so no listener state
/// survives across connections.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> WatchResult<Box<dyn BridgeTransport>>;
}

/// Factory that picks push or pull from the RPC URL scheme, the same way the
/// endpoint kind is chosen by operators: `ws(s)://` subscribes, anything else
/// polls.
pub struct EthTransportFactory {
    rpc_url: String,
    contract: Address,
    poll_interval: Duration,
    metrics: Arc<WatchMetrics>,
}

impl EthTransportFactory {
    pub fn new(
        rpc_url: String,
        contract: Address,
        poll_interval: Duration,
        metrics: Arc<WatchMetrics>,
    ) -> Self {
        Self {
            rpc_url,
            contract,
            poll_interval,
            metrics,
        }
    }
}

#[async_trait]
impl TransportFactory for EthTransportFactory {
    async fn connect(&self) -> WatchResult<Box<dyn BridgeTransport>> {
        if self.rpc_url.starts_with("ws") {
            let provider = Provider::<Ws>::connect(&self.rpc_url)
                .await
                .map_err(|e| WatchError::Transport(format!("websocket connect failed: {}", e)))?;
            let block = provider
                .get_block_number()
                .await
                .map_err(|e| WatchError::Transport(format!("initial block query failed: {}", e)))?;
            info!("[Watcher] Connected over websocket, current block: {}", block);
            Ok(Box::new(WsTransport {
                provider: Arc::new(provider),
                contract: self.contract,
                metrics: self.metrics.clone(),
            }))
        } else {
            let provider = Provider::<Http>::try_from(self.rpc_url.as_str())
                .map_err(|e| WatchError::Configuration(format!("invalid rpc url: {}", e)))?;
            let block = provider
                .get_block_number()
                .await
                .map_err(|e| WatchError::Transport(format!("initial block query failed: {}", e)))?;
            info!(
                "[Watcher] Connected over http, polling from block {}",
                block.as_u64() + 1
            );
            Ok(Box::new(PollTransport {
                provider: Arc::new(provider),
                contract: self.contract,
                next_block: block.as_u64() + 1,
                poll_interval: self.poll_interval,
                metrics: self.metrics.clone(),
            }))
        }
    }
}

/// Decodes one raw log and forwards it. Decode failures skip the log only;
/// they never tear down the subscription.
async fn deliver(log: &Log, sink: &mpsc::Sender<ObservedEvent>, metrics: &WatchMetrics) {
    match decode_bridge_log(log) {
        Ok(Some(event)) => {
            debug!(
                "[Watcher] {}: {} -> {} | {} (block {})",
                event.kind, event.from, event.to, event.amount, event.block_number
            );
            metrics.last_observed_block.set(event.block_number as i64);
            if sink.send(event).await.is_err() {
                warn!("[Watcher] Event channel closed, dropping decoded event");
            }
        }
        Ok(None) => debug!("[Watcher] Skipping log with unrecognized topic"),
        Err(e) => {
            warn!("[Watcher] Skipping undecodable log: {}", e);
            metrics.decode_errors.inc();
        }
    }
}

/// Push subscription over a websocket provider.
pub struct WsTransport {
    provider: Arc<Provider<Ws>>,
    contract: Address,
    metrics: Arc<WatchMetrics>,
}

#[async_trait]
impl BridgeTransport for WsTransport {
    async fn stream_events(
        &mut self,
        sink: &mpsc::Sender<ObservedEvent>,
        cancel: &CancellationToken,
    ) -> WatchResult<()> {
        let filter = Filter::new().address(self.contract);
        let mut stream = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| WatchError::Transport(format!("subscribe_logs failed: {}", e)))?;
        info!("[Watcher] Subscribed to logs at {:?}", self.contract);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Watcher] Subscription cancelled");
                    break Ok(());
                }
                maybe_log = stream.next() => match maybe_log {
                    Some(log) => deliver(&log, sink, &self.metrics).await,
                    // The provider ends the stream when the socket drops
                    None => break Err(WatchError::Transport(
                        "log subscription stream closed".to_string(),
                    )),
                }
            }
        };
        let _ = stream.unsubscribe().await;
        outcome
    }
}

/// Pull range scanner over an HTTP provider. Keeps a block cursor and fetches
/// logs for every new block range on a fixed interval.
pub struct PollTransport {
    provider: Arc<Provider<Http>>,
    contract: Address,
    next_block: u64,
    poll_interval: Duration,
    metrics: Arc<WatchMetrics>,
}

#[async_trait]
impl BridgeTransport for PollTransport {
    async fn stream_events(
        &mut self,
        sink: &mpsc::Sender<ObservedEvent>,
        cancel: &CancellationToken,
    ) -> WatchResult<()> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Watcher] Poll loop cancelled");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let latest = match retry_with_max_elapsed_time!(
                        self.provider.get_block_number(),
                        RPC_RETRY_MAX_ELAPSED
                    ) {
                        Ok(Ok(number)) => number.as_u64(),
                        _ => {
                            return Err(WatchError::Transport(
                                "failed to fetch latest block after retries".to_string(),
                            ))
                        }
                    };

                    while self.next_block <= latest {
                        let end_block = std::cmp::min(
                            self.next_block + POLL_MAX_BLOCK_RANGE - 1,
                            latest,
                        );
                        let filter = Filter::new()
                            .address(self.contract)
                            .from_block(self.next_block)
                            .to_block(end_block);
                        let logs = match retry_with_max_elapsed_time!(
                            self.provider.get_logs(&filter),
                            RPC_RETRY_MAX_ELAPSED
                        ) {
                            Ok(Ok(logs)) => logs,
                            _ => {
                                return Err(WatchError::Transport(format!(
                                    "failed to fetch logs for blocks {}-{}",
                                    self.next_block, end_block
                                )))
                            }
                        };
                        debug!(
                            "[Watcher] Scanned blocks {}-{}: {} logs",
                            self.next_block,
                            end_block,
                            logs.len()
                        );
                        for log in &logs {
                            deliver(log, sink, &self.metrics).await;
                        }
                        self.next_block = end_block + 1;
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
