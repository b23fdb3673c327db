// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain subscriber.
//!
//! Supervises one transport connection to the bridge contract and self-heals
//! on failure: any transport error schedules a single reconnect after a fixed
//! delay, duplicate failure signals inside that window coalesce into a no-op,
//! and all subscription state is torn down before a fresh connection is made.

pub mod backfill;
pub mod transport;

pub use transport::{BridgeTransport, EthTransportFactory, TransportFactory};

use crate::metrics::WatchMetrics;
use crate::types::ObservedEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before a reconnect attempt after a transport failure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// What happened to a reconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// This caller armed the timer and waited out the delay.
    Scheduled,
    /// A reconnect was already pending; this request was absorbed.
    Coalesced,
    /// Cancellation fired during the wait.
    Cancelled,
}

/// Coalesces reconnect requests: while one reconnect is pending, further
/// requests are no-ops.
#[derive(Debug, Default)]
pub struct ReconnectGate {
    armed: AtomicBool,
}

impl ReconnectGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the gate. Returns false when a reconnect is already pending.
    pub fn try_arm(&self) -> bool {
        self.armed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

pub struct BridgeSubscriber {
    factory: Arc<dyn TransportFactory>,
    sink: mpsc::Sender<ObservedEvent>,
    state: Arc<RwLock<ConnectionState>>,
    gate: Arc<ReconnectGate>,
    metrics: Arc<WatchMetrics>,
}

impl BridgeSubscriber {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        sink: mpsc::Sender<ObservedEvent>,
        metrics: Arc<WatchMetrics>,
    ) -> Self {
        Self {
            factory,
            sink,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            gate: Arc::new(ReconnectGate::new()),
            metrics,
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != new_state {
            debug!("[Watcher] Connection state {:?} -> {:?}", *state, new_state);
            *state = new_state;
        }
        self.metrics
            .connection_state
            .set((new_state == ConnectionState::Subscribed) as i64);
    }

    /// Supervision loop. Connects, streams until the transport fails, then
    /// reconnects after the coalesced delay. Only returns on cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting).await;
            match self.factory.connect().await {
                Ok(mut transport) => {
                    self.set_state(ConnectionState::Subscribed).await;
                    match transport.stream_events(&self.sink, &cancel).await {
                        // Clean return means cancellation
                        Ok(()) => {
                            self.set_state(ConnectionState::Disconnected).await;
                            break;
                        }
                        Err(e) => warn!("[Watcher] Transport failure: {}", e),
                    }
                    // `transport` is dropped here: subscriptions and the
                    // connection are gone before a fresh connect happens
                }
                Err(e) => warn!("[Watcher] Connection failed: {}", e),
            }
            self.set_state(ConnectionState::Disconnected).await;
            if self.schedule_reconnect(&cancel).await == ReconnectOutcome::Cancelled {
                break;
            }
        }
        self.set_state(ConnectionState::Disconnected).await;
        info!("[Watcher] Subscriber stopped");
    }

    /// Arms the reconnect timer unless one is already pending; at most one
    /// reconnect attempt is scheduled at a time.
    pub async fn schedule_reconnect(&self, cancel: &CancellationToken) -> ReconnectOutcome {
        if !self.gate.try_arm() {
            debug!("[Watcher] Reconnect already pending, ignoring duplicate request");
            return ReconnectOutcome::Coalesced;
        }
        self.metrics.transport_reconnects.inc();
        info!("[Watcher] Reconnecting in {:?}", RECONNECT_DELAY);
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(RECONNECT_DELAY) => false,
        };
        self.gate.disarm();
        if cancelled {
            ReconnectOutcome::Cancelled
        } else {
            ReconnectOutcome::Scheduled
        }
    }
}
