// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ingest pipeline.
//!
//! Consumes decoded events from the subscriber channel, performs the
//! idempotent store write, and hands freshly stored events to a detached
//! attestation task. The attestation call is fire-and-forget relative to this
//! loop: ingestion throughput never waits on the second chain.

use crate::attestation::{AttestationClient, AttestationError};
use crate::metrics::WatchMetrics;
use crate::store::EventStore;
use crate::types::{now_unix, BridgeEvent, ObservedEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub async fn run_ingest(
    store: EventStore,
    attestation: Arc<AttestationClient>,
    mut events: mpsc::Receiver<ObservedEvent>,
    metrics: Arc<WatchMetrics>,
    cancel: CancellationToken,
) {
    info!("[Ingest] Started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            observed = events.recv() => {
                let Some(observed) = observed else { break };
                handle_observed(&store, &attestation, &metrics, observed).await;
            }
        }
    }
    info!("[Ingest] Stopped");
}

async fn handle_observed(
    store: &EventStore,
    attestation: &Arc<AttestationClient>,
    metrics: &Arc<WatchMetrics>,
    observed: ObservedEvent,
) {
    let event = BridgeEvent::from_observation(observed, now_unix());
    match store.insert_event(&event).await {
        Ok(true) => {
            info!(
                "[Ingest] Stored {} {} (block {})",
                event.kind, event.tx_hash, event.block_number
            );
            metrics.events_stored.inc();
            let store = store.clone();
            let client = attestation.clone();
            tokio::spawn(async move {
                annotate_with_receipt(store, client, event).await;
            });
        }
        Ok(false) => {
            debug!("[Ingest] Duplicate event {}, ignoring", event.tx_hash);
            metrics.duplicate_events.inc();
        }
        Err(e) => {
            // At-least-once at this boundary: a transient store failure may
            // lose the event; replay/backfill reconciles
            warn!("[Ingest] Failed to store event {}: {}", event.tx_hash, e);
            metrics.store_errors.inc();
        }
    }
}

/// Runs as its own task per stored event, with retry handled inside the
/// attestation client.
async fn annotate_with_receipt(
    store: EventStore,
    client: Arc<AttestationClient>,
    event: BridgeEvent,
) {
    match client.attest(&event).await {
        Ok(outcome) => match store.set_attestation(&event.tx_hash, &outcome.tx_hash).await {
            Ok(true) => info!(
                "[Ingest] Attestation {} recorded for {}",
                outcome.tx_hash, event.tx_hash
            ),
            Ok(false) => debug!(
                "[Ingest] Attestation for {} already recorded",
                event.tx_hash
            ),
            Err(e) => warn!(
                "[Ingest] Failed to record attestation for {}: {}",
                event.tx_hash, e
            ),
        },
        Err(AttestationError::Unavailable) => {
            debug!("[Ingest] Event {} stored unattested", event.tx_hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use ethers::types::U256;

    fn observed(suffix: u8) -> ObservedEvent {
        ObservedEvent {
            tx_hash: format!("0x{:064x}", suffix),
            kind: EventKind::WithdrawalInitiated,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            amount: U256::from(5u64),
            block_number: 10,
        }
    }

    #[tokio::test]
    async fn test_duplicate_observation_stores_once() {
        let store = EventStore::in_memory().await.unwrap();
        let metrics = WatchMetrics::new_for_test();
        let attestation = Arc::new(AttestationClient::disabled(metrics.clone()));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_ingest(
            store.clone(),
            attestation,
            rx,
            metrics.clone(),
            cancel.clone(),
        ));

        // The same tx hash arrives twice, e.g. streaming overlapping backfill
        tx.send(observed(1)).await.unwrap();
        tx.send(observed(1)).await.unwrap();
        tx.send(observed(2)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.stats().await.unwrap().total, 2);
        assert_eq!(metrics.events_stored.get(), 2);
        assert_eq!(metrics.duplicate_events.get(), 1);
    }

    #[tokio::test]
    async fn test_ingest_stops_on_cancel() {
        let store = EventStore::in_memory().await.unwrap();
        let metrics = WatchMetrics::new_for_test();
        let attestation = Arc::new(AttestationClient::disabled(metrics.clone()));
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_ingest(
            store,
            attestation,
            rx,
            metrics,
            cancel.clone(),
        ));
        cancel.cancel();
        handle.await.unwrap();
    }
}
