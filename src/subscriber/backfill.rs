// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Best-effort historical range scan.
//!
//! Walks a block range in fixed-size chunks and pushes every decoded event
//! through the store's idempotent insert, so overlap with the live
//! subscription is harmless. A chunk that fails to fetch is logged and
//! skipped; backfill is not authoritative and does not retry.

use crate::abi::decode_bridge_log;
use crate::error::{WatchError, WatchResult};
use crate::store::EventStore;
use crate::types::{now_unix, BridgeEvent};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter};
use std::sync::Arc;
use tracing::{info, warn};

/// Blocks per scan chunk.
pub const BACKFILL_CHUNK_SIZE: u64 = 5_000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    pub inserted: u64,
    pub duplicates: u64,
    pub failed_chunks: u64,
    pub decode_errors: u64,
    pub store_errors: u64,
}

pub struct BackfillScanner {
    provider: Arc<Provider<Http>>,
    contract: Address,
}

impl BackfillScanner {
    pub fn new(rpc_url: &str, contract: Address) -> WatchResult<Self> {
        if rpc_url.starts_with("ws") {
            return Err(WatchError::Configuration(
                "backfill requires an http endpoint".to_string(),
            ));
        }
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| WatchError::Configuration(format!("invalid rpc url: {}", e)))?;
        Ok(Self {
            provider: Arc::new(provider),
            contract,
        })
    }

    /// Scans `[from_block, to_block]` inclusive and stores everything that
    /// decodes. Only the range arguments themselves can fail the call.
    pub async fn scan_range(
        &self,
        store: &EventStore,
        from_block: u64,
        to_block: u64,
    ) -> WatchResult<BackfillSummary> {
        if from_block > to_block {
            return Err(WatchError::Configuration(format!(
                "invalid backfill range {}-{}",
                from_block, to_block
            )));
        }
        info!(
            "[Backfill] Scanning blocks {}-{} in chunks of {}",
            from_block, to_block, BACKFILL_CHUNK_SIZE
        );

        let mut summary = BackfillSummary::default();
        for (start, end) in chunk_ranges(from_block, to_block) {
            let filter = Filter::new()
                .address(self.contract)
                .from_block(start)
                .to_block(end);
            let logs = match self.provider.get_logs(&filter).await {
                Ok(logs) => logs,
                Err(e) => {
                    // Per-chunk failure is skipped, not retried
                    warn!("[Backfill] Skipping blocks {}-{}: {}", start, end, e);
                    summary.failed_chunks += 1;
                    continue;
                }
            };

            for log in &logs {
                match decode_bridge_log(log) {
                    Ok(Some(observed)) => {
                        let event = BridgeEvent::from_observation(observed, now_unix());
                        match store.insert_event(&event).await {
                            Ok(true) => summary.inserted += 1,
                            Ok(false) => summary.duplicates += 1,
                            Err(e) => {
                                warn!("[Backfill] Failed to store {}: {}", event.tx_hash, e);
                                summary.store_errors += 1;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("[Backfill] Skipping undecodable log: {}", e);
                        summary.decode_errors += 1;
                    }
                }
            }
        }

        info!(
            "[Backfill] Done: {} inserted, {} duplicates, {} chunks skipped",
            summary.inserted, summary.duplicates, summary.failed_chunks
        );
        Ok(summary)
    }
}

/// Splits an inclusive block range into `BACKFILL_CHUNK_SIZE`-sized pieces.
fn chunk_ranges(from_block: u64, to_block: u64) -> Vec<(u64, u64)> {
    let mut chunks = Vec::new();
    let mut start = from_block;
    while start <= to_block {
        let end = std::cmp::min(start + BACKFILL_CHUNK_SIZE - 1, to_block);
        chunks.push((start, end));
        start = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_exact_multiple() {
        let chunks = chunk_ranges(0, 9_999);
        assert_eq!(chunks, vec![(0, 4_999), (5_000, 9_999)]);
    }

    #[test]
    fn test_chunk_ranges_with_remainder() {
        let chunks = chunk_ranges(100, 12_000);
        assert_eq!(
            chunks,
            vec![(100, 5_099), (5_100, 10_099), (10_100, 12_000)]
        );
    }

    #[test]
    fn test_chunk_ranges_single_block() {
        assert_eq!(chunk_ranges(7, 7), vec![(7, 7)]);
    }

    #[test]
    fn test_scanner_rejects_websocket_url() {
        let err = BackfillScanner::new("wss://node.invalid/ws", Address::zero()).unwrap_err();
        assert_eq!(err.error_type(), "configuration");
    }
}
