// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Second-chain attestation client.
//!
//! Writes a receipt for every stored bridge event to the BSC attestation
//! contract. The feature is configuration-gated: without an endpoint, signer
//! key and contract address the client is constructed disabled and `attest`
//! reports unavailable without noise. Submission estimates gas, adds a 20%
//! safety margin, waits for confirmation, and retries up to three times with
//! linear backoff. A failed attestation never invalidates the stored event.

use crate::abi::{BridgeAttestation, Receipt};
use crate::config::AttestationConfig;
use crate::error::{WatchError, WatchResult};
use crate::metrics::WatchMetrics;
use crate::types::{AttestationReceipt, BridgeEvent};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tracing::{debug, info, warn};

/// Total submission attempts per event.
pub const MAX_ATTEMPTS: u32 = 3;
/// Sleep between attempts is `BACKOFF_STEP * attempt_number` (2s, 4s).
const BACKOFF_STEP: Duration = Duration::from_secs(2);

/// The only failure `attest` surfaces: the receipt could not be written.
/// Callers treat this as "event stored but unattested".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationError {
    Unavailable,
}

impl std::fmt::Display for AttestationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attestation unavailable")
    }
}

impl std::error::Error for AttestationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationOutcome {
    /// Hash of the confirmed attestation transaction.
    pub tx_hash: String,
    pub block_number: u64,
}

/// The on-chain surface the client drives. A seam for tests; production uses
/// [`ContractBackend`].
#[async_trait]
pub trait AttestationBackend: Send + Sync {
    async fn submit(&self, tx_hash: [u8; 32], event: &BridgeEvent)
        -> WatchResult<AttestationOutcome>;
    async fn fetch(&self, tx_hash: [u8; 32]) -> WatchResult<AttestationReceipt>;
    async fn fetch_recent(&self, count: u64) -> WatchResult<Vec<AttestationReceipt>>;
    async fn total(&self) -> WatchResult<u64>;
}

pub struct AttestationClient {
    backend: Option<Arc<dyn AttestationBackend>>,
    metrics: Arc<WatchMetrics>,
}

impl AttestationClient {
    /// Builds the client from config. Missing or invalid settings (including
    /// an unreachable endpoint) disable the feature instead of failing.
    pub async fn from_config(config: &AttestationConfig, metrics: Arc<WatchMetrics>) -> Self {
        let Some((rpc_url, contract, private_key)) = config.credentials() else {
            info!("[Attestation] Not configured, on-chain receipts disabled");
            return Self {
                backend: None,
                metrics,
            };
        };
        match ContractBackend::connect(&rpc_url, contract, &private_key).await {
            Ok(backend) => {
                info!("[Attestation] Receipt contract ready at {:?}", contract);
                Self {
                    backend: Some(Arc::new(backend)),
                    metrics,
                }
            }
            Err(e) => {
                warn!("[Attestation] Disabled: {}", e);
                Self {
                    backend: None,
                    metrics,
                }
            }
        }
    }

    pub fn with_backend(backend: Arc<dyn AttestationBackend>, metrics: Arc<WatchMetrics>) -> Self {
        Self {
            backend: Some(backend),
            metrics,
        }
    }

    pub fn disabled(metrics: Arc<WatchMetrics>) -> Self {
        Self {
            backend: None,
            metrics,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Writes an on-chain receipt for the event. At-least-once with
    /// idempotent on-chain effect: the contract rejects a duplicate receipt
    /// for the same hash, and that rejection is consumed here as an ordinary
    /// failed attempt.
    pub async fn attest(
        &self,
        event: &BridgeEvent,
    ) -> Result<AttestationOutcome, AttestationError> {
        let Some(backend) = &self.backend else {
            debug!(
                "[Attestation] Not configured, skipping receipt for {}",
                event.tx_hash
            );
            return Err(AttestationError::Unavailable);
        };
        let tx_hash = match normalize_tx_hash(&event.tx_hash) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(
                    "[Attestation] Rejecting malformed tx hash {}: {}",
                    event.tx_hash, e
                );
                return Err(AttestationError::Unavailable);
            }
        };

        for attempt in 1..=MAX_ATTEMPTS {
            self.metrics.attestation_attempts.inc();
            match backend.submit(tx_hash, event).await {
                Ok(outcome) => {
                    info!(
                        "[Attestation] Receipt {} created for {} (attempt {})",
                        outcome.tx_hash, event.tx_hash, attempt
                    );
                    self.metrics.attestation_success.inc();
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(
                        "[Attestation] Attempt {}/{} failed for {}: {}",
                        attempt, MAX_ATTEMPTS, event.tx_hash, e
                    );
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(BACKOFF_STEP * attempt).await;
                    }
                }
            }
        }
        self.metrics.attestation_unavailable.inc();
        Err(AttestationError::Unavailable)
    }

    /// Receipt lookup. Any failure (disabled, revert, not found, malformed
    /// hash) yields None.
    pub async fn receipt(&self, tx_hash: &str) -> Option<AttestationReceipt> {
        let backend = self.backend.as_ref()?;
        let key = normalize_tx_hash(tx_hash).ok()?;
        backend.fetch(key).await.ok()
    }

    /// Latest receipts from the contract, empty on any failure.
    pub async fn recent_receipts(&self, count: u64) -> Vec<AttestationReceipt> {
        match &self.backend {
            Some(backend) => backend.fetch_recent(count).await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub async fn total_receipts(&self) -> Option<u64> {
        let backend = self.backend.as_ref()?;
        backend.total().await.ok()
    }
}

/// Normalizes a 0x-prefixed transaction hash to its 32-byte value.
///
/// Strict on purpose: inputs shorter than 32 bytes of hex or containing
/// non-hex characters are rejected rather than silently padded to a wrong
/// value. Longer inputs are truncated to the first 32 bytes.
pub fn normalize_tx_hash(tx_hash: &str) -> WatchResult<[u8; 32]> {
    let stripped = tx_hash
        .strip_prefix("0x")
        .ok_or_else(|| WatchError::Decode(format!("tx hash missing 0x prefix: {}", tx_hash)))?;
    let head = stripped.get(..64).ok_or_else(|| {
        WatchError::Decode(format!(
            "tx hash too short ({} hex chars): {}",
            stripped.len(),
            tx_hash
        ))
    })?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(head, &mut out)
        .map_err(|e| WatchError::Decode(format!("invalid hex in tx hash {}: {}", tx_hash, e)))?;
    Ok(out)
}

type AttestationMiddleware = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Production backend over the deployed attestation contract.
pub struct ContractBackend {
    contract: BridgeAttestation<AttestationMiddleware>,
}

impl ContractBackend {
    pub async fn connect(
        rpc_url: &str,
        contract: Address,
        private_key: &str,
    ) -> WatchResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| WatchError::Configuration(format!("invalid attestation rpc url: {}", e)))?;
        let chain_id = provider.get_chainid().await.map_err(|e| {
            WatchError::Transport(format!("failed to query attestation chain id: {}", e))
        })?;
        let wallet = LocalWallet::from_str(private_key)
            .map_err(|e| WatchError::Configuration(format!("invalid attestation signer key: {}", e)))?
            .with_chain_id(chain_id.as_u64());
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        Ok(Self {
            contract: BridgeAttestation::new(contract, client),
        })
    }
}

#[async_trait]
impl AttestationBackend for ContractBackend {
    async fn submit(
        &self,
        tx_hash: [u8; 32],
        event: &BridgeEvent,
    ) -> WatchResult<AttestationOutcome> {
        let from = Address::from_str(&event.from)
            .map_err(|e| WatchError::Decode(format!("bad from address {}: {}", event.from, e)))?;
        let to = Address::from_str(&event.to)
            .map_err(|e| WatchError::Decode(format!("bad to address {}: {}", event.to, e)))?;

        let call = self.contract.create_receipt(
            tx_hash,
            from,
            to,
            event.amount,
            event.direction.as_str().to_string(),
        );
        let gas_estimate = call
            .estimate_gas()
            .await
            .tap_err(|e| debug!("[Attestation] estimate_gas failed for {}: {:?}", event.tx_hash, e))
            .map_err(|e| WatchError::ExternalCapability(format!("gas estimation failed: {}", e)))?;
        // 20% safety margin over the estimate
        let gas_limit = gas_estimate * U256::from(120u64) / U256::from(100u64);
        let pending = call
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| WatchError::ExternalCapability(format!("submission failed: {}", e)))?;
        let receipt = pending
            .await
            .map_err(|e| WatchError::ExternalCapability(format!("confirmation failed: {}", e)))?
            .ok_or_else(|| {
                WatchError::ExternalCapability(
                    "transaction dropped before confirmation".to_string(),
                )
            })?;
        Ok(AttestationOutcome {
            tx_hash: format!("{:?}", receipt.transaction_hash),
            block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
        })
    }

    async fn fetch(&self, tx_hash: [u8; 32]) -> WatchResult<AttestationReceipt> {
        let receipt = self
            .contract
            .get_receipt(tx_hash)
            .call()
            .await
            .map_err(|e| WatchError::ExternalCapability(format!("receipt lookup failed: {}", e)))?;
        Ok(receipt_from_onchain(receipt))
    }

    async fn fetch_recent(&self, count: u64) -> WatchResult<Vec<AttestationReceipt>> {
        let receipts = self
            .contract
            .get_recent_receipts(U256::from(count))
            .call()
            .await
            .map_err(|e| {
                WatchError::ExternalCapability(format!("recent receipts lookup failed: {}", e))
            })?;
        Ok(receipts.into_iter().map(receipt_from_onchain).collect())
    }

    async fn total(&self) -> WatchResult<u64> {
        let total = self
            .contract
            .get_total_receipts()
            .call()
            .await
            .map_err(|e| {
                WatchError::ExternalCapability(format!("total receipts lookup failed: {}", e))
            })?;
        Ok(total.as_u64())
    }
}

fn receipt_from_onchain(receipt: Receipt) -> AttestationReceipt {
    AttestationReceipt {
        tx_hash: format!("0x{}", hex::encode(receipt.tx_hash)),
        from: format!("{:?}", receipt.from),
        to: format!("{:?}", receipt.to),
        amount: receipt.amount.to_string(),
        timestamp: receipt.timestamp.as_u64(),
        block_number: receipt.block_number.as_u64(),
        bridge_direction: receipt.bridge_direction,
        verified: receipt.verified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, EventStatus};
    use ethers::types::U256 as EthU256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_event() -> BridgeEvent {
        BridgeEvent {
            tx_hash: format!("0x{}", "ab".repeat(32)),
            kind: EventKind::DepositFinalized,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            amount: EthU256::from(10u64),
            direction: EventKind::DepositFinalized.direction(),
            block_number: 1,
            observed_at: 0,
            status: EventStatus::Completed,
            attestation_tx_hash: None,
        }
    }

    struct ScriptedBackend {
        calls: AtomicUsize,
        /// Number of leading attempts that fail before one succeeds
        failures: usize,
    }

    impl ScriptedBackend {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
            })
        }
    }

    #[async_trait]
    impl AttestationBackend for ScriptedBackend {
        async fn submit(
            &self,
            _tx_hash: [u8; 32],
            _event: &BridgeEvent,
        ) -> WatchResult<AttestationOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(WatchError::ExternalCapability("execution reverted".to_string()))
            } else {
                Ok(AttestationOutcome {
                    tx_hash: "0xreceipt".to_string(),
                    block_number: 99,
                })
            }
        }

        async fn fetch(&self, _tx_hash: [u8; 32]) -> WatchResult<AttestationReceipt> {
            Err(WatchError::ExternalCapability("not found".to_string()))
        }

        async fn fetch_recent(&self, _count: u64) -> WatchResult<Vec<AttestationReceipt>> {
            Ok(Vec::new())
        }

        async fn total(&self) -> WatchResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_backoff() {
        let backend = ScriptedBackend::failing(usize::MAX);
        let client =
            AttestationClient::with_backend(backend.clone(), WatchMetrics::new_for_test());

        let started = tokio::time::Instant::now();
        let result = client.attest(&make_event()).await;

        // Exactly 3 attempts, then unavailable, never a panic or raw error
        assert_eq!(result, Err(AttestationError::Unavailable));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        // Linear backoff slept at least 2s + 4s between attempts
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt() {
        let backend = ScriptedBackend::failing(1);
        let client =
            AttestationClient::with_backend(backend.clone(), WatchMetrics::new_for_test());

        let outcome = client.attest(&make_event()).await.unwrap();
        assert_eq!(outcome.tx_hash, "0xreceipt");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_client_is_silent_noop() {
        let metrics = WatchMetrics::new_for_test();
        let client = AttestationClient::disabled(metrics.clone());
        assert!(!client.is_enabled());
        assert_eq!(
            client.attest(&make_event()).await,
            Err(AttestationError::Unavailable)
        );
        // No attempts were made at all
        assert_eq!(metrics.attestation_attempts.get(), 0);
        assert!(client.receipt(&make_event().tx_hash).await.is_none());
        assert!(client.recent_receipts(10).await.is_empty());
        assert!(client.total_receipts().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_hash_never_reaches_backend() {
        let backend = ScriptedBackend::failing(0);
        let client =
            AttestationClient::with_backend(backend.clone(), WatchMetrics::new_for_test());
        let mut event = make_event();
        event.tx_hash = "0x1234".to_string();
        assert_eq!(
            client.attest(&event).await,
            Err(AttestationError::Unavailable)
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_normalize_valid_hash() {
        let hash = format!("0x{}", "1f".repeat(32));
        let bytes = normalize_tx_hash(&hash).unwrap();
        assert_eq!(bytes, [0x1f; 32]);
    }

    #[test]
    fn test_normalize_truncates_long_input() {
        // First 32 bytes win, matching the contract key derivation
        let hash = format!("0x{}{}", "ab".repeat(32), "ffff");
        let bytes = normalize_tx_hash(&hash).unwrap();
        assert_eq!(bytes, [0xab; 32]);
    }

    #[test]
    fn test_normalize_rejects_short_missing_prefix_and_non_hex() {
        assert!(normalize_tx_hash("0x1234").is_err());
        assert!(normalize_tx_hash(&"ab".repeat(33)).is_err());
        let non_hex = format!("0x{}", "zz".repeat(32));
        assert!(normalize_tx_hash(&non_hex).is_err());
    }
}
