// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract ABIs and log decoding.
//!
//! Only two event signatures of the OP Stack L2StandardBridge are recognized;
//! everything else emitted by the contract is skipped by the decode path.

use crate::error::{WatchError, WatchResult};
use crate::types::{EventKind, ObservedEvent};
use ethers::contract::{abigen, EthEvent};
use ethers::core::abi::RawLog;
use ethers::types::{Address, Bytes, Log, U256};

/// `DepositFinalized(address,address,address,address,uint256,bytes)`
#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "DepositFinalized",
    abi = "DepositFinalized(address,address,address,address,uint256,bytes)"
)]
pub struct DepositFinalizedEvent {
    #[ethevent(indexed)]
    pub l1_token: Address,
    #[ethevent(indexed)]
    pub l2_token: Address,
    #[ethevent(indexed)]
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub extra_data: Bytes,
}

/// `WithdrawalInitiated(address,address,address,address,uint256,bytes)`
#[derive(Clone, Debug, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "WithdrawalInitiated",
    abi = "WithdrawalInitiated(address,address,address,address,uint256,bytes)"
)]
pub struct WithdrawalInitiatedEvent {
    #[ethevent(indexed)]
    pub l1_token: Address,
    #[ethevent(indexed)]
    pub l2_token: Address,
    #[ethevent(indexed)]
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub extra_data: Bytes,
}

abigen!(
    BridgeAttestation,
    r#"[
        struct Receipt { bytes32 txHash; address from; address to; uint256 amount; uint256 timestamp; uint256 blockNumber; string bridgeDirection; bool verified; }
        function createReceipt(bytes32 txHash, address from, address to, uint256 amount, string bridgeDirection) external
        function verifyReceipt(bytes32 txHash) external
        function getReceipt(bytes32 txHash) external view returns (Receipt)
        function getRecentReceipts(uint256 count) external view returns (Receipt[])
        function getTotalReceipts() external view returns (uint256)
    ]"#
);

/// Decodes a raw log into one of the two recognized bridge events.
///
/// Returns `Ok(None)` for logs with an unrecognized topic (not an error, the
/// bridge contract emits more than the two signatures we care about). Missing
/// provider fields or a payload that does not match the signature are decode
/// errors; callers skip the log.
pub fn decode_bridge_log(log: &Log) -> WatchResult<Option<ObservedEvent>> {
    let topic0 = *log
        .topics
        .first()
        .ok_or_else(|| WatchError::Decode("log without topics".to_string()))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| WatchError::Decode("log without transaction_hash".to_string()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| WatchError::Decode("log without block_number".to_string()))?
        .as_u64();

    let raw = RawLog::from(log.clone());
    if topic0 == DepositFinalizedEvent::signature() {
        let event = DepositFinalizedEvent::decode_log(&raw)
            .map_err(|e| WatchError::Decode(format!("bad DepositFinalized log: {}", e)))?;
        Ok(Some(ObservedEvent {
            tx_hash: format!("{:?}", tx_hash),
            kind: EventKind::DepositFinalized,
            from: format!("{:?}", event.from),
            to: format!("{:?}", event.to),
            amount: event.amount,
            block_number,
        }))
    } else if topic0 == WithdrawalInitiatedEvent::signature() {
        let event = WithdrawalInitiatedEvent::decode_log(&raw)
            .map_err(|e| WatchError::Decode(format!("bad WithdrawalInitiated log: {}", e)))?;
        Ok(Some(ObservedEvent {
            tx_hash: format!("{:?}", tx_hash),
            kind: EventKind::WithdrawalInitiated,
            from: format!("{:?}", event.from),
            to: format!("{:?}", event.to),
            amount: event.amount,
            block_number,
        }))
    } else {
        Ok(None)
    }
}
