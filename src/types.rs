// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core data model: bridge events, alerts and analysis snapshots.
//!
//! These are pure data types shared between the subscriber, the event store,
//! the attestation client and the autonomous monitor.

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as unix seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The two bridge event signatures this service decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    DepositFinalized,
    WithdrawalInitiated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DepositFinalized => "DepositFinalized",
            EventKind::WithdrawalInitiated => "WithdrawalInitiated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DepositFinalized" => Some(EventKind::DepositFinalized),
            "WithdrawalInitiated" => Some(EventKind::WithdrawalInitiated),
            _ => None,
        }
    }

    /// Route label derived from which event signature fired.
    pub fn direction(&self) -> BridgeDirection {
        match self {
            EventKind::DepositFinalized => BridgeDirection::BscToOpbnb,
            EventKind::WithdrawalInitiated => BridgeDirection::OpbnbToBsc,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical route label for a bridge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeDirection {
    BscToOpbnb,
    OpbnbToBsc,
}

impl BridgeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeDirection::BscToOpbnb => "BSC->opBNB",
            BridgeDirection::OpbnbToBsc => "opBNB->BSC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BSC->opBNB" => Some(BridgeDirection::BscToOpbnb),
            "opBNB->BSC" => Some(BridgeDirection::OpbnbToBsc),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EventStatus::Pending),
            "completed" => Some(EventStatus::Completed),
            "failed" => Some(EventStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded occurrence straight off the chain transport, before storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedEvent {
    pub tx_hash: String,
    pub kind: EventKind,
    pub from: String,
    pub to: String,
    pub amount: U256,
    pub block_number: u64,
}

/// An immutable observation of a bridge action, as persisted.
///
/// `tx_hash` is globally unique in the store. The only mutation a record ever
/// sees is the one-time null->set transition of `attestation_tx_hash` (which
/// also flips `status` to completed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub tx_hash: String,
    pub kind: EventKind,
    pub from: String,
    pub to: String,
    pub amount: U256,
    pub direction: BridgeDirection,
    pub block_number: u64,
    /// Ingestion-time unix seconds, not chain block time.
    pub observed_at: i64,
    pub status: EventStatus,
    pub attestation_tx_hash: Option<String>,
}

impl BridgeEvent {
    /// Builds the record for a chain-confirmed occurrence. Events observed on
    /// chain are terminal on ingestion, so status starts at completed.
    pub fn from_observation(observed: ObservedEvent, observed_at: i64) -> Self {
        let direction = observed.kind.direction();
        Self {
            tx_hash: observed.tx_hash,
            kind: observed.kind,
            from: observed.from,
            to: observed.to,
            amount: observed.amount,
            direction,
            block_number: observed.block_number,
            observed_at,
            status: EventStatus::Completed,
            attestation_tx_hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(AlertSeverity::Low),
            "medium" => Some(AlertSeverity::Medium),
            "high" => Some(AlertSeverity::High),
            _ => None,
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored alert. Only the read flag ever changes after insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: i64,
    pub alert_type: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub related_tx_hash: Option<String>,
    pub created_at: i64,
    pub is_read: bool,
}

/// An alert about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub alert_type: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub related_tx_hash: Option<String>,
}

/// The analysis result kinds that get snapshot-cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Anomalies,
    Delay,
    OptimalTime,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Anomalies => "anomalies",
            AnalysisKind::Delay => "delay",
            AnalysisKind::OptimalTime => "optimal_time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "anomalies" => Some(AnalysisKind::Anomalies),
            "delay" => Some(AnalysisKind::Delay),
            "optimal_time" => Some(AnalysisKind::OptimalTime),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cached result of one external-capability invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSnapshot {
    pub id: i64,
    pub kind: AnalysisKind,
    pub input_summary: serde_json::Value,
    pub result: serde_json::Value,
    pub severity: AlertSeverity,
    pub created_at: i64,
}

/// Read-only mirror of the on-chain attestation receipt struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReceipt {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub timestamp: u64,
    pub block_number: u64,
    pub bridge_direction: String,
    pub verified: bool,
}
