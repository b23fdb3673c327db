// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! External analysis capability boundary.
//!
//! The pipeline only knows the three request/response contracts below; the
//! reasoning itself happens behind [`AnalysisProvider`]. Responses are closed
//! typed structs: a malformed external payload fails deserialization and the
//! caller falls back to the documented defaults instead of trusting shape.

pub mod claude;
pub mod service;

pub use claude::ClaudeAnalysis;
pub use service::AnalysisService;

use crate::error::WatchResult;
use crate::types::{AlertSeverity, BridgeEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Confidence grade attached to forecasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Result of `detectAnomalies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub anomaly_detected: bool,
    pub severity: AlertSeverity,
    pub description: String,
    pub recommendation: String,
}

impl AnomalyReport {
    /// Default when the capability is unavailable or errors.
    pub fn unavailable() -> Self {
        Self {
            anomaly_detected: false,
            severity: AlertSeverity::Low,
            description: "AI analysis unavailable".to_string(),
            recommendation: "Configure the analysis API key".to_string(),
        }
    }

    /// Default when there is nothing to analyze.
    pub fn empty_input() -> Self {
        Self {
            anomaly_detected: false,
            severity: AlertSeverity::Low,
            description: "No transactions to analyze".to_string(),
            recommendation: "N/A".to_string(),
        }
    }
}

/// Result of `predictDelay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayForecast {
    pub estimated_minutes: f64,
    pub confidence: Confidence,
    pub reasoning: String,
}

impl DelayForecast {
    pub fn unavailable() -> Self {
        Self {
            estimated_minutes: 7.0,
            confidence: Confidence::Low,
            reasoning: "AI unavailable".to_string(),
        }
    }

    pub fn insufficient_data() -> Self {
        Self {
            estimated_minutes: 7.0,
            confidence: Confidence::Low,
            reasoning: "Insufficient data".to_string(),
        }
    }
}

/// Result of `suggestOptimalTime`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingAdvice {
    pub suggestion: String,
    pub best_time_window: String,
    pub reasoning: String,
}

impl TimingAdvice {
    pub fn unavailable() -> Self {
        Self {
            suggestion: "AI unavailable".to_string(),
            best_time_window: "N/A".to_string(),
            reasoning: "Configure the analysis API key".to_string(),
        }
    }

    pub fn insufficient_data() -> Self {
        Self {
            suggestion: "Insufficient data for optimization".to_string(),
            best_time_window: "N/A".to_string(),
            reasoning: "Need more historical data".to_string(),
        }
    }
}

/// The three analysis contracts. Implementations may be unavailable; they
/// signal that with an error and callers degrade to defaults, never crash.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn detect_anomalies(&self, events: &[BridgeEvent]) -> WatchResult<AnomalyReport>;
    async fn predict_delay(&self, events: &[BridgeEvent]) -> WatchResult<DelayForecast>;
    async fn suggest_optimal_time(&self, events: &[BridgeEvent]) -> WatchResult<TimingAdvice>;
}
