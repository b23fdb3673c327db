// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration.
//!
//! All settings come from environment variables (or a `.env` file loaded in
//! main). The attestation and analysis sections are optional: leaving them
//! unset disables the feature instead of failing startup.

use anyhow::anyhow;
use ethers::types::Address;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Default OP Stack L2StandardBridge predeploy address on opBNB.
pub const DEFAULT_BRIDGE_CONTRACT: &str = "0x4200000000000000000000000000000000000010";

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Source chain RPC endpoint. A `ws://`/`wss://` URL selects the push
    /// subscription transport, anything else selects polling.
    pub rpc_url: String,
    /// Optional HTTP endpoint for range scans (backfill) when `rpc_url` is a
    /// websocket.
    pub http_rpc_url: Option<String>,
    /// The bridge contract to watch.
    pub bridge_contract: String,
    /// SQLite connection string for the event store.
    pub database_url: String,
    /// Polling transport interval.
    pub poll_interval: Duration,
    /// Port for the Prometheus /metrics exporter.
    pub metrics_port: u16,
    pub monitor: MonitorConfig,
    pub attestation: AttestationConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Wall-clock interval between autonomous checks.
    pub check_interval: Duration,
    /// How many recent events each check analyzes.
    pub recent_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            recent_window: 30,
        }
    }
}

/// Second-chain receipt writing. The feature is enabled only when all three
/// values are present and the contract address parses.
#[derive(Debug, Clone, Default)]
pub struct AttestationConfig {
    pub rpc_url: Option<String>,
    pub contract: Option<String>,
    pub private_key: Option<String>,
}

impl AttestationConfig {
    /// Returns the validated credentials, or None when the feature is off.
    pub fn credentials(&self) -> Option<(String, Address, String)> {
        let rpc_url = self.rpc_url.as_ref()?;
        let contract = Address::from_str(self.contract.as_ref()?).ok()?;
        let private_key = self.private_key.as_ref()?;
        if rpc_url.is_empty() || private_key.is_empty() {
            return None;
        }
        Some((rpc_url.clone(), contract, private_key.clone()))
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// API key for the external analysis capability. Unset means the
    /// capability degrades to its documented defaults.
    pub api_key: Option<String>,
    pub model: String,
    /// Snapshot cache TTL for analysis results.
    pub cache_ttl: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            cache_ttl: Duration::from_secs(300),
        }
    }
}

impl WatchConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let rpc_url = std::env::var("OPBNB_RPC_URL")
            .map_err(|_| anyhow!("OPBNB_RPC_URL must be set to the source chain endpoint"))?;
        let http_rpc_url = std::env::var("OPBNB_HTTP_RPC_URL").ok();
        let bridge_contract = std::env::var("OPBNB_BRIDGE_CONTRACT")
            .unwrap_or_else(|_| DEFAULT_BRIDGE_CONTRACT.to_string());
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://bridgewatch.db".to_string());

        let monitor = MonitorConfig {
            check_interval: Duration::from_millis(parse_env("AGENT_CHECK_INTERVAL_MS", 60_000)),
            recent_window: parse_env("AGENT_RECENT_WINDOW", 30),
        };

        let attestation = AttestationConfig {
            rpc_url: std::env::var("BSC_RPC_URL").ok(),
            contract: std::env::var("ATTESTATION_CONTRACT_BSC").ok(),
            private_key: std::env::var("ATTESTATION_PRIVATE_KEY").ok(),
        };

        let analysis = AnalysisConfig {
            api_key: std::env::var("CLAUDE_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("CLAUDE_MODEL")
                .unwrap_or_else(|_| AnalysisConfig::default().model),
            cache_ttl: Duration::from_secs(parse_env("ANALYSIS_CACHE_TTL_SECS", 300)),
        };

        Ok(Self {
            rpc_url,
            http_rpc_url,
            bridge_contract,
            database_url,
            poll_interval: Duration::from_secs(parse_env("POLL_INTERVAL_SECS", 3)),
            metrics_port: parse_env("METRICS_PORT", 9184),
            monitor,
            attestation,
            analysis,
        })
    }

    /// Validates the required settings and logs which optional features are
    /// enabled. Optional sections never fail validation.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc_url.is_empty() {
            return Err(anyhow!("source chain RPC URL is empty"));
        }
        Address::from_str(&self.bridge_contract)
            .map_err(|e| anyhow!("invalid bridge contract address {}: {}", self.bridge_contract, e))?;

        if self.attestation.is_configured() {
            info!("Attestation receipts enabled");
        } else {
            info!("Attestation not configured, on-chain receipts disabled");
        }
        if self.analysis.api_key.is_some() {
            info!("Analysis capability enabled (model {})", self.analysis.model);
        } else {
            info!("Analysis API key not configured, using default responses");
        }
        Ok(())
    }

    /// Endpoint to use for pull-style range scans.
    pub fn scan_rpc_url(&self) -> &str {
        match &self.http_rpc_url {
            Some(url) if !url.is_empty() => url,
            _ => &self.rpc_url,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
