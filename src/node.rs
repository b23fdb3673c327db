// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Service wiring.
//!
//! Builds every component from config, spawns the long-running tasks, and
//! returns their handles. All tasks share the same cancellation token; the
//! caller decides when to pull it.

use crate::analysis::{AnalysisProvider, AnalysisService, ClaudeAnalysis};
use crate::attestation::AttestationClient;
use crate::config::WatchConfig;
use crate::ingest::run_ingest;
use crate::metrics::{serve_metrics, WatchMetrics};
use crate::monitor::AutonomousMonitor;
use crate::store::EventStore;
use crate::subscriber::{BridgeSubscriber, EthTransportFactory};
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Buffered decoded events between the subscriber and the ingest loop.
const EVENT_CHANNEL_SIZE: usize = 1_024;

pub async fn run_node(
    config: WatchConfig,
    registry: prometheus::Registry,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    config.validate()?;
    let metrics = Arc::new(WatchMetrics::new(&registry));

    let store = EventStore::connect(&config.database_url).await?;
    let attestation = Arc::new(AttestationClient::from_config(&config.attestation, metrics.clone()).await);
    let provider: Arc<dyn AnalysisProvider> = Arc::new(ClaudeAnalysis::from_config(&config.analysis));
    let analysis = Arc::new(AnalysisService::new(
        provider,
        store.clone(),
        config.analysis.cache_ttl,
        metrics.clone(),
    ));

    let contract: Address = config.bridge_contract.parse()?;
    let factory = Arc::new(EthTransportFactory::new(
        config.rpc_url.clone(),
        contract,
        config.poll_interval,
        metrics.clone(),
    ));
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let subscriber = BridgeSubscriber::new(factory, event_tx, metrics.clone());

    let mut handles = Vec::new();
    handles.push(tokio::spawn(subscriber.run(cancel.clone())));
    handles.push(tokio::spawn(run_ingest(
        store.clone(),
        attestation,
        event_rx,
        metrics.clone(),
        cancel.clone(),
    )));

    let monitor = Arc::new(AutonomousMonitor::new(
        store,
        analysis,
        &config.monitor,
        metrics,
    ));
    handles.push(tokio::spawn(monitor.run(cancel.clone())));

    let metrics_port = config.metrics_port;
    handles.push(tokio::spawn(async move {
        if let Err(e) = serve_metrics(registry, metrics_port, cancel).await {
            warn!("Metrics server error: {:?}", e);
        }
    }));

    Ok(handles)
}
