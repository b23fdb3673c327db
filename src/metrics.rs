// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Debug)]
pub struct WatchMetrics {
    pub(crate) events_stored: IntCounter,
    pub(crate) duplicate_events: IntCounter,
    pub(crate) decode_errors: IntCounter,
    pub(crate) store_errors: IntCounter,

    pub(crate) transport_reconnects: IntCounter,
    /// 1 while subscribed, 0 otherwise
    pub(crate) connection_state: IntGauge,
    pub(crate) last_observed_block: IntGauge,

    pub(crate) attestation_attempts: IntCounter,
    pub(crate) attestation_success: IntCounter,
    pub(crate) attestation_unavailable: IntCounter,

    pub(crate) monitor_runs: IntCounter,
    pub(crate) monitor_ticks_skipped: IntCounter,
    pub(crate) alerts_raised: IntCounterVec,

    pub(crate) analysis_requests: IntCounterVec,
    pub(crate) analysis_cache_hits: IntCounterVec,
}

impl WatchMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_stored: register_int_counter_with_registry!(
                "bridgewatch_events_stored",
                "Total number of bridge events written to the store",
                registry,
            )
            .unwrap(),
            duplicate_events: register_int_counter_with_registry!(
                "bridgewatch_duplicate_events",
                "Total number of already-seen events absorbed by the idempotent insert",
                registry,
            )
            .unwrap(),
            decode_errors: register_int_counter_with_registry!(
                "bridgewatch_decode_errors",
                "Total number of logs skipped because they failed to decode",
                registry,
            )
            .unwrap(),
            store_errors: register_int_counter_with_registry!(
                "bridgewatch_store_errors",
                "Total number of event store write failures",
                registry,
            )
            .unwrap(),
            transport_reconnects: register_int_counter_with_registry!(
                "bridgewatch_transport_reconnects",
                "Total number of scheduled transport reconnect attempts",
                registry,
            )
            .unwrap(),
            connection_state: register_int_gauge_with_registry!(
                "bridgewatch_connection_state",
                "1 while the chain subscription is live, 0 otherwise",
                registry,
            )
            .unwrap(),
            last_observed_block: register_int_gauge_with_registry!(
                "bridgewatch_last_observed_block",
                "Block number of the most recently decoded bridge event",
                registry,
            )
            .unwrap(),
            attestation_attempts: register_int_counter_with_registry!(
                "bridgewatch_attestation_attempts",
                "Total number of attestation submission attempts",
                registry,
            )
            .unwrap(),
            attestation_success: register_int_counter_with_registry!(
                "bridgewatch_attestation_success",
                "Total number of successfully confirmed attestation receipts",
                registry,
            )
            .unwrap(),
            attestation_unavailable: register_int_counter_with_registry!(
                "bridgewatch_attestation_unavailable",
                "Total number of events left unattested after exhausting retries",
                registry,
            )
            .unwrap(),
            monitor_runs: register_int_counter_with_registry!(
                "bridgewatch_monitor_runs",
                "Total number of completed autonomous check cycles",
                registry,
            )
            .unwrap(),
            monitor_ticks_skipped: register_int_counter_with_registry!(
                "bridgewatch_monitor_ticks_skipped",
                "Total number of monitor ticks skipped because a check was still running",
                registry,
            )
            .unwrap(),
            alerts_raised: register_int_counter_vec_with_registry!(
                "bridgewatch_alerts_raised",
                "Total number of alerts raised by the autonomous monitor",
                &["alert_type"],
                registry,
            )
            .unwrap(),
            analysis_requests: register_int_counter_vec_with_registry!(
                "bridgewatch_analysis_requests",
                "Total number of external analysis capability invocations",
                &["kind"],
                registry,
            )
            .unwrap(),
            analysis_cache_hits: register_int_counter_vec_with_registry!(
                "bridgewatch_analysis_cache_hits",
                "Total number of analysis requests served from a fresh snapshot",
                &["kind"],
                registry,
            )
            .unwrap(),
        }
    }

    #[cfg(test)]
    pub fn new_for_test() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new(&Registry::new()))
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        return format!("# encoding error: {}\n", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Serves the Prometheus exposition endpoint until cancellation.
pub async fn serve_metrics(
    registry: Registry,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);
    let address = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Metrics server started at port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
