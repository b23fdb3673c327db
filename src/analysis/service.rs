// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Snapshot-backed analysis cache.
//!
//! Every result kind is cached as an `AnalysisSnapshot` with a fixed TTL: a
//! fresh-enough snapshot short-circuits the external capability entirely, a
//! miss invokes the provider and writes a new snapshot on success. Degraded
//! default results are never cached, so a capability coming online is picked
//! up immediately. Snapshots are advisory cache entries; last writer wins.

use super::{AnalysisProvider, AnomalyReport, DelayForecast, TimingAdvice};
use crate::metrics::WatchMetrics;
use crate::store::EventStore;
use crate::types::{now_unix, AlertSeverity, AnalysisKind, BridgeEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default snapshot TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

pub struct AnalysisService {
    provider: Arc<dyn AnalysisProvider>,
    store: EventStore,
    ttl: Duration,
    metrics: Arc<WatchMetrics>,
}

impl AnalysisService {
    pub fn new(
        provider: Arc<dyn AnalysisProvider>,
        store: EventStore,
        ttl: Duration,
        metrics: Arc<WatchMetrics>,
    ) -> Self {
        Self {
            provider,
            store,
            ttl,
            metrics,
        }
    }

    /// Anomaly detection over the given recent events. Never fails: on
    /// capability errors the documented default is returned (uncached).
    pub async fn anomalies(&self, events: &[BridgeEvent]) -> AnomalyReport {
        if let Some(report) = self.cached(AnalysisKind::Anomalies).await {
            return report;
        }
        self.metrics
            .analysis_requests
            .with_label_values(&[AnalysisKind::Anomalies.as_str()])
            .inc();
        match self.provider.detect_anomalies(events).await {
            Ok(report) => {
                let severity = report.severity;
                self.write_snapshot(AnalysisKind::Anomalies, events.len(), &report, severity)
                    .await;
                report
            }
            Err(e) => {
                warn!("[Analysis] Anomaly detection unavailable: {}", e);
                AnomalyReport::unavailable()
            }
        }
    }

    pub async fn delay(&self, events: &[BridgeEvent]) -> DelayForecast {
        if let Some(forecast) = self.cached(AnalysisKind::Delay).await {
            return forecast;
        }
        self.metrics
            .analysis_requests
            .with_label_values(&[AnalysisKind::Delay.as_str()])
            .inc();
        match self.provider.predict_delay(events).await {
            Ok(forecast) => {
                self.write_snapshot(AnalysisKind::Delay, events.len(), &forecast, AlertSeverity::Low)
                    .await;
                forecast
            }
            Err(e) => {
                warn!("[Analysis] Delay prediction unavailable: {}", e);
                DelayForecast::unavailable()
            }
        }
    }

    pub async fn optimal_time(&self, events: &[BridgeEvent]) -> TimingAdvice {
        if let Some(advice) = self.cached(AnalysisKind::OptimalTime).await {
            return advice;
        }
        self.metrics
            .analysis_requests
            .with_label_values(&[AnalysisKind::OptimalTime.as_str()])
            .inc();
        match self.provider.suggest_optimal_time(events).await {
            Ok(advice) => {
                self.write_snapshot(
                    AnalysisKind::OptimalTime,
                    events.len(),
                    &advice,
                    AlertSeverity::Low,
                )
                .await;
                advice
            }
            Err(e) => {
                warn!("[Analysis] Timing suggestion unavailable: {}", e);
                TimingAdvice::unavailable()
            }
        }
    }

    async fn cached<T: DeserializeOwned>(&self, kind: AnalysisKind) -> Option<T> {
        let min_created_at = now_unix() - self.ttl.as_secs() as i64;
        match self.store.latest_snapshot(kind, min_created_at).await {
            Ok(Some(snapshot)) => match serde_json::from_value(snapshot.result) {
                Ok(value) => {
                    debug!("[Analysis] Serving {} from snapshot cache", kind);
                    self.metrics
                        .analysis_cache_hits
                        .with_label_values(&[kind.as_str()])
                        .inc();
                    Some(value)
                }
                Err(e) => {
                    warn!("[Analysis] Discarding unreadable {} snapshot: {}", kind, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("[Analysis] Snapshot lookup failed for {}: {}", kind, e);
                None
            }
        }
    }

    async fn write_snapshot<T: Serialize>(
        &self,
        kind: AnalysisKind,
        input_events: usize,
        result: &T,
        severity: AlertSeverity,
    ) {
        let Ok(result) = serde_json::to_value(result) else {
            return;
        };
        let input_summary = serde_json::json!({ "txCount": input_events });
        if let Err(e) = self
            .store
            .insert_snapshot(kind, &input_summary, &result, severity, now_unix())
            .await
        {
            warn!("[Analysis] Failed to cache {} snapshot: {}", kind, e);
        }
    }
}
