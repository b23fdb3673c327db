// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Autonomous monitor.
//!
//! Timer-driven health checks over the event store. At most one check runs at
//! a time: a tick that fires while a check is in flight is skipped entirely,
//! not queued. Each check step is fault-isolated, and nothing a check does can
//! take the process down.

use crate::analysis::AnalysisService;
use crate::config::MonitorConfig;
use crate::metrics::WatchMetrics;
use crate::store::EventStore;
use crate::types::{now_unix, AlertSeverity, BridgeEvent, NewAlert};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pending events older than this are considered stale.
pub const STALE_PENDING_AFTER: Duration = Duration::from_secs(30 * 60);
/// Minimum store size before the failure-rate check applies.
const FAILURE_RATE_MIN_TOTAL: i64 = 5;
/// Failure ratio above which an alert is raised.
const FAILURE_RATE_ALERT_THRESHOLD: f64 = 0.20;
/// Failure ratio above which the alert escalates to high severity.
const FAILURE_RATE_HIGH_THRESHOLD: f64 = 0.50;
/// Stale-pending count above which the alert escalates to high severity.
const STALE_PENDING_HIGH_COUNT: usize = 5;

pub struct AutonomousMonitor {
    store: EventStore,
    analysis: Arc<AnalysisService>,
    check_interval: Duration,
    recent_window: usize,
    running: AtomicBool,
    metrics: Arc<WatchMetrics>,
}

impl AutonomousMonitor {
    pub fn new(
        store: EventStore,
        analysis: Arc<AnalysisService>,
        config: &MonitorConfig,
        metrics: Arc<WatchMetrics>,
    ) -> Self {
        Self {
            store,
            analysis,
            check_interval: config.check_interval,
            recent_window: config.recent_window,
            running: AtomicBool::new(false),
            metrics,
        }
    }

    /// Timer loop. Runs one check immediately, then on every interval tick
    /// until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "[Agent] Started with check interval {:?}",
            self.check_interval
        );
        self.check_once().await;

        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.check_interval,
            self.check_interval,
        );
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.check_once().await;
                }
            }
        }
        info!("[Agent] Stopped");
    }

    /// Runs one check cycle. Returns false when a previous cycle was still in
    /// flight and this tick was skipped.
    pub async fn check_once(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[Agent] Previous check still running, skipping tick");
            self.metrics.monitor_ticks_skipped.inc();
            return false;
        }
        self.metrics.monitor_runs.inc();
        self.run_checks().await;
        self.running.store(false, Ordering::SeqCst);
        true
    }

    async fn run_checks(&self) {
        debug!("[Agent] Running autonomous check");
        let recent = match self.store.recent_events(self.recent_window).await {
            Ok(events) => events,
            Err(e) => {
                warn!("[Agent] Failed to load recent events: {}", e);
                Vec::new()
            }
        };
        if recent.is_empty() {
            debug!("[Agent] No events to analyze");
            return;
        }

        // Each step is isolated: one failing check never blocks the others
        self.check_anomalies(&recent).await;
        self.check_failure_rate().await;
        self.check_stale_pending().await;
        debug!("[Agent] Check complete");
    }

    async fn check_anomalies(&self, recent: &[BridgeEvent]) {
        let report = self.analysis.anomalies(recent).await;
        if !report.anomaly_detected {
            return;
        }
        warn!(
            "[Agent] Anomaly detected [{}]: {}",
            report.severity, report.description
        );
        self.raise_alert(NewAlert {
            alert_type: "autonomous_agent_anomaly".to_string(),
            message: format!("[Auto-Agent] {}", report.description),
            severity: report.severity,
            related_tx_hash: recent.first().map(|event| event.tx_hash.clone()),
        })
        .await;
    }

    async fn check_failure_rate(&self) {
        let stats = match self.store.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("[Agent] Failed to load store stats: {}", e);
                return;
            }
        };
        if stats.total < FAILURE_RATE_MIN_TOTAL {
            return;
        }
        let failure_rate = stats.failed as f64 / stats.total as f64;
        if failure_rate <= FAILURE_RATE_ALERT_THRESHOLD {
            return;
        }
        let severity = if failure_rate > FAILURE_RATE_HIGH_THRESHOLD {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        warn!(
            "[Agent] High failure rate: {:.1}% ({}/{})",
            failure_rate * 100.0,
            stats.failed,
            stats.total
        );
        self.raise_alert(NewAlert {
            alert_type: "autonomous_agent_failure_rate".to_string(),
            message: format!(
                "[Auto-Agent] High failure rate: {:.1}% ({}/{})",
                failure_rate * 100.0,
                stats.failed,
                stats.total
            ),
            severity,
            related_tx_hash: None,
        })
        .await;
    }

    async fn check_stale_pending(&self) {
        let cutoff = now_unix() - STALE_PENDING_AFTER.as_secs() as i64;
        let stale = match self.store.pending_older_than(cutoff).await {
            Ok(events) => events,
            Err(e) => {
                warn!("[Agent] Failed to load pending events: {}", e);
                return;
            }
        };
        if stale.is_empty() {
            return;
        }
        let severity = if stale.len() > STALE_PENDING_HIGH_COUNT {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        warn!("[Agent] {} stale pending transaction(s)", stale.len());
        self.raise_alert(NewAlert {
            alert_type: "autonomous_agent_stale_pending".to_string(),
            message: format!(
                "[Auto-Agent] {} transaction(s) pending over 30 minutes",
                stale.len()
            ),
            severity,
            related_tx_hash: stale.first().map(|event| event.tx_hash.clone()),
        })
        .await;
    }

    async fn raise_alert(&self, alert: NewAlert) {
        self.metrics
            .alerts_raised
            .with_label_values(&[&alert.alert_type])
            .inc();
        if let Err(e) = self.store.insert_alert(&alert, now_unix()).await {
            warn!("[Agent] Failed to persist {} alert: {}", alert.alert_type, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{
        AnalysisProvider, AnomalyReport, Confidence, DelayForecast, TimingAdvice,
    };
    use crate::error::WatchResult;
    use crate::types::{BridgeDirection, EventKind, EventStatus};
    use async_trait::async_trait;
    use ethers::types::U256;
    use std::sync::atomic::AtomicUsize;

    struct StubProvider {
        report: AnomalyReport,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl StubProvider {
        fn quiet() -> Arc<Self> {
            Arc::new(Self {
                report: AnomalyReport {
                    anomaly_detected: false,
                    severity: AlertSeverity::Low,
                    description: "all quiet".to_string(),
                    recommendation: "none".to_string(),
                },
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn anomalous(severity: AlertSeverity) -> Arc<Self> {
            Arc::new(Self {
                report: AnomalyReport {
                    anomaly_detected: true,
                    severity,
                    description: "burst of failures".to_string(),
                    recommendation: "investigate".to_string(),
                },
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                report: AnomalyReport {
                    anomaly_detected: false,
                    severity: AlertSeverity::Low,
                    description: "slow".to_string(),
                    recommendation: "none".to_string(),
                },
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl AnalysisProvider for StubProvider {
        async fn detect_anomalies(&self, _events: &[BridgeEvent]) -> WatchResult<AnomalyReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.report.clone())
        }

        async fn predict_delay(&self, _events: &[BridgeEvent]) -> WatchResult<DelayForecast> {
            Ok(DelayForecast {
                estimated_minutes: 1.0,
                confidence: Confidence::Low,
                reasoning: "stub".to_string(),
            })
        }

        async fn suggest_optimal_time(&self, _events: &[BridgeEvent]) -> WatchResult<TimingAdvice> {
            Ok(TimingAdvice::insufficient_data())
        }
    }

    fn make_event(suffix: u16, status: EventStatus, observed_at: i64) -> BridgeEvent {
        BridgeEvent {
            tx_hash: format!("0x{:064x}", suffix),
            kind: EventKind::DepositFinalized,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            amount: U256::from(100u64),
            direction: BridgeDirection::BscToOpbnb,
            block_number: suffix as u64,
            observed_at,
            status,
            attestation_tx_hash: None,
        }
    }

    async fn make_monitor(provider: Arc<StubProvider>) -> (Arc<AutonomousMonitor>, EventStore) {
        let store = EventStore::in_memory().await.unwrap();
        let metrics = WatchMetrics::new_for_test();
        let analysis = Arc::new(AnalysisService::new(
            provider,
            store.clone(),
            Duration::from_secs(300),
            metrics.clone(),
        ));
        let monitor = Arc::new(AutonomousMonitor::new(
            store.clone(),
            analysis,
            &MonitorConfig::default(),
            metrics,
        ));
        (monitor, store)
    }

    #[tokio::test]
    async fn test_empty_store_is_a_noop() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider.clone()).await;

        assert!(monitor.check_once().await);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(store.alerts(10, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_at_most_one_concurrent_run() {
        let provider = StubProvider::slow(Duration::from_millis(200));
        let (monitor, store) = make_monitor(provider.clone()).await;
        store
            .insert_event(&make_event(1, EventStatus::Completed, now_unix()))
            .await
            .unwrap();

        let first = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.check_once().await })
        };
        // Let the first check reach the slow analysis call
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A tick firing mid-run is skipped entirely, not queued
        assert!(!monitor.check_once().await);
        assert!(first.await.unwrap());

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.metrics.monitor_ticks_skipped.get(), 1);
        assert_eq!(monitor.metrics.monitor_runs.get(), 1);

        // And the guard is released for the next tick
        assert!(monitor.check_once().await);
    }

    #[tokio::test]
    async fn test_anomaly_raises_prefixed_alert() {
        let provider = StubProvider::anomalous(AlertSeverity::High);
        let (monitor, store) = make_monitor(provider).await;
        store
            .insert_event(&make_event(1, EventStatus::Completed, now_unix()))
            .await
            .unwrap();

        monitor.check_once().await;

        let alerts = store.alerts(10, false).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "autonomous_agent_anomaly");
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert!(alerts[0].message.starts_with("[Auto-Agent] "));
        assert!(alerts[0].related_tx_hash.is_some());
    }

    #[tokio::test]
    async fn test_failure_rate_medium_alert() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider).await;
        // 10 events, 3 failed (30%)
        for i in 0..10u16 {
            let status = if i < 3 {
                EventStatus::Failed
            } else {
                EventStatus::Completed
            };
            store
                .insert_event(&make_event(i, status, now_unix()))
                .await
                .unwrap();
        }

        monitor.check_once().await;

        let alerts = store.alerts(10, false).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "autonomous_agent_failure_rate");
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    }

    #[tokio::test]
    async fn test_failure_rate_high_alert() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider).await;
        // 10 events, 6 failed (60%)
        for i in 0..10u16 {
            let status = if i < 6 {
                EventStatus::Failed
            } else {
                EventStatus::Completed
            };
            store
                .insert_event(&make_event(i, status, now_unix()))
                .await
                .unwrap();
        }

        monitor.check_once().await;

        let alerts = store.alerts(10, false).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }

    #[tokio::test]
    async fn test_failure_rate_needs_minimum_population() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider).await;
        // 4 events, 3 failed (75%) - below the 5-event minimum
        for i in 0..4u16 {
            let status = if i < 3 {
                EventStatus::Failed
            } else {
                EventStatus::Completed
            };
            store
                .insert_event(&make_event(i, status, now_unix()))
                .await
                .unwrap();
        }

        monitor.check_once().await;
        assert!(store.alerts(10, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_pending_high_alert() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider).await;
        let stale_at = now_unix() - 2 * STALE_PENDING_AFTER.as_secs() as i64;
        // 6 stale pending events cross the high threshold
        for i in 0..6u16 {
            store
                .insert_event(&make_event(i, EventStatus::Pending, stale_at))
                .await
                .unwrap();
        }

        monitor.check_once().await;

        let alerts = store.alerts(10, false).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "autonomous_agent_stale_pending");
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert!(alerts[0].message.contains("6 transaction(s)"));
    }

    #[tokio::test]
    async fn test_stale_pending_medium_alert() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider).await;
        let stale_at = now_unix() - 2 * STALE_PENDING_AFTER.as_secs() as i64;
        for i in 0..3u16 {
            store
                .insert_event(&make_event(i, EventStatus::Pending, stale_at))
                .await
                .unwrap();
        }

        monitor.check_once().await;

        let alerts = store.alerts(10, false).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    }

    #[tokio::test]
    async fn test_fresh_pending_is_not_stale() {
        let provider = StubProvider::quiet();
        let (monitor, store) = make_monitor(provider).await;
        store
            .insert_event(&make_event(1, EventStatus::Pending, now_unix()))
            .await
            .unwrap();

        monitor.check_once().await;
        assert!(store.alerts(10, false).await.unwrap().is_empty());
    }
}
