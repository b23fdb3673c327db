// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable event store backed by SQLite.
//!
//! Single source of truth for everything downstream: bridge events keyed by
//! transaction hash, alerts, and analysis snapshots. Inserts are idempotent
//! (`INSERT OR IGNORE` on the `tx_hash` primary key) so the streaming and
//! backfill paths can overlap freely. The only mutations are the one-time
//! attestation annotation and the alert read flag.

use crate::error::{WatchError, WatchResult};
use crate::types::{
    Alert, AlertSeverity, AnalysisKind, AnalysisSnapshot, BridgeDirection, BridgeEvent,
    EventKind, EventStatus, NewAlert,
};
use ethers::types::U256;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bridge_events (
    tx_hash TEXT PRIMARY KEY,
    event_kind TEXT NOT NULL,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    amount TEXT NOT NULL,
    direction TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    observed_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attestation_tx_hash TEXT
);
CREATE INDEX IF NOT EXISTS idx_bridge_events_observed_at ON bridge_events(observed_at);
CREATE INDEX IF NOT EXISTS idx_bridge_events_status ON bridge_events(status);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_type TEXT NOT NULL,
    message TEXT NOT NULL,
    severity TEXT NOT NULL,
    related_tx_hash TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);

CREATE TABLE IF NOT EXISTS analysis_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    analysis_type TEXT NOT NULL,
    input_summary TEXT NOT NULL,
    result TEXT NOT NULL,
    severity TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analysis_snapshots_type_time
    ON analysis_snapshots(analysis_type, created_at);
"#;

const EVENT_COLUMNS: &str = "tx_hash, event_kind, from_address, to_address, amount, direction, \
                             block_number, observed_at, status, attestation_tx_hash";

type EventRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    String,
    Option<String>,
);

/// Aggregate counts over the full store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub pending: i64,
}

#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    /// Opens (creating if missing) the store at the given SQLite URL.
    pub async fn connect(database_url: &str) -> WatchResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| WatchError::Persistence(format!("invalid database url: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| WatchError::Persistence(format!("failed to open database: {}", e)))?;
        let store = Self { pool };
        store.init_schema().await?;
        info!("Event store initialized at {}", database_url);
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps every statement
    /// on the same transient database.
    pub async fn in_memory() -> WatchResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| WatchError::Persistence(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| WatchError::Persistence(e.to_string()))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> WatchResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| WatchError::Persistence(format!("schema init failed: {}", e)))?;
        Ok(())
    }

    // --- Bridge events ---

    /// Idempotent insert keyed by `tx_hash`. Returns true when a new row was
    /// written, false when the hash was already present (the existing row is
    /// left untouched, whatever the new payload says).
    pub async fn insert_event(&self, event: &BridgeEvent) -> WatchResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO bridge_events \
             (tx_hash, event_kind, from_address, to_address, amount, direction, \
              block_number, observed_at, status, attestation_tx_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&event.tx_hash)
        .bind(event.kind.as_str())
        .bind(&event.from)
        .bind(&event.to)
        .bind(event.amount.to_string())
        .bind(event.direction.as_str())
        .bind(event.block_number as i64)
        .bind(event.observed_at)
        .bind(event.status.as_str())
        .bind(event.attestation_tx_hash.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("insert_event failed: {}", e)))?;
        Ok(result.rows_affected() == 1)
    }

    /// Records the second-chain receipt hash and flips status to completed.
    /// The annotation is null->set only: a row that already carries an
    /// attestation hash is never overwritten. Returns true when the row was
    /// annotated by this call.
    pub async fn set_attestation(
        &self,
        tx_hash: &str,
        attestation_tx_hash: &str,
    ) -> WatchResult<bool> {
        let result = sqlx::query(
            "UPDATE bridge_events SET attestation_tx_hash = ?1, status = ?2 \
             WHERE tx_hash = ?3 AND attestation_tx_hash IS NULL",
        )
        .bind(attestation_tx_hash)
        .bind(EventStatus::Completed.as_str())
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("set_attestation failed: {}", e)))?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_event(&self, tx_hash: &str) -> WatchResult<Option<BridgeEvent>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bridge_events WHERE tx_hash = ?1",
            EVENT_COLUMNS
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("get_event failed: {}", e)))?;
        row.map(row_to_event).transpose()
    }

    /// Most recently observed events, newest first.
    pub async fn recent_events(&self, limit: usize) -> WatchResult<Vec<BridgeEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bridge_events ORDER BY observed_at DESC, block_number DESC LIMIT ?1",
            EVENT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("recent_events failed: {}", e)))?;
        rows.into_iter().map(row_to_event).collect()
    }

    /// Pending events observed strictly before the cutoff, oldest first.
    pub async fn pending_older_than(&self, cutoff: i64) -> WatchResult<Vec<BridgeEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bridge_events WHERE status = ?1 AND observed_at < ?2 \
             ORDER BY observed_at ASC",
            EVENT_COLUMNS
        ))
        .bind(EventStatus::Pending.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("pending_older_than failed: {}", e)))?;
        rows.into_iter().map(row_to_event).collect()
    }

    pub async fn stats(&self) -> WatchResult<StoreStats> {
        let (total, completed, failed, pending): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
             COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) \
             FROM bridge_events",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("stats failed: {}", e)))?;
        Ok(StoreStats {
            total,
            completed,
            failed,
            pending,
        })
    }

    // --- Alerts ---

    pub async fn insert_alert(&self, alert: &NewAlert, created_at: i64) -> WatchResult<i64> {
        let result = sqlx::query(
            "INSERT INTO alerts (alert_type, message, severity, related_tx_hash, is_read, created_at) \
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        )
        .bind(&alert.alert_type)
        .bind(&alert.message)
        .bind(alert.severity.as_str())
        .bind(alert.related_tx_hash.as_deref())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("insert_alert failed: {}", e)))?;
        Ok(result.last_insert_rowid())
    }

    /// Latest alerts, newest first, optionally unread only.
    pub async fn alerts(&self, limit: usize, unread_only: bool) -> WatchResult<Vec<Alert>> {
        let rows: Vec<(i64, String, String, String, Option<String>, i64, i64)> = if unread_only {
            sqlx::query_as(
                "SELECT id, alert_type, message, severity, related_tx_hash, is_read, created_at \
                 FROM alerts WHERE is_read = 0 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as(
                "SELECT id, alert_type, message, severity, related_tx_hash, is_read, created_at \
                 FROM alerts ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| WatchError::Persistence(format!("alerts failed: {}", e)))?;

        rows.into_iter()
            .map(
                |(id, alert_type, message, severity, related_tx_hash, is_read, created_at)| {
                    Ok(Alert {
                        id,
                        alert_type,
                        message,
                        severity: parse_severity(&severity)?,
                        related_tx_hash,
                        created_at,
                        is_read: is_read != 0,
                    })
                },
            )
            .collect()
    }

    /// Flips the read flag. The only mutation alerts ever see.
    pub async fn mark_alert_read(&self, id: i64) -> WatchResult<bool> {
        let result = sqlx::query("UPDATE alerts SET is_read = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| WatchError::Persistence(format!("mark_alert_read failed: {}", e)))?;
        Ok(result.rows_affected() == 1)
    }

    // --- Analysis snapshots ---

    pub async fn insert_snapshot(
        &self,
        kind: AnalysisKind,
        input_summary: &serde_json::Value,
        result: &serde_json::Value,
        severity: AlertSeverity,
        created_at: i64,
    ) -> WatchResult<i64> {
        let result = sqlx::query(
            "INSERT INTO analysis_snapshots (analysis_type, input_summary, result, severity, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(kind.as_str())
        .bind(input_summary.to_string())
        .bind(result.to_string())
        .bind(severity.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("insert_snapshot failed: {}", e)))?;
        Ok(result.last_insert_rowid())
    }

    /// Freshest snapshot of the given kind created at or after `min_created_at`.
    /// A snapshot whose payload no longer parses is treated as a cache miss.
    pub async fn latest_snapshot(
        &self,
        kind: AnalysisKind,
        min_created_at: i64,
    ) -> WatchResult<Option<AnalysisSnapshot>> {
        let row: Option<(i64, String, String, String, String, i64)> = sqlx::query_as(
            "SELECT id, analysis_type, input_summary, result, severity, created_at \
             FROM analysis_snapshots WHERE analysis_type = ?1 AND created_at >= ?2 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .bind(min_created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WatchError::Persistence(format!("latest_snapshot failed: {}", e)))?;

        let Some((id, analysis_type, input_summary, result, severity, created_at)) = row else {
            return Ok(None);
        };
        let (Ok(input_summary), Ok(result)) = (
            serde_json::from_str(&input_summary),
            serde_json::from_str(&result),
        ) else {
            return Ok(None);
        };
        let Some(kind) = AnalysisKind::parse(&analysis_type) else {
            return Ok(None);
        };
        Ok(Some(AnalysisSnapshot {
            id,
            kind,
            input_summary,
            result,
            severity: parse_severity(&severity)?,
            created_at,
        }))
    }
}

fn parse_severity(s: &str) -> WatchResult<AlertSeverity> {
    AlertSeverity::parse(s)
        .ok_or_else(|| WatchError::Persistence(format!("unknown severity in store: {}", s)))
}

fn row_to_event(row: EventRow) -> WatchResult<BridgeEvent> {
    let (
        tx_hash,
        event_kind,
        from,
        to,
        amount,
        direction,
        block_number,
        observed_at,
        status,
        attestation_tx_hash,
    ) = row;
    Ok(BridgeEvent {
        tx_hash,
        kind: EventKind::parse(&event_kind)
            .ok_or_else(|| WatchError::Persistence(format!("unknown event kind: {}", event_kind)))?,
        from,
        to,
        amount: U256::from_dec_str(&amount)
            .map_err(|e| WatchError::Persistence(format!("bad amount {}: {}", amount, e)))?,
        direction: BridgeDirection::parse(&direction)
            .ok_or_else(|| WatchError::Persistence(format!("unknown direction: {}", direction)))?,
        block_number: block_number as u64,
        observed_at,
        status: EventStatus::parse(&status)
            .ok_or_else(|| WatchError::Persistence(format!("unknown status: {}", status)))?,
        attestation_tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, EventStatus};

    fn make_event(suffix: u8, status: EventStatus, observed_at: i64) -> BridgeEvent {
        BridgeEvent {
            tx_hash: format!("0x{:064x}", suffix),
            kind: EventKind::DepositFinalized,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            amount: U256::from(1_000_000_000u64),
            direction: BridgeDirection::BscToOpbnb,
            block_number: 100 + suffix as u64,
            observed_at,
            status,
            attestation_tx_hash: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = EventStore::in_memory().await.unwrap();
        let event = make_event(1, EventStatus::Completed, 1000);
        assert!(store.insert_event(&event).await.unwrap());

        // Second insert with a different payload must not replace the row
        let mut conflicting = event.clone();
        conflicting.amount = U256::from(42u64);
        conflicting.block_number = 9999;
        assert!(!store.insert_event(&conflicting).await.unwrap());

        let stored = store.get_event(&event.tx_hash).await.unwrap().unwrap();
        assert_eq!(stored, event);
        assert_eq!(store.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_attestation_sets_once() {
        let store = EventStore::in_memory().await.unwrap();
        let event = make_event(2, EventStatus::Pending, 1000);
        store.insert_event(&event).await.unwrap();

        assert!(store.set_attestation(&event.tx_hash, "0xatt1").await.unwrap());
        let stored = store.get_event(&event.tx_hash).await.unwrap().unwrap();
        assert_eq!(stored.attestation_tx_hash.as_deref(), Some("0xatt1"));
        assert_eq!(stored.status, EventStatus::Completed);

        // Annotation is null->set only
        assert!(!store.set_attestation(&event.tx_hash, "0xatt2").await.unwrap());
        let stored = store.get_event(&event.tx_hash).await.unwrap().unwrap();
        assert_eq!(stored.attestation_tx_hash.as_deref(), Some("0xatt1"));

        // Unknown hash is a no-op, not an error
        assert!(!store.set_attestation("0xmissing", "0xatt3").await.unwrap());
    }

    #[tokio::test]
    async fn test_recent_events_ordering_and_limit() {
        let store = EventStore::in_memory().await.unwrap();
        for i in 0..5u8 {
            store
                .insert_event(&make_event(i, EventStatus::Completed, 1000 + i as i64))
                .await
                .unwrap();
        }
        let recent = store.recent_events(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].observed_at, 1004);
        assert_eq!(recent[2].observed_at, 1002);
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let store = EventStore::in_memory().await.unwrap();
        store
            .insert_event(&make_event(1, EventStatus::Completed, 1))
            .await
            .unwrap();
        store
            .insert_event(&make_event(2, EventStatus::Failed, 2))
            .await
            .unwrap();
        store
            .insert_event(&make_event(3, EventStatus::Failed, 3))
            .await
            .unwrap();
        store
            .insert_event(&make_event(4, EventStatus::Pending, 4))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn test_stats_on_empty_store() {
        let store = EventStore::in_memory().await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_pending_older_than() {
        let store = EventStore::in_memory().await.unwrap();
        store
            .insert_event(&make_event(1, EventStatus::Pending, 100))
            .await
            .unwrap();
        store
            .insert_event(&make_event(2, EventStatus::Pending, 500))
            .await
            .unwrap();
        store
            .insert_event(&make_event(3, EventStatus::Completed, 100))
            .await
            .unwrap();

        let stale = store.pending_older_than(200).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].observed_at, 100);
        assert_eq!(stale[0].status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn test_alerts_round_trip() {
        let store = EventStore::in_memory().await.unwrap();
        let id = store
            .insert_alert(
                &NewAlert {
                    alert_type: "autonomous_agent_anomaly".to_string(),
                    message: "[Auto-Agent] something odd".to_string(),
                    severity: AlertSeverity::High,
                    related_tx_hash: Some("0xabc".to_string()),
                },
                1000,
            )
            .await
            .unwrap();

        let alerts = store.alerts(10, true).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, id);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert!(!alerts[0].is_read);

        assert!(store.mark_alert_read(id).await.unwrap());
        assert!(store.alerts(10, true).await.unwrap().is_empty());
        assert_eq!(store.alerts(10, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_ttl_boundary() {
        let store = EventStore::in_memory().await.unwrap();
        let payload = serde_json::json!({"anomalyDetected": false});
        store
            .insert_snapshot(
                AnalysisKind::Anomalies,
                &serde_json::json!({"txCount": 5}),
                &payload,
                AlertSeverity::Low,
                1000,
            )
            .await
            .unwrap();

        // Fresh enough
        let hit = store
            .latest_snapshot(AnalysisKind::Anomalies, 1000)
            .await
            .unwrap();
        assert!(hit.is_some());
        assert_eq!(hit.unwrap().result, payload);

        // Too old
        assert!(store
            .latest_snapshot(AnalysisKind::Anomalies, 1001)
            .await
            .unwrap()
            .is_none());

        // Different kind is a miss
        assert!(store
            .latest_snapshot(AnalysisKind::Delay, 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_latest_snapshot_picks_newest() {
        let store = EventStore::in_memory().await.unwrap();
        for (ts, flag) in [(100, false), (300, true), (200, false)] {
            store
                .insert_snapshot(
                    AnalysisKind::Delay,
                    &serde_json::json!({}),
                    &serde_json::json!({ "latest": flag }),
                    AlertSeverity::Low,
                    ts,
                )
                .await
                .unwrap();
        }
        let snapshot = store
            .latest_snapshot(AnalysisKind::Delay, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.created_at, 300);
        assert_eq!(snapshot.result["latest"], true);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/bridgewatch.db", dir.path().display());

        {
            let store = EventStore::connect(&url).await.unwrap();
            store
                .insert_event(&make_event(7, EventStatus::Completed, 42))
                .await
                .unwrap();
        }

        let reopened = EventStore::connect(&url).await.unwrap();
        let stored = reopened
            .get_event(&format!("0x{:064x}", 7u8))
            .await
            .unwrap();
        assert!(stored.is_some());
        assert_eq!(stored.unwrap().observed_at, 42);
    }
}
