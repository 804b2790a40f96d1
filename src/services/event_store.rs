// Event Store
// Purpose: Regression event rows and their lifecycle. The store enforces
// the state machine: open states may move forward, terminal states are
// frozen, and a partial unique index keeps at most one open event per
// (fingerprint, metric).

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;

use crate::models::{EventStatus, RegressionEvent, Severity, TrackedMetric};
use crate::utils::{MonitorError, MonitorResult};

/// Raw row shape; status/severity/metric live as TEXT in SQLite.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    fingerprint_id: i64,
    instance_name: String,
    database_name: String,
    metric: String,
    status: String,
    severity: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    baseline_mean: f64,
    current_value: f64,
    magnitude: f64,
    clear_streak: i64,
}

impl EventRow {
    fn into_event(self) -> MonitorResult<RegressionEvent> {
        Ok(RegressionEvent {
            id: self.id,
            fingerprint_id: self.fingerprint_id,
            instance_name: self.instance_name,
            database_name: self.database_name,
            metric: self
                .metric
                .parse()
                .map_err(MonitorError::internal)?,
            status: self
                .status
                .parse()
                .map_err(MonitorError::internal)?,
            severity: self
                .severity
                .parse()
                .map_err(MonitorError::internal)?,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            baseline_mean: self.baseline_mean,
            current_value: self.current_value,
            magnitude: self.magnitude,
            clear_streak: self.clear_streak,
        })
    }
}

#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The open event for (fingerprint, metric), if one exists. The partial
    /// unique index guarantees at most one.
    pub async fn open_event(
        &self,
        fingerprint_id: i64,
        metric: TrackedMetric,
    ) -> MonitorResult<Option<RegressionEvent>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT * FROM regression_events
             WHERE fingerprint_id = ? AND metric = ?
               AND status IN ('new', 'acknowledged')",
        )
        .bind(fingerprint_id)
        .bind(metric.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EventRow::into_event).transpose()
    }

    /// Open a fresh event in state New.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_new(
        &self,
        fingerprint_id: i64,
        instance_name: &str,
        database_name: &str,
        metric: TrackedMetric,
        severity: Severity,
        baseline_mean: f64,
        current_value: f64,
        magnitude: f64,
        now: DateTime<Utc>,
    ) -> MonitorResult<RegressionEvent> {
        let row: EventRow = sqlx::query_as(
            "INSERT INTO regression_events
                 (fingerprint_id, instance_name, database_name, metric, status,
                  severity, first_seen, last_seen, baseline_mean, current_value,
                  magnitude, clear_streak)
             VALUES (?, ?, ?, ?, 'new', ?, ?, ?, ?, ?, ?, 0)
             RETURNING *",
        )
        .bind(fingerprint_id)
        .bind(instance_name)
        .bind(database_name)
        .bind(metric.as_str())
        .bind(severity.as_str())
        .bind(now)
        .bind(now)
        .bind(baseline_mean)
        .bind(current_value)
        .bind(magnitude)
        .fetch_one(&self.pool)
        .await?;

        row.into_event()
    }

    /// Refresh an open event on re-detection: last-seen, current value,
    /// magnitude and severity move; the clear streak resets.
    pub async fn touch(
        &self,
        event_id: i64,
        severity: Severity,
        current_value: f64,
        magnitude: f64,
        now: DateTime<Utc>,
    ) -> MonitorResult<()> {
        sqlx::query(
            "UPDATE regression_events
             SET last_seen = ?, severity = ?, current_value = ?, magnitude = ?,
                 clear_streak = 0
             WHERE id = ? AND status IN ('new', 'acknowledged')",
        )
        .bind(now)
        .bind(severity.as_str())
        .bind(current_value)
        .bind(magnitude)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count one evaluation window below the hysteresis threshold. Returns
    /// the new streak length.
    pub async fn record_clear(&self, event_id: i64, now: DateTime<Utc>) -> MonitorResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE regression_events
             SET clear_streak = clear_streak + 1, last_seen = ?
             WHERE id = ? AND status IN ('new', 'acknowledged')
             RETURNING clear_streak",
        )
        .bind(now)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(streak,)| streak).unwrap_or(0))
    }

    /// An evaluation between hysteresis and threshold: not regressed, not
    /// clearing either. The streak restarts.
    pub async fn reset_clear_streak(&self, event_id: i64) -> MonitorResult<()> {
        sqlx::query(
            "UPDATE regression_events SET clear_streak = 0
             WHERE id = ? AND status IN ('new', 'acknowledged')",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move an event through the state machine. Illegal transitions are a
    /// StorageConflict; a later regression opens a new event instead of
    /// reopening a terminal one.
    pub async fn transition(
        &self,
        event_id: i64,
        to: EventStatus,
        now: DateTime<Utc>,
    ) -> MonitorResult<RegressionEvent> {
        let row: Option<EventRow> =
            sqlx::query_as("SELECT * FROM regression_events WHERE id = ?")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        let event = row
            .ok_or_else(|| MonitorError::internal(format!("event {} not found", event_id)))?
            .into_event()?;

        if !event.status.can_transition_to(to) {
            return Err(MonitorError::storage_conflict(format!(
                "event {}: illegal transition {} -> {}",
                event_id, event.status, to
            )));
        }

        let row: EventRow = sqlx::query_as(
            "UPDATE regression_events SET status = ?, last_seen = ?
             WHERE id = ? AND status = ?
             RETURNING *",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(event_id)
        .bind(event.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        row.into_event()
    }

    pub async fn open_events(&self) -> MonitorResult<Vec<RegressionEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT * FROM regression_events
             WHERE status IN ('new', 'acknowledged')
             ORDER BY first_seen ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Fingerprints with any open event, for hotspot annotation.
    pub async fn open_event_fingerprints(&self) -> MonitorResult<HashSet<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT fingerprint_id FROM regression_events
             WHERE status IN ('new', 'acknowledged')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// (severity, count) over open events, for the daily summary.
    pub async fn open_counts_by_severity(&self) -> MonitorResult<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) FROM regression_events
             WHERE status IN ('new', 'acknowledged')
             GROUP BY severity",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
