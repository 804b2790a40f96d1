// Metric Store
// Purpose: Append-only time series of metric samples plus the window
// queries the analysis path reads. Insertion order is preserved for
// identical (fingerprint, sampled-at) pairs via the rowid tiebreak.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{MetricSample, NewMetricSample, TimeWindow};
use crate::utils::MonitorResult;

#[derive(Clone)]
pub struct MetricStore {
    pool: SqlitePool,
}

impl MetricStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append_sample(&self, sample: &NewMetricSample) -> MonitorResult<i64> {
        let result = sqlx::query(
            "INSERT INTO metric_samples
                 (fingerprint_id, instance_name, database_name, sampled_at,
                  execution_count, total_cpu_us, avg_cpu_us, total_elapsed_us,
                  avg_elapsed_us, total_logical_reads, avg_logical_reads,
                  total_logical_writes, total_physical_reads, plan_handle,
                  counter_reset)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sample.fingerprint_id)
        .bind(&sample.instance_name)
        .bind(&sample.database_name)
        .bind(sample.sampled_at)
        .bind(sample.execution_count)
        .bind(sample.total_cpu_us)
        .bind(sample.avg_cpu_us)
        .bind(sample.total_elapsed_us)
        .bind(sample.avg_elapsed_us)
        .bind(sample.total_logical_reads)
        .bind(sample.avg_logical_reads)
        .bind(sample.total_logical_writes)
        .bind(sample.total_physical_reads)
        .bind(&sample.plan_handle)
        .bind(sample.counter_reset)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Latest execution count for a fingerprint, for counter-reset
    /// detection. None when no prior sample exists.
    pub async fn last_execution_count(&self, fingerprint_id: i64) -> MonitorResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT execution_count FROM metric_samples
             WHERE fingerprint_id = ?
             ORDER BY sampled_at DESC, id DESC
             LIMIT 1",
        )
        .bind(fingerprint_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(count,)| count))
    }

    /// All samples for one fingerprint inside the window, oldest first.
    pub async fn window_samples(
        &self,
        fingerprint_id: i64,
        window: TimeWindow,
    ) -> MonitorResult<Vec<MetricSample>> {
        let samples: Vec<MetricSample> = sqlx::query_as(
            "SELECT * FROM metric_samples
             WHERE fingerprint_id = ? AND sampled_at >= ? AND sampled_at <= ?
             ORDER BY sampled_at ASC, id ASC",
        )
        .bind(fingerprint_id)
        .bind(window.from)
        .bind(window.to)
        .fetch_all(&self.pool)
        .await?;
        Ok(samples)
    }

    /// All samples inside the window across fingerprints, oldest first.
    /// The analysis path groups these per fingerprint in memory.
    pub async fn samples_in_window(&self, window: TimeWindow) -> MonitorResult<Vec<MetricSample>> {
        let samples: Vec<MetricSample> = sqlx::query_as(
            "SELECT * FROM metric_samples
             WHERE sampled_at >= ? AND sampled_at <= ?
             ORDER BY sampled_at ASC, id ASC",
        )
        .bind(window.from)
        .bind(window.to)
        .fetch_all(&self.pool)
        .await?;
        Ok(samples)
    }

    /// Distinct fingerprints observed in the window; drives the baseline
    /// rebuild.
    pub async fn fingerprints_in_window(&self, window: TimeWindow) -> MonitorResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT fingerprint_id FROM metric_samples
             WHERE sampled_at >= ? AND sampled_at <= ?
             ORDER BY fingerprint_id",
        )
        .bind(window.from)
        .bind(window.to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count_samples_since(&self, since: DateTime<Utc>) -> MonitorResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM metric_samples WHERE sampled_at >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Storage reachability probe for the readiness surface.
    pub async fn ping(&self) -> MonitorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
