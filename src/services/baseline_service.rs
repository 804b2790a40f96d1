//! Baseline Service
//!
//! Derives per-fingerprint statistical baselines (mean, population standard
//! deviation, p50/p95/p99) over a trailing window, keyed by
//! (fingerprint, window_end_day). Recomputing for the same day is
//! idempotent and replaces the prior row atomically. Served from an
//! in-memory cache between rebuilds; per-fingerprint computation errors are
//! isolated so the nightly rebuild always completes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::models::{BaselineStats, MetricStats, QueryBaseline, TimeWindow};
use crate::services::metric_store::MetricStore;
use crate::utils::scheduled_executor::{JobContext, ScheduledTask};
use crate::utils::{MonitorError, MonitorResult};

// ============================================================================
// Statistics helpers
// ============================================================================

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (the window is the whole population).
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Nearest-rank percentile on an already-sorted slice: the value at index
/// ceil(p * n) - 1. Deterministic, so rebuilds over identical inputs are
/// bitwise-equal.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Median: middle value, or the midpoint of the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 { sorted[mid] } else { (sorted[mid - 1] + sorted[mid]) / 2.0 }
}

fn metric_stats(values: &mut Vec<f64>) -> MetricStats {
    if values.is_empty() {
        return MetricStats::zero();
    }
    let mean_value = mean(values);
    let std_dev = population_std_dev(values, mean_value);
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    MetricStats {
        mean: mean_value,
        std_dev,
        p50: percentile(values, 0.50),
        p95: percentile(values, 0.95),
        p99: percentile(values, 0.99),
    }
}

// ============================================================================
// Baseline service
// ============================================================================

/// Outcome of one rebuild pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildResult {
    pub fingerprints_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub valid: usize,
}

#[derive(sqlx::FromRow)]
struct BaselineRow {
    fingerprint_id: i64,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    sample_count: i64,
    valid: bool,
    stats_json: String,
}

impl BaselineRow {
    fn into_baseline(self) -> MonitorResult<QueryBaseline> {
        let stats: BaselineStats = serde_json::from_str(&self.stats_json)
            .map_err(|e| MonitorError::internal(format!("corrupt baseline stats: {}", e)))?;
        Ok(QueryBaseline {
            fingerprint_id: self.fingerprint_id,
            window_start: self.window_start,
            window_end: self.window_end,
            sample_count: self.sample_count,
            valid: self.valid,
            stats,
        })
    }
}

#[derive(Clone)]
pub struct BaselineService {
    metrics: MetricStore,
    pool: SqlitePool,
    cache: Arc<DashMap<i64, QueryBaseline>>,
}

impl BaselineService {
    pub fn new(metrics: MetricStore, pool: SqlitePool) -> Self {
        Self { metrics, pool, cache: Arc::new(DashMap::new()) }
    }

    /// Recompute baselines for every fingerprint observed in the trailing
    /// window. Per-fingerprint errors are logged and counted, never fatal.
    pub async fn rebuild(
        &self,
        config: &MonitorConfig,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> MonitorResult<RebuildResult> {
        let window = TimeWindow::trailing(
            now,
            chrono::Duration::seconds(config.baseline.window_secs as i64),
        );
        let fingerprint_ids = self.metrics.fingerprints_in_window(window).await?;

        let mut result = RebuildResult {
            fingerprints_total: fingerprint_ids.len(),
            succeeded: 0,
            failed: 0,
            valid: 0,
        };

        for fingerprint_id in fingerprint_ids {
            if cancel.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            match self
                .compute_for(
                    fingerprint_id,
                    window,
                    config.analysis.n_min_baseline,
                    chrono::Duration::seconds(config.analysis.w_min_baseline_secs as i64),
                )
                .await
            {
                Ok(baseline) => {
                    if let Err(e) = self.replace(&baseline).await {
                        tracing::warn!(fingerprint_id, error = %e, "Baseline persist failed");
                        result.failed += 1;
                        continue;
                    }
                    if baseline.valid {
                        result.valid += 1;
                    }
                    result.succeeded += 1;
                },
                Err(e) => {
                    tracing::warn!(fingerprint_id, error = %e, "Baseline computation failed");
                    result.failed += 1;
                },
            }
        }

        tracing::info!(
            total = result.fingerprints_total,
            succeeded = result.succeeded,
            failed = result.failed,
            valid = result.valid,
            "Baseline rebuild complete"
        );
        Ok(result)
    }

    /// Compute one fingerprint's baseline over the window. Validity needs
    /// n >= n_min samples and observed coverage (first to last sample)
    /// >= w_min.
    pub async fn compute_for(
        &self,
        fingerprint_id: i64,
        window: TimeWindow,
        n_min: i64,
        w_min: chrono::Duration,
    ) -> MonitorResult<QueryBaseline> {
        let samples = self.metrics.window_samples(fingerprint_id, window).await?;

        let mut cpu: Vec<f64> = samples.iter().map(|s| s.avg_cpu_us as f64).collect();
        let mut elapsed: Vec<f64> = samples.iter().map(|s| s.avg_elapsed_us as f64).collect();
        let mut reads: Vec<f64> = samples.iter().map(|s| s.avg_logical_reads).collect();

        let coverage = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => last.sampled_at - first.sampled_at,
            _ => chrono::Duration::zero(),
        };
        let valid = samples.len() as i64 >= n_min && coverage >= w_min;

        Ok(QueryBaseline {
            fingerprint_id,
            window_start: window.from,
            window_end: window.to,
            sample_count: samples.len() as i64,
            valid,
            stats: BaselineStats {
                cpu_us: metric_stats(&mut cpu),
                elapsed_us: metric_stats(&mut elapsed),
                logical_reads: metric_stats(&mut reads),
            },
        })
    }

    /// Idempotent replace keyed by (fingerprint, window_end_day).
    pub async fn replace(&self, baseline: &QueryBaseline) -> MonitorResult<()> {
        let stats_json = serde_json::to_string(&baseline.stats)
            .map_err(|e| MonitorError::internal(format!("baseline stats encode: {}", e)))?;

        sqlx::query(
            "INSERT OR REPLACE INTO baselines
                 (fingerprint_id, window_end_day, window_start, window_end,
                  sample_count, valid, stats_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(baseline.fingerprint_id)
        .bind(baseline.window_end.format("%Y-%m-%d").to_string())
        .bind(baseline.window_start)
        .bind(baseline.window_end)
        .bind(baseline.sample_count)
        .bind(baseline.valid)
        .bind(stats_json)
        .execute(&self.pool)
        .await?;

        self.cache.insert(baseline.fingerprint_id, baseline.clone());
        Ok(())
    }

    /// Latest baseline for a fingerprint: cache first, then the newest
    /// persisted day.
    pub async fn load(&self, fingerprint_id: i64) -> MonitorResult<Option<QueryBaseline>> {
        if let Some(cached) = self.cache.get(&fingerprint_id) {
            return Ok(Some(cached.clone()));
        }

        let row: Option<BaselineRow> = sqlx::query_as(
            "SELECT fingerprint_id, window_start, window_end, sample_count,
                    valid, stats_json
             FROM baselines
             WHERE fingerprint_id = ?
             ORDER BY window_end_day DESC
             LIMIT 1",
        )
        .bind(fingerprint_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let baseline = row.into_baseline()?;
                self.cache.insert(fingerprint_id, baseline.clone());
                Ok(Some(baseline))
            },
            None => Ok(None),
        }
    }

    /// Load bypassing the cache, for idempotence checks.
    pub async fn load_persisted(
        &self,
        fingerprint_id: i64,
        window_end_day: &str,
    ) -> MonitorResult<Option<QueryBaseline>> {
        let row: Option<BaselineRow> = sqlx::query_as(
            "SELECT fingerprint_id, window_start, window_end, sample_count,
                    valid, stats_json
             FROM baselines
             WHERE fingerprint_id = ? AND window_end_day = ?",
        )
        .bind(fingerprint_id)
        .bind(window_end_day)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BaselineRow::into_baseline).transpose()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

// ============================================================================
// Scheduled job wrapper
// ============================================================================

pub struct BaselineRebuildJob {
    baselines: BaselineService,
}

impl BaselineRebuildJob {
    pub fn new(baselines: BaselineService) -> Self {
        Self { baselines }
    }
}

impl ScheduledTask for BaselineRebuildJob {
    fn name(&self) -> &str {
        "baseline-rebuild"
    }

    fn run(&self, ctx: JobContext) -> Pin<Box<dyn Future<Output = MonitorResult<()>> + Send + '_>> {
        Box::pin(async move {
            self.baselines.rebuild(&ctx.config, Utc::now(), &ctx.cancel).await?;
            Ok(())
        })
    }
}
