//! Regression Detector
//!
//! Compares recent per-fingerprint behaviour against the valid baseline.
//! A metric regresses only when both the current/baseline ratio and the
//! z-score clear their thresholds; requiring both keeps low-variance
//! baselines from flagging noise. Open events auto-resolve after two
//! consecutive evaluations below the hysteresis threshold.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::config::{EffectiveCollection, MonitorConfig};
use crate::models::{
    EventStatus, MetricSample, MetricStats, QueryBaseline, RegressionEvent, Severity, TimeWindow,
    TrackedMetric,
};
use crate::services::baseline_service::{self, BaselineService};
use crate::services::event_store::EventStore;
use crate::services::metric_store::MetricStore;
use crate::utils::{MonitorError, MonitorResult};
use tokio_util::sync::CancellationToken;

/// Divide-by-near-zero floors, per metric. Durations are microseconds.
fn ratio_epsilon(metric: TrackedMetric) -> f64 {
    match metric {
        TrackedMetric::AvgCpu | TrackedMetric::AvgDuration => 1.0,
        TrackedMetric::AvgLogicalReads => 1.0,
    }
}

/// Standard-deviation floors so flat baselines cannot produce unbounded
/// z-scores. 1 ms for durations, one read for reads.
fn sigma_floor(metric: TrackedMetric) -> f64 {
    match metric {
        TrackedMetric::AvgCpu | TrackedMetric::AvgDuration => 1000.0,
        TrackedMetric::AvgLogicalReads => 1.0,
    }
}

fn sample_value(metric: TrackedMetric, sample: &MetricSample) -> f64 {
    match metric {
        TrackedMetric::AvgCpu => sample.avg_cpu_us as f64,
        TrackedMetric::AvgDuration => sample.avg_elapsed_us as f64,
        TrackedMetric::AvgLogicalReads => sample.avg_logical_reads,
    }
}

fn baseline_stats(metric: TrackedMetric, baseline: &QueryBaseline) -> &MetricStats {
    match metric {
        TrackedMetric::AvgCpu => &baseline.stats.cpu_us,
        TrackedMetric::AvgDuration => &baseline.stats.elapsed_us,
        TrackedMetric::AvgLogicalReads => &baseline.stats.logical_reads,
    }
}

/// One metric's comparison against its baseline.
#[derive(Debug, Clone, Copy)]
pub struct MetricEvaluation {
    pub metric: TrackedMetric,
    pub recent_median: f64,
    pub baseline_mean: f64,
    pub ratio: f64,
    pub z_score: f64,
    pub regressed: bool,
}

/// The ratio + z-score decision rule for one metric.
pub fn evaluate_metric(
    metric: TrackedMetric,
    recent_values: &[f64],
    stats: &MetricStats,
    r_min: f64,
    z_min: f64,
) -> MetricEvaluation {
    let recent_median = baseline_service::median(recent_values);
    let ratio = recent_median / stats.mean.max(ratio_epsilon(metric));
    let z_score = (recent_median - stats.mean) / stats.std_dev.max(sigma_floor(metric));
    MetricEvaluation {
        metric,
        recent_median,
        baseline_mean: stats.mean,
        ratio,
        z_score,
        regressed: ratio >= r_min && z_score >= z_min,
    }
}

/// Pick the headline metric: highest ratio, ties broken by z-score, then
/// lexicographic metric name.
pub fn primary_evaluation(evaluations: &[MetricEvaluation]) -> Option<&MetricEvaluation> {
    evaluations
        .iter()
        .filter(|e| e.regressed)
        .min_by(|a, b| {
            b.ratio
                .partial_cmp(&a.ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.z_score
                        .partial_cmp(&a.z_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.metric.as_str().cmp(b.metric.as_str()))
        })
}

/// Counts from one analysis cycle, plus the open events that regressed in
/// it (input to the remediation path).
#[derive(Debug, Default)]
pub struct AnalysisOutcome {
    pub fingerprints_evaluated: usize,
    pub events_opened: usize,
    pub events_updated: usize,
    pub events_auto_resolved: usize,
    pub regressed_events: Vec<RegressionEvent>,
}

#[derive(Clone)]
pub struct RegressionDetector {
    metrics: MetricStore,
    baselines: BaselineService,
    events: EventStore,
}

impl RegressionDetector {
    pub fn new(metrics: MetricStore, baselines: BaselineService, events: EventStore) -> Self {
        Self { metrics, baselines, events }
    }

    /// Evaluate every fingerprint with recent samples against its baseline
    /// and reconcile regression events.
    pub async fn run(
        &self,
        config: &MonitorConfig,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> MonitorResult<AnalysisOutcome> {
        let window = TimeWindow::trailing(
            now,
            chrono::Duration::seconds(config.analysis.recent_window_secs as i64),
        );
        let samples = self.metrics.samples_in_window(window).await?;

        let mut by_fingerprint: HashMap<i64, Vec<MetricSample>> = HashMap::new();
        for sample in samples {
            by_fingerprint.entry(sample.fingerprint_id).or_default().push(sample);
        }

        let mut outcome = AnalysisOutcome::default();

        for (fingerprint_id, samples) in by_fingerprint {
            if cancel.is_cancelled() {
                return Err(MonitorError::Cancelled);
            }

            let eligible: Vec<&MetricSample> = samples
                .iter()
                .filter(|s| {
                    let (min_execs, min_elapsed_ms) =
                        eligibility_thresholds(config, &s.instance_name, &s.database_name);
                    !s.counter_reset
                        && s.execution_count >= min_execs
                        && s.avg_elapsed_us >= (min_elapsed_ms * 1000) as i64
                })
                .collect();
            if eligible.is_empty() {
                continue;
            }

            let Some(baseline) = self.baselines.load(fingerprint_id).await? else {
                continue;
            };
            if !baseline.valid {
                continue;
            }

            outcome.fingerprints_evaluated += 1;

            let mut evaluations = Vec::with_capacity(TrackedMetric::ALL.len());
            for metric in TrackedMetric::ALL {
                let values: Vec<f64> =
                    eligible.iter().map(|s| sample_value(metric, s)).collect();
                evaluations.push(evaluate_metric(
                    metric,
                    &values,
                    baseline_stats(metric, &baseline),
                    config.analysis.r_min,
                    config.analysis.z_min,
                ));
            }

            if let Some(primary) = primary_evaluation(&evaluations) {
                tracing::info!(
                    fingerprint_id,
                    metric = %primary.metric,
                    ratio = primary.ratio,
                    z_score = primary.z_score,
                    "Regression detected"
                );
            }

            // The newest eligible sample names the stream the event belongs to
            let Some(latest) = eligible.last() else { continue };
            let (instance_name, database_name) =
                (latest.instance_name.clone(), latest.database_name.clone());

            for evaluation in evaluations {
                self.reconcile_event(
                    fingerprint_id,
                    &instance_name,
                    &database_name,
                    evaluation,
                    config,
                    now,
                    &mut outcome,
                )
                .await?;
            }
        }

        tracing::info!(
            evaluated = outcome.fingerprints_evaluated,
            opened = outcome.events_opened,
            updated = outcome.events_updated,
            auto_resolved = outcome.events_auto_resolved,
            "Analysis cycle complete"
        );
        Ok(outcome)
    }

    /// Apply one metric evaluation to the event lifecycle.
    #[allow(clippy::too_many_arguments)]
    async fn reconcile_event(
        &self,
        fingerprint_id: i64,
        instance_name: &str,
        database_name: &str,
        evaluation: MetricEvaluation,
        config: &MonitorConfig,
        now: DateTime<Utc>,
        outcome: &mut AnalysisOutcome,
    ) -> MonitorResult<()> {
        let open = self.events.open_event(fingerprint_id, evaluation.metric).await?;

        if evaluation.regressed {
            let severity = Severity::from_ratio(evaluation.ratio);
            let event = match open {
                Some(event) => {
                    self.events
                        .touch(event.id, severity, evaluation.recent_median, evaluation.ratio, now)
                        .await?;
                    outcome.events_updated += 1;
                    RegressionEvent {
                        severity,
                        current_value: evaluation.recent_median,
                        magnitude: evaluation.ratio,
                        last_seen: now,
                        clear_streak: 0,
                        ..event
                    }
                },
                None => {
                    let event = self
                        .events
                        .open_new(
                            fingerprint_id,
                            instance_name,
                            database_name,
                            evaluation.metric,
                            severity,
                            evaluation.baseline_mean,
                            evaluation.recent_median,
                            evaluation.ratio,
                            now,
                        )
                        .await?;
                    outcome.events_opened += 1;
                    event
                },
            };
            outcome.regressed_events.push(event);
            return Ok(());
        }

        if let Some(event) = open {
            let clear_threshold = config.analysis.r_min * config.analysis.hysteresis;
            if evaluation.ratio < clear_threshold {
                let streak = self.events.record_clear(event.id, now).await?;
                if streak >= 2 {
                    self.events
                        .transition(event.id, EventStatus::AutoResolved, now)
                        .await?;
                    outcome.events_auto_resolved += 1;
                    tracing::info!(
                        fingerprint_id,
                        metric = %evaluation.metric,
                        ratio = evaluation.ratio,
                        "Regression auto-resolved"
                    );
                }
            } else {
                // Elevated but under the threshold: not clearing, not
                // regressed. The streak restarts.
                self.events.reset_clear_streak(event.id).await?;
            }
        }

        Ok(())
    }

    // Operator actions pass through the event store's state machine.

    pub async fn acknowledge(&self, event_id: i64) -> MonitorResult<RegressionEvent> {
        self.events.transition(event_id, EventStatus::Acknowledged, Utc::now()).await
    }

    pub async fn resolve(&self, event_id: i64) -> MonitorResult<RegressionEvent> {
        self.events.transition(event_id, EventStatus::Resolved, Utc::now()).await
    }

    pub async fn dismiss(&self, event_id: i64) -> MonitorResult<RegressionEvent> {
        self.events.transition(event_id, EventStatus::Dismissed, Utc::now()).await
    }
}

/// Minimum execution count and minimum average elapsed time for a sample to
/// count, resolved through the database → instance → global cascade.
fn eligibility_thresholds(
    config: &MonitorConfig,
    instance_name: &str,
    database_name: &str,
) -> (i64, u64) {
    match config.instances.iter().find(|i| i.name == instance_name) {
        Some(instance) => {
            let entry = instance.databases.iter().find(|d| d.name() == database_name);
            let effective = EffectiveCollection::resolve(&config.collection, instance, entry);
            (effective.min_exec_count, effective.min_elapsed_ms)
        },
        None => (config.collection.min_exec_count, config.collection.min_elapsed_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(mean: f64, std_dev: f64) -> MetricStats {
        MetricStats { mean, std_dev, p50: mean, p95: mean, p99: mean }
    }

    #[test]
    fn test_conjunctive_rule() {
        // Ratio clears, z-score clears: regression (values in microseconds)
        let e = evaluate_metric(
            TrackedMetric::AvgCpu,
            &[350_000.0],
            &stats(100_000.0, 10_000.0),
            2.0,
            3.0,
        );
        assert!(e.regressed);
        assert!((e.ratio - 3.5).abs() < 1e-9);
        assert!((e.z_score - 25.0).abs() < 1e-9);

        // Ratio clears but the baseline is so noisy the z-score does not
        let noisy = evaluate_metric(
            TrackedMetric::AvgCpu,
            &[350_000.0],
            &stats(100_000.0, 200_000.0),
            2.0,
            3.0,
        );
        assert!(!noisy.regressed);

        // z-score clears but the ratio does not (tiny relative change on a
        // dead-flat baseline)
        let flat = evaluate_metric(
            TrackedMetric::AvgCpu,
            &[150_000.0],
            &stats(100_000.0, 0.0),
            2.0,
            3.0,
        );
        assert!(flat.z_score >= 3.0);
        assert!(!flat.regressed);
    }

    #[test]
    fn test_sigma_floor_caps_z() {
        // Flat baseline: sigma floor (1 ms) keeps z finite and meaningful
        let e = evaluate_metric(
            TrackedMetric::AvgDuration,
            &[104_000.0],
            &stats(100_000.0, 0.0),
            2.0,
            3.0,
        );
        assert!((e.z_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_baseline_uses_epsilon() {
        let e = evaluate_metric(TrackedMetric::AvgLogicalReads, &[50.0], &stats(0.0, 0.0), 2.0, 3.0);
        assert!(e.ratio.is_finite());
        assert!(e.ratio >= 2.0);
    }

    #[test]
    fn test_primary_metric_tie_breaks() {
        let evals = vec![
            MetricEvaluation {
                metric: TrackedMetric::AvgDuration,
                recent_median: 0.0,
                baseline_mean: 0.0,
                ratio: 4.0,
                z_score: 10.0,
                regressed: true,
            },
            MetricEvaluation {
                metric: TrackedMetric::AvgCpu,
                recent_median: 0.0,
                baseline_mean: 0.0,
                ratio: 4.0,
                z_score: 10.0,
                regressed: true,
            },
            MetricEvaluation {
                metric: TrackedMetric::AvgLogicalReads,
                recent_median: 0.0,
                baseline_mean: 0.0,
                ratio: 3.0,
                z_score: 50.0,
                regressed: true,
            },
        ];
        // Equal ratio and z: lexicographic name wins (avg_cpu)
        let primary = primary_evaluation(&evals).unwrap();
        assert_eq!(primary.metric, TrackedMetric::AvgCpu);
    }

    #[test]
    fn test_median_of_recent_values() {
        let e = evaluate_metric(
            TrackedMetric::AvgCpu,
            &[100_000.0, 300_000.0, 350_000.0],
            &stats(100_000.0, 10_000.0),
            2.0,
            3.0,
        );
        assert_eq!(e.recent_median, 300_000.0);
    }
}
