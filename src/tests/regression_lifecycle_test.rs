// Regression detection and event lifecycle tests: the r/z rule against a
// seeded baseline, the one-open-event invariant, hysteresis-based
// auto-resolution, and operator transitions.

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::models::{
    BaselineStats, EventStatus, FingerprintUpsert, MetricStats, NewMetricSample, QueryBaseline,
    Severity, TrackedMetric,
};
use crate::services::{
    BaselineService, EventStore, FingerprintStore, MetricStore, RegressionDetector,
};
use crate::tests::common::{create_test_db, test_config};

struct Fixture {
    pool: sqlx::SqlitePool,
    detector: RegressionDetector,
    metrics: MetricStore,
    events: EventStore,
    fingerprint_id: i64,
    now: DateTime<Utc>,
}

fn stats(mean: f64, std_dev: f64) -> MetricStats {
    MetricStats { mean, std_dev, p50: mean, p95: mean * 1.2, p99: mean * 1.4 }
}

async fn fixture() -> Fixture {
    let pool = create_test_db().await;
    let fingerprints = FingerprintStore::new(pool.clone());
    let metrics = MetricStore::new(pool.clone());
    let events = EventStore::new(pool.clone());
    let baselines = BaselineService::new(metrics.clone(), pool.clone());
    let detector = RegressionDetector::new(metrics.clone(), baselines.clone(), events.clone());

    let now = Utc::now();
    let (fingerprint_id, _created) = fingerprints
        .upsert(
            &FingerprintUpsert {
                instance_name: "prod".to_string(),
                database_name: "sales".to_string(),
                hash: "00112233445566778899aabbccddeeff".to_string(),
                sample_text: "SELECT * FROM orders WHERE id = 7".to_string(),
                normalized_text: "SELECT * FROM orders WHERE id = ?".to_string(),
            },
            now,
        )
        .await
        .unwrap();

    // Valid baseline: CPU mean 100 ms (σ 10 ms); duration and reads sit at
    // the level the recent samples will report, so only CPU can regress
    baselines
        .replace(&QueryBaseline {
            fingerprint_id,
            window_start: now - Duration::days(14),
            window_end: now,
            sample_count: 50,
            valid: true,
            stats: BaselineStats {
                cpu_us: stats(100_000.0, 10_000.0),
                elapsed_us: stats(350_000.0, 50_000.0),
                logical_reads: stats(100.0, 10.0),
            },
        })
        .await
        .unwrap();

    Fixture { pool, detector, metrics, events, fingerprint_id, now }
}

impl Fixture {
    /// Three eligible samples with the given average CPU, five minutes
    /// before `at`.
    async fn seed_recent_samples(&self, avg_cpu_us: i64, at: DateTime<Utc>) {
        for offset in 0..3 {
            self.metrics
                .append_sample(&NewMetricSample {
                    fingerprint_id: self.fingerprint_id,
                    instance_name: "prod".to_string(),
                    database_name: "sales".to_string(),
                    sampled_at: at - Duration::minutes(5) + Duration::seconds(offset),
                    execution_count: 10,
                    total_cpu_us: avg_cpu_us * 10,
                    avg_cpu_us,
                    total_elapsed_us: 3_500_000,
                    avg_elapsed_us: 350_000,
                    total_logical_reads: 1000,
                    avg_logical_reads: 100.0,
                    total_logical_writes: 0,
                    total_physical_reads: 0,
                    plan_handle: None,
                    counter_reset: false,
                })
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_regression_opens_medium_event() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    // Recent median 350 ms against baseline 100 ms: r = 3.5, z = 25
    f.seed_recent_samples(350_000, f.now).await;
    let outcome = f
        .detector
        .run(&config, f.now, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.fingerprints_evaluated, 1);
    assert_eq!(outcome.events_opened, 1);
    assert_eq!(outcome.events_auto_resolved, 0);

    let event = f
        .events
        .open_event(f.fingerprint_id, TrackedMetric::AvgCpu)
        .await
        .unwrap()
        .expect("an open event");
    assert_eq!(event.status, EventStatus::New);
    assert_eq!(event.severity, Severity::Medium);
    assert!((event.magnitude - 3.5).abs() < 1e-9);
    assert!((event.baseline_mean - 100_000.0).abs() < 1e-9);

    // No event for the metrics that did not regress
    assert!(f
        .events
        .open_event(f.fingerprint_id, TrackedMetric::AvgDuration)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_redetection_updates_the_open_event() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    f.seed_recent_samples(350_000, f.now).await;
    f.detector.run(&config, f.now, &CancellationToken::new()).await.unwrap();

    // Worse in the next window: the event escalates instead of duplicating
    let later = f.now + Duration::minutes(40);
    f.seed_recent_samples(700_000, later).await;
    let outcome = f
        .detector
        .run(&config, later, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.events_opened, 0);
    assert_eq!(outcome.events_updated, 1);

    let open = f.events.open_events().await.unwrap();
    assert_eq!(open.len(), 1, "exactly one open event per (fingerprint, metric)");
    assert_eq!(open[0].severity, Severity::High);
    assert!((open[0].magnitude - 7.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_auto_resolution_after_two_clear_windows() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    f.seed_recent_samples(350_000, f.now).await;
    f.detector.run(&config, f.now, &CancellationToken::new()).await.unwrap();

    // r = 1.5 < r_min * hysteresis = 1.6: first clear window
    let second = f.now + Duration::minutes(40);
    f.seed_recent_samples(150_000, second).await;
    let outcome = f
        .detector
        .run(&config, second, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.events_auto_resolved, 0);
    let event = f
        .events
        .open_event(f.fingerprint_id, TrackedMetric::AvgCpu)
        .await
        .unwrap()
        .expect("still open after one clear window");
    assert_eq!(event.clear_streak, 1);

    // Second consecutive clear window resolves it
    let third = second + Duration::minutes(40);
    f.seed_recent_samples(150_000, third).await;
    let outcome = f
        .detector
        .run(&config, third, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.events_auto_resolved, 1);
    assert!(f
        .events
        .open_event(f.fingerprint_id, TrackedMetric::AvgCpu)
        .await
        .unwrap()
        .is_none());

    let all_open = f.events.open_events().await.unwrap();
    assert!(all_open.is_empty());
}

#[tokio::test]
async fn test_hysteresis_middle_zone_restarts_the_streak() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    f.seed_recent_samples(350_000, f.now).await;
    f.detector.run(&config, f.now, &CancellationToken::new()).await.unwrap();

    // First clear window (r = 1.5)
    let second = f.now + Duration::minutes(40);
    f.seed_recent_samples(150_000, second).await;
    f.detector.run(&config, second, &CancellationToken::new()).await.unwrap();

    // Middle zone (r = 1.8, between 1.6 and 2.0): not regressed, not
    // clearing; the streak resets
    let third = second + Duration::minutes(40);
    f.seed_recent_samples(180_000, third).await;
    f.detector.run(&config, third, &CancellationToken::new()).await.unwrap();

    let event = f
        .events
        .open_event(f.fingerprint_id, TrackedMetric::AvgCpu)
        .await
        .unwrap()
        .expect("event survives the middle zone");
    assert_eq!(event.clear_streak, 0);

    // One more clear window is not enough on its own
    let fourth = third + Duration::minutes(40);
    f.seed_recent_samples(150_000, fourth).await;
    let outcome = f
        .detector
        .run(&config, fourth, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.events_auto_resolved, 0);
}

#[tokio::test]
async fn test_later_regression_opens_a_fresh_event() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    f.seed_recent_samples(350_000, f.now).await;
    f.detector.run(&config, f.now, &CancellationToken::new()).await.unwrap();

    // Resolve via two clear windows
    let mut at = f.now;
    for _ in 0..2 {
        at = at + Duration::minutes(40);
        f.seed_recent_samples(150_000, at).await;
        f.detector.run(&config, at, &CancellationToken::new()).await.unwrap();
    }
    assert!(f.events.open_events().await.unwrap().is_empty());

    // A new regression creates a second event rather than reopening
    at = at + Duration::minutes(40);
    f.seed_recent_samples(400_000, at).await;
    let outcome = f
        .detector
        .run(&config, at, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.events_opened, 1);

    let (total_events,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM regression_events")
        .fetch_one(&f.pool)
        .await
        .unwrap();
    assert_eq!(total_events, 2);
}

#[tokio::test]
async fn test_counter_reset_samples_are_not_eligible() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    // All recent samples flagged as counter resets: nothing to evaluate
    for offset in 0..3 {
        f.metrics
            .append_sample(&NewMetricSample {
                fingerprint_id: f.fingerprint_id,
                instance_name: "prod".to_string(),
                database_name: "sales".to_string(),
                sampled_at: f.now - Duration::minutes(5) + Duration::seconds(offset),
                execution_count: 10,
                total_cpu_us: 3_500_000,
                avg_cpu_us: 350_000,
                total_elapsed_us: 3_500_000,
                avg_elapsed_us: 350_000,
                total_logical_reads: 1000,
                avg_logical_reads: 100.0,
                total_logical_writes: 0,
                total_physical_reads: 0,
                plan_handle: None,
                counter_reset: true,
            })
            .await
            .unwrap();
    }

    let outcome = f
        .detector
        .run(&config, f.now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.fingerprints_evaluated, 0);
    assert_eq!(outcome.events_opened, 0);
}

#[tokio::test]
async fn test_sparse_queries_are_ignored() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    // Execution count below min_exec_count (5): ineligible despite the
    // enormous ratio
    f.metrics
        .append_sample(&NewMetricSample {
            fingerprint_id: f.fingerprint_id,
            instance_name: "prod".to_string(),
            database_name: "sales".to_string(),
            sampled_at: f.now - Duration::minutes(5),
            execution_count: 2,
            total_cpu_us: 2_000_000,
            avg_cpu_us: 1_000_000,
            total_elapsed_us: 2_000_000,
            avg_elapsed_us: 1_000_000,
            total_logical_reads: 100,
            avg_logical_reads: 50.0,
            total_logical_writes: 0,
            total_physical_reads: 0,
            plan_handle: None,
            counter_reset: false,
        })
        .await
        .unwrap();

    let outcome = f
        .detector
        .run(&config, f.now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.events_opened, 0);
}

#[tokio::test]
async fn test_operator_transitions_and_terminal_states() {
    let f = fixture().await;
    let config = test_config(Vec::new());

    f.seed_recent_samples(350_000, f.now).await;
    f.detector.run(&config, f.now, &CancellationToken::new()).await.unwrap();
    let event = f
        .events
        .open_event(f.fingerprint_id, TrackedMetric::AvgCpu)
        .await
        .unwrap()
        .unwrap();

    let acknowledged = f.detector.acknowledge(event.id).await.unwrap();
    assert_eq!(acknowledged.status, EventStatus::Acknowledged);

    let resolved = f.detector.resolve(event.id).await.unwrap();
    assert_eq!(resolved.status, EventStatus::Resolved);

    // Terminal: no further transitions
    let err = f.detector.dismiss(event.id).await.unwrap_err();
    assert_eq!(err.kind(), "storage_conflict");
}
