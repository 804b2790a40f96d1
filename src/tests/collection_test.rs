// Collection pipeline end-to-end tests against an in-memory store and a
// scripted provider.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseEntry;
use crate::services::{CollectionOrchestrator, FingerprintStore, MetricStore};
use crate::tests::common::{
    create_test_db, test_config, test_instance, test_stat, MockStatsProvider,
};

async fn orchestrator_with(
    provider: Arc<MockStatsProvider>,
) -> (CollectionOrchestrator, FingerprintStore, MetricStore, sqlx::SqlitePool) {
    let pool = create_test_db().await;
    let fingerprints = FingerprintStore::new(pool.clone());
    let metrics = MetricStore::new(pool.clone());
    let orchestrator =
        CollectionOrchestrator::new(provider, fingerprints.clone(), metrics.clone());
    (orchestrator, fingerprints, metrics, pool)
}

#[tokio::test]
async fn test_cold_start_single_instance_single_database() {
    let provider = Arc::new(MockStatsProvider::new());
    provider.set_stats(
        "prod",
        "sales",
        vec![
            test_stat("SELECT * FROM a WHERE id = 1", b"A", 10, 5.0, 12.0),
            test_stat("SELECT * FROM b WHERE id = 2", b"B", 20, 7.0, 15.0),
            test_stat("SELECT * FROM c WHERE id = 3", b"C", 30, 9.0, 20.0),
        ],
    );

    let (orchestrator, _fingerprints, _metrics, pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    let mut instance = test_instance("prod");
    instance.databases = vec![DatabaseEntry::Name("sales".to_string())];
    let config = Arc::new(test_config(vec![instance]));

    let summary = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.instances.len(), 1);
    assert_eq!(summary.database_count(), 1);
    assert_eq!(summary.queries_seen(), 3);
    assert_eq!(summary.new_fingerprints(), 3);
    assert_eq!(summary.samples_saved(), 3);
    assert!(summary.first_error().is_none());

    let (fingerprint_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fingerprints")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(fingerprint_rows, 3);
}

#[tokio::test]
async fn test_reprocessing_identical_output_is_stable() {
    let provider = Arc::new(MockStatsProvider::new());
    let rows = vec![
        test_stat("SELECT * FROM a WHERE id = 1", b"A", 10, 5.0, 12.0),
        test_stat("SELECT * FROM b WHERE id = 2", b"B", 20, 7.0, 15.0),
    ];
    provider.set_stats("prod", "sales", rows);

    let (orchestrator, fingerprints, _metrics, pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    let mut instance = test_instance("prod");
    instance.databases = vec![DatabaseEntry::Name("sales".to_string())];
    let config = Arc::new(test_config(vec![instance]));

    let first = orchestrator
        .run(Arc::clone(&config), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.new_fingerprints(), 2);

    let second = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();
    // Same provider output: same fingerprint ids, no new identities, same
    // number of samples appended
    assert_eq!(second.new_fingerprints(), 0);
    assert_eq!(second.samples_saved(), 2);

    let (fingerprint_rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM fingerprints")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(fingerprint_rows, 2);

    let fp = fingerprints
        .find_by_hash("prod", "sales", &hex::encode(b"A"))
        .await
        .unwrap();
    assert!(fp.is_some());
}

#[tokio::test]
async fn test_partial_instance_failure_is_isolated() {
    let provider = Arc::new(MockStatsProvider::new());
    provider.set_stats(
        "alpha",
        "sales",
        vec![test_stat("SELECT * FROM a", b"A", 10, 5.0, 12.0)],
    );
    provider.fail_with_timeout("beta", "sales");

    let (orchestrator, _fingerprints, _metrics, _pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    let mut alpha = test_instance("alpha");
    alpha.databases = vec![DatabaseEntry::Name("sales".to_string())];
    let mut beta = test_instance("beta");
    beta.databases = vec![DatabaseEntry::Name("sales".to_string())];
    let config = Arc::new(test_config(vec![alpha, beta]));
    assert!(config.collection.continue_on_instance_error);

    let summary = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    let alpha_summary = summary
        .instances
        .iter()
        .find(|i| i.instance_name == "alpha")
        .unwrap();
    let beta_summary = summary
        .instances
        .iter()
        .find(|i| i.instance_name == "beta")
        .unwrap();

    assert!(alpha_summary.succeeded());
    assert_eq!(alpha_summary.databases[0].samples_saved, 1);
    assert!(!beta_summary.succeeded());
    assert!(beta_summary.databases[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timeout"));

    // At least one database succeeded, so a job wrapper would not count
    // this run as a failure
    assert!(summary.any_database_succeeded());
}

#[tokio::test]
async fn test_discovery_failure_is_captured_per_instance() {
    let provider = Arc::new(MockStatsProvider::new());
    provider.make_unreachable("ghost");

    let (orchestrator, _fingerprints, _metrics, _pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    // No explicit databases: auto-discovery must run and fail
    let config = Arc::new(test_config(vec![test_instance("ghost")]));
    let summary = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.instances.len(), 1);
    assert!(summary.instances[0].error.is_some());
    assert_eq!(summary.samples_saved(), 0);
    assert!(!summary.any_database_succeeded());
}

#[tokio::test]
async fn test_auto_discovery_collects_all_databases() {
    let provider = Arc::new(MockStatsProvider::new());
    provider.set_databases("prod", &["sales", "billing"]);
    provider.set_stats("prod", "sales", vec![test_stat("SELECT * FROM a", b"A", 10, 5.0, 12.0)]);
    provider.set_stats("prod", "billing", vec![test_stat("SELECT * FROM b", b"B", 10, 5.0, 12.0)]);

    let (orchestrator, _fingerprints, _metrics, _pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    let config = Arc::new(test_config(vec![test_instance("prod")]));
    let summary = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.database_count(), 2);
    assert_eq!(summary.samples_saved(), 2);
}

#[tokio::test]
async fn test_counter_reset_is_flagged_not_dropped() {
    let provider = Arc::new(MockStatsProvider::new());
    provider.set_stats(
        "prod",
        "sales",
        vec![test_stat("SELECT * FROM a", b"A", 100, 5.0, 12.0)],
    );

    let (orchestrator, _fingerprints, metrics, pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    let mut instance = test_instance("prod");
    instance.databases = vec![DatabaseEntry::Name("sales".to_string())];
    let config = Arc::new(test_config(vec![instance]));

    let first = orchestrator
        .run(Arc::clone(&config), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.counter_resets(), 0);

    // The server-side counter went backwards: statistics were flushed
    provider.set_stats(
        "prod",
        "sales",
        vec![test_stat("SELECT * FROM a", b"A", 40, 5.0, 12.0)],
    );
    let second = orchestrator
        .run(config, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.counter_resets(), 1);
    assert_eq!(second.samples_saved(), 1);

    let (reset_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM metric_samples WHERE counter_reset = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reset_rows, 1);

    // Latest counter is now the post-reset value
    let fp_id: (i64,) = sqlx::query_as("SELECT id FROM fingerprints LIMIT 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(metrics.last_execution_count(fp_id.0).await.unwrap(), Some(40));
}

#[tokio::test]
async fn test_concurrent_upserts_create_exactly_once() {
    let pool = create_test_db().await;
    let store = FingerprintStore::new(pool.clone());
    let now = chrono::Utc::now();

    let upsert = crate::models::FingerprintUpsert {
        instance_name: "prod".to_string(),
        database_name: "sales".to_string(),
        hash: "deadbeefdeadbeefdeadbeefdeadbeef".to_string(),
        sample_text: "SELECT 1".to_string(),
        normalized_text: "SELECT ?".to_string(),
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let upsert = upsert.clone();
        handles.push(tokio::spawn(async move { store.upsert(&upsert, now).await.unwrap() }));
    }

    let mut created_count = 0;
    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let (id, created) = handle.await.unwrap();
        ids.insert(id);
        if created {
            created_count += 1;
        }
    }

    assert_eq!(created_count, 1, "exactly one upsert may observe creation");
    assert_eq!(ids.len(), 1, "every upsert sees the same id");
}

#[tokio::test]
async fn test_cancellation_aborts_run_quietly() {
    let provider = Arc::new(MockStatsProvider::new());
    provider.set_stats("prod", "sales", vec![test_stat("SELECT 1", b"A", 10, 5.0, 12.0)]);

    let (orchestrator, _fingerprints, _metrics, _pool) =
        orchestrator_with(Arc::clone(&provider)).await;

    let mut instance = test_instance("prod");
    instance.databases = vec![DatabaseEntry::Name("sales".to_string())];
    let config = Arc::new(test_config(vec![instance]));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = orchestrator.run(config, cancel).await.unwrap_err();
    assert!(err.is_cancelled());
}
