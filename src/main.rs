use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil::config::{ConfigHandle, MonitorConfig};
use vigil::db;
use vigil::handlers;
use vigil::services::{
    AnalysisJob, AuditStore, BaselineRebuildJob, BaselineService, CollectionJob,
    CollectionOrchestrator, DailySummaryJob, EventStore, FingerprintStore, HealthService,
    MetricStore, MySqlStatsProvider, ProviderPoolManager, RegressionDetector, RemediationService,
    StatsProvider, SummaryService,
};
use vigil::utils::{BackoffPolicy, Schedule, ScheduledExecutor};
use vigil::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let (config, config_path) = MonitorConfig::load()?;

    // The appender guard must stay alive for the whole process
    let _log_guard = init_tracing(&config.logging);

    tracing::info!("Vigil starting up");
    tracing::info!(
        instances = config.instances.len(),
        enabled = config.enabled_instances().len(),
        mode = %config.security.mode,
        "Configuration loaded successfully"
    );

    if let Some(parent) = sqlite_file_parent(&config.storage.url) {
        let _ = std::fs::create_dir_all(parent);
    }
    let pool = db::create_pool(&config.storage.url).await?;
    db::init_schema(&pool).await?;
    tracing::info!("Metric store ready at {}", config.storage.url);

    // Stores and services
    let config_handle = ConfigHandle::new(config.clone());
    let pool_manager = ProviderPoolManager::new();
    let provider: Arc<dyn StatsProvider> = Arc::new(MySqlStatsProvider::new(pool_manager.clone()));

    let fingerprint_store = FingerprintStore::new(pool.clone());
    let metric_store = MetricStore::new(pool.clone());
    let event_store = EventStore::new(pool.clone());
    let audit_store = AuditStore::new(pool.clone());
    let baseline_service = BaselineService::new(metric_store.clone(), pool.clone());

    let orchestrator = CollectionOrchestrator::new(
        Arc::clone(&provider),
        fingerprint_store.clone(),
        metric_store.clone(),
    );
    let detector = RegressionDetector::new(
        metric_store.clone(),
        baseline_service.clone(),
        event_store.clone(),
    );
    let remediation_service = RemediationService::new(Arc::clone(&provider), audit_store.clone());
    let summary_service =
        SummaryService::new(metric_store.clone(), fingerprint_store.clone(), event_store.clone());
    let health_service = Arc::new(HealthService::new(
        pool.clone(),
        metric_store.clone(),
        Arc::clone(&provider),
        config_handle.clone(),
    ));

    // Scheduler: loop_cancel stops new runs immediately on shutdown;
    // run_cancel hard-cancels in-flight runs after the drain window
    let loop_cancel = CancellationToken::new();
    let run_cancel = CancellationToken::new();
    let backoff = BackoffPolicy::default();

    let mut job_handles = Vec::new();
    let mut job_controls = Vec::new();

    let collection_schedule = Schedule::Interval {
        every: Duration::from_secs(config.collection.interval_secs),
        startup_delay: Duration::from_secs(10),
    };
    let (handle, control) = ScheduledExecutor::new(
        collection_schedule,
        backoff,
        config_handle.clone(),
        loop_cancel.clone(),
        run_cancel.clone(),
    )
    .start(CollectionJob::new(orchestrator));
    job_handles.push(handle);
    job_controls.push(control);

    let analysis_schedule = Schedule::Interval {
        every: Duration::from_secs(config.analysis.interval_secs),
        startup_delay: Duration::from_secs(30),
    };
    let (handle, control) = ScheduledExecutor::new(
        analysis_schedule,
        backoff,
        config_handle.clone(),
        loop_cancel.clone(),
        run_cancel.clone(),
    )
    .start(AnalysisJob::new(
        detector,
        metric_store.clone(),
        fingerprint_store.clone(),
        event_store.clone(),
        remediation_service,
    ));
    job_handles.push(handle);
    job_controls.push(control);

    let (rebuild_hour, rebuild_minute) = config
        .baseline
        .rebuild_time_of_day()
        .map_err(|e| format!("baseline.rebuild_time: {}", e))?;
    let (handle, control) = ScheduledExecutor::new(
        Schedule::Daily { hour: rebuild_hour, minute: rebuild_minute },
        backoff,
        config_handle.clone(),
        loop_cancel.clone(),
        run_cancel.clone(),
    )
    .start(BaselineRebuildJob::new(baseline_service.clone()));
    job_handles.push(handle);
    job_controls.push(control);

    let (handle, control) = ScheduledExecutor::new(
        Schedule::Daily { hour: 8, minute: 0 },
        backoff,
        config_handle.clone(),
        loop_cancel.clone(),
        run_cancel.clone(),
    )
    .start(DailySummaryJob::new(summary_service));
    job_handles.push(handle);
    job_controls.push(control);

    health_service.set_job_controls(job_controls);
    tracing::info!(jobs = job_handles.len(), "Scheduler started");

    // Configuration reload on SIGHUP; invalid files keep the old snapshot.
    // New snapshots also retire provider pools for removed instances.
    if let Some(path) = config_path {
        let reload_handle = config_handle.clone();
        let reload_pools = pool_manager.clone();
        tokio::spawn(async move {
            let Ok(mut hangup) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                return;
            };
            while hangup.recv().await.is_some() {
                match reload_handle.reload_from(&path) {
                    Ok(()) => {
                        let names: Vec<String> = reload_handle
                            .current()
                            .instances
                            .iter()
                            .map(|i| i.name.clone())
                            .collect();
                        reload_pools.retain_instances(&names);
                    },
                    Err(e) => tracing::error!("Configuration reload rejected: {}", e),
                }
            }
        });
    }

    let app_state = AppState {
        db: pool.clone(),
        config: config_handle.clone(),
        provider: Arc::clone(&provider),
        fingerprint_store,
        metric_store,
        event_store,
        audit_store,
        baseline_service,
        health_service: Arc::clone(&health_service),
    };

    // Health surface
    let app = handlers::health::router(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    tracing::info!("Health surface listening on http://{}", config.server.listen);
    tracing::info!("Vigil is ready");

    let server_cancel = CancellationToken::new();
    let server_token = server_cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
    });

    wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    // Stop issuing runs, give in-flight runs the drain window, then
    // hard-cancel whatever is left
    loop_cancel.cancel();
    let drain = Duration::from_secs(config.server.shutdown_drain_secs);
    let all_jobs = async {
        for handle in job_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(drain, all_jobs).await.is_err() {
        tracing::warn!("Drain window elapsed; hard-cancelling in-flight runs");
        run_cancel.cancel();
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    server_cancel.cancel();
    let _ = server.await;

    tracing::info!("Vigil stopped");
    Ok(())
}

/// Bring up the tracing stack: a stdout layer always, plus a daily-rolling
/// file layer when `logging.file` is set. Returns the appender guard.
fn init_tracing(
    logging: &vigil::config::LoggingConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::new(&logging.level);
    let base = tracing_subscriber::registry().with(filter);

    let Some(target) = logging.file.as_deref() else {
        base.with(tracing_subscriber::fmt::layer()).init();
        return None;
    };

    let target = std::path::Path::new(target);
    let directory = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            let _ = std::fs::create_dir_all(parent);
            parent
        },
        _ => std::path::Path::new("."),
    };
    let prefix = target
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix));
    base.with(tracing_subscriber::fmt::layer().with_writer(writer))
        .with(tracing_subscriber::fmt::layer())
        .init();
    Some(guard)
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => {},
                _ = terminate.recv() => {},
            }
        },
        Err(_) => {
            let _ = ctrl_c.await;
        },
    }
}

/// Parent directory for `sqlite://path/to/file.db` URLs, so first startup
/// can create it. In-memory URLs yield nothing.
fn sqlite_file_parent(url: &str) -> Option<std::path::PathBuf> {
    let path = url.strip_prefix("sqlite://")?;
    if path.starts_with(':') {
        return None;
    }
    std::path::Path::new(path).parent().map(|p| p.to_path_buf())
}
