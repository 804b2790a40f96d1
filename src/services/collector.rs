//! Collection Orchestrator
//!
//! One run fans out over the enabled instances and their databases with
//! bounded parallelism, pulls top-N query statistics through the provider,
//! assigns fingerprints, and appends metric samples. Failure isolation:
//! a database failure is captured in its own summary and never aborts
//! siblings; instance failures abort the run only when configured to;
//! metric-store failures always fail the run.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DatabaseEntry, EffectiveCollection, InstanceConfig, MonitorConfig};
use crate::models::{FingerprintUpsert, NewMetricSample, TimeWindow};
use crate::services::fingerprint_service::FingerprintService;
use crate::services::fingerprint_store::FingerprintStore;
use crate::services::metric_store::MetricStore;
use crate::services::stats_provider::StatsProvider;
use crate::utils::scheduled_executor::{JobContext, ScheduledTask};
use crate::utils::{MonitorError, MonitorResult};

// ============================================================================
// Run summaries
// ============================================================================

/// Per-database outcome of one run.
#[derive(Debug, Clone)]
pub struct DatabaseRunSummary {
    pub instance_name: String,
    pub database_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub queries_seen: usize,
    pub new_fingerprints: usize,
    pub samples_saved: usize,
    pub counter_resets: usize,
    /// First provider error for this database, if any
    pub error: Option<String>,
}

impl DatabaseRunSummary {
    fn started(instance_name: &str, database_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            database_name: database_name.to_string(),
            started_at: now,
            completed_at: now,
            queries_seen: 0,
            new_fingerprints: 0,
            samples_saved: 0,
            counter_resets: 0,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-instance outcome of one run.
#[derive(Debug, Clone)]
pub struct InstanceRunSummary {
    pub instance_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub databases: Vec<DatabaseRunSummary>,
    /// Instance-level error (discovery failure, aborted fan-out)
    pub error: Option<String>,
}

impl InstanceRunSummary {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.databases.iter().all(DatabaseRunSummary::succeeded)
    }

    pub fn any_database_succeeded(&self) -> bool {
        self.databases.iter().any(DatabaseRunSummary::succeeded)
    }
}

/// Whole-run outcome, logged as the structured run summary.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub instances: Vec<InstanceRunSummary>,
}

impl RunSummary {
    pub fn database_count(&self) -> usize {
        self.instances.iter().map(|i| i.databases.len()).sum()
    }

    pub fn queries_seen(&self) -> usize {
        self.instances
            .iter()
            .flat_map(|i| &i.databases)
            .map(|d| d.queries_seen)
            .sum()
    }

    pub fn new_fingerprints(&self) -> usize {
        self.instances
            .iter()
            .flat_map(|i| &i.databases)
            .map(|d| d.new_fingerprints)
            .sum()
    }

    pub fn samples_saved(&self) -> usize {
        self.instances
            .iter()
            .flat_map(|i| &i.databases)
            .map(|d| d.samples_saved)
            .sum()
    }

    pub fn counter_resets(&self) -> usize {
        self.instances
            .iter()
            .flat_map(|i| &i.databases)
            .map(|d| d.counter_resets)
            .sum()
    }

    pub fn any_database_succeeded(&self) -> bool {
        self.instances.iter().any(InstanceRunSummary::any_database_succeeded)
    }

    /// First error across streams, instance order then database order.
    pub fn first_error(&self) -> Option<&str> {
        for instance in &self.instances {
            if let Some(e) = &instance.error {
                return Some(e);
            }
            for database in &instance.databases {
                if let Some(e) = &database.error {
                    return Some(e);
                }
            }
        }
        None
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Clone)]
pub struct CollectionOrchestrator {
    provider: Arc<dyn StatsProvider>,
    fingerprints: FingerprintStore,
    metrics: MetricStore,
    fingerprint_service: FingerprintService,
}

impl CollectionOrchestrator {
    pub fn new(
        provider: Arc<dyn StatsProvider>,
        fingerprints: FingerprintStore,
        metrics: MetricStore,
    ) -> Self {
        Self { provider, fingerprints, metrics, fingerprint_service: FingerprintService::new() }
    }

    /// Execute one collection run against a configuration snapshot.
    ///
    /// The snapshot is immutable for the whole run; a reload mid-run is
    /// observed by the next run only.
    pub async fn run(
        &self,
        config: Arc<MonitorConfig>,
        cancel: CancellationToken,
    ) -> MonitorResult<RunSummary> {
        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let instances = config.enabled_instances();

        tracing::info!(
            run_id = %run_id,
            instances = instances.len(),
            "Collection run starting"
        );

        let run_scope = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(config.collection.max_instance_parallelism));
        let mut tasks: JoinSet<MonitorResult<InstanceRunSummary>> = JoinSet::new();

        for instance in instances {
            let permit = tokio::select! {
                _ = run_scope.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| MonitorError::internal("instance semaphore closed"))?
                },
            };

            let orchestrator = self.clone();
            let config = Arc::clone(&config);
            let scope = run_scope.clone();
            tasks.spawn(async move {
                let _permit = permit;
                orchestrator.collect_instance(&instance, &config, scope).await
            });
        }

        let mut summaries = Vec::new();
        let mut hard_error: Option<MonitorError> = None;
        let mut abort_requested = false;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(summary)) => {
                    // Database-level errors are governed by
                    // continue_on_database_error inside the instance; only
                    // an instance-level failure can abort the run
                    if summary.error.is_some() && !config.collection.continue_on_instance_error {
                        tracing::warn!(
                            run_id = %run_id,
                            instance = %summary.instance_name,
                            "Instance failed and continue_on_instance_error is off; aborting run"
                        );
                        abort_requested = true;
                        run_scope.cancel();
                    }
                    summaries.push(summary);
                },
                Ok(Err(e)) => {
                    // A sibling we cancelled ourselves is not a run failure;
                    // anything else (storage, external cancellation) is
                    if !(e.is_cancelled() && abort_requested) {
                        run_scope.cancel();
                        if hard_error.is_none() {
                            hard_error = Some(e);
                        }
                    }
                },
                Err(join_err) => {
                    run_scope.cancel();
                    if hard_error.is_none() {
                        hard_error =
                            Some(MonitorError::internal(format!("instance task panicked: {}", join_err)));
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }
        if let Some(e) = hard_error {
            if !e.is_cancelled() {
                tracing::error!(run_id = %run_id, error = %e, "Collection run failed");
            }
            return Err(e);
        }

        summaries.sort_by(|a, b| a.instance_name.cmp(&b.instance_name));
        let summary =
            RunSummary { run_id, started_at, completed_at: Utc::now(), instances: summaries };
        log_run_summary(&summary);
        Ok(summary)
    }

    async fn collect_instance(
        &self,
        instance: &InstanceConfig,
        config: &MonitorConfig,
        cancel: CancellationToken,
    ) -> MonitorResult<InstanceRunSummary> {
        let started_at = Utc::now();
        let mut summary = InstanceRunSummary {
            instance_name: instance.name.clone(),
            started_at,
            completed_at: started_at,
            databases: Vec::new(),
            error: None,
        };

        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }

        // Explicit list wins; otherwise auto-discovery through the provider
        let databases: Vec<DatabaseEntry> = if instance.databases.is_empty() {
            let effective = EffectiveCollection::resolve(&config.collection, instance, None);
            let discovered = tokio::select! {
                _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
                result = tokio::time::timeout(
                    effective.timeout,
                    self.provider.list_databases(instance),
                ) => match result {
                    Err(_) => Err(MonitorError::provider_timeout(format!(
                        "instance '{}': database discovery timed out",
                        instance.name
                    ))),
                    Ok(inner) => inner,
                },
            };

            match discovered {
                Ok(names) => names.into_iter().map(DatabaseEntry::Name).collect(),
                Err(e) => {
                    tracing::warn!(
                        instance = %instance.name,
                        error = %e,
                        "Database discovery failed"
                    );
                    summary.error = Some(e.to_string());
                    summary.completed_at = Utc::now();
                    return Ok(summary);
                },
            }
        } else {
            instance.databases.clone()
        };

        let instance_scope = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(config.collection.max_db_parallelism));
        let mut tasks: JoinSet<MonitorResult<DatabaseRunSummary>> = JoinSet::new();

        for entry in databases {
            let permit = tokio::select! {
                _ = instance_scope.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| MonitorError::internal("database semaphore closed"))?
                },
            };

            let orchestrator = self.clone();
            let instance = instance.clone();
            let global = config.collection.clone();
            let scope = instance_scope.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let effective = EffectiveCollection::resolve(&global, &instance, Some(&entry));
                orchestrator
                    .collect_database(&instance, entry.name(), effective, scope)
                    .await
            });
        }

        let mut hard_error: Option<MonitorError> = None;
        let mut abort_requested = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(db_summary)) => {
                    if !db_summary.succeeded() && !config.collection.continue_on_database_error {
                        abort_requested = true;
                        instance_scope.cancel();
                    }
                    summary.databases.push(db_summary);
                },
                Ok(Err(e)) => {
                    // Siblings cancelled by our own abort unwind quietly;
                    // real failures and external cancellation propagate
                    if !(e.is_cancelled() && abort_requested) {
                        instance_scope.cancel();
                        if hard_error.is_none() {
                            hard_error = Some(e);
                        }
                    }
                },
                Err(join_err) => {
                    instance_scope.cancel();
                    if hard_error.is_none() {
                        hard_error = Some(MonitorError::internal(format!(
                            "database task panicked: {}",
                            join_err
                        )));
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }
        if let Some(e) = hard_error {
            return Err(e);
        }
        if abort_requested && summary.error.is_none() {
            summary.error = Some("aborted after database failure".to_string());
        }

        summary.databases.sort_by(|a, b| a.database_name.cmp(&b.database_name));
        summary.completed_at = Utc::now();
        Ok(summary)
    }

    async fn collect_database(
        &self,
        instance: &InstanceConfig,
        database: &str,
        effective: EffectiveCollection,
        cancel: CancellationToken,
    ) -> MonitorResult<DatabaseRunSummary> {
        let now = Utc::now();
        let mut summary = DatabaseRunSummary::started(&instance.name, database, now);

        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }

        let window = TimeWindow::trailing(
            now,
            chrono::Duration::from_std(effective.lookback)
                .map_err(|e| MonitorError::internal(format!("lookback out of range: {}", e)))?,
        );

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            result = tokio::time::timeout(
                effective.timeout,
                self.provider
                    .top_queries_by_elapsed(instance, database, effective.top_n, window),
            ) => match result {
                Err(_) => Err(MonitorError::provider_timeout(format!(
                    "instance '{}', database '{}': provider call exceeded {:?}",
                    instance.name, database, effective.timeout
                ))),
                Ok(inner) => inner,
            },
        };

        let stats = match fetched {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(
                    instance = %instance.name,
                    database = %database,
                    error = %e,
                    "Statistics fetch failed"
                );
                summary.error = Some(e.to_string());
                summary.completed_at = Utc::now();
                return Ok(summary);
            },
        };

        summary.queries_seen = stats.len();

        for stat in &stats {
            let parts = match self
                .fingerprint_service
                .fingerprint(stat.sql_text.as_bytes(), stat.query_hash.as_deref())
            {
                Ok(parts) => parts,
                Err(e) => {
                    tracing::warn!(
                        instance = %instance.name,
                        database = %database,
                        error = %e,
                        "Skipping row with unusable query text"
                    );
                    continue;
                },
            };

            let upsert = FingerprintUpsert {
                instance_name: instance.name.clone(),
                database_name: database.to_string(),
                hash: parts.hash,
                sample_text: parts.sample_text,
                normalized_text: parts.normalized_text,
            };
            let (fingerprint_id, created) = self.fingerprints.upsert(&upsert, now).await?;
            if created {
                summary.new_fingerprints += 1;
            }

            // A decreasing server-side counter means the engine was
            // restarted or its statistics were flushed; the sample is kept
            // but flagged so analysis skips it until the next one.
            let previous = self.metrics.last_execution_count(fingerprint_id).await?;
            let counter_reset = previous.is_some_and(|prev| stat.execution_count < prev);
            if counter_reset {
                summary.counter_resets += 1;
                tracing::warn!(
                    instance = %instance.name,
                    database = %database,
                    fingerprint_id,
                    previous = previous.unwrap_or(0),
                    current = stat.execution_count,
                    "Counter reset observed"
                );
            }

            let sample = NewMetricSample::from_stat(
                fingerprint_id,
                &instance.name,
                database,
                now,
                stat,
                counter_reset,
            );
            self.metrics.append_sample(&sample).await?;
            summary.samples_saved += 1;
        }

        summary.completed_at = Utc::now();
        Ok(summary)
    }
}

fn log_run_summary(summary: &RunSummary) {
    tracing::info!(
        run_id = %summary.run_id,
        duration_ms = (summary.completed_at - summary.started_at).num_milliseconds(),
        instances = summary.instances.len(),
        databases = summary.database_count(),
        queries = summary.queries_seen(),
        new_fingerprints = summary.new_fingerprints(),
        samples = summary.samples_saved(),
        counter_resets = summary.counter_resets(),
        first_error = summary.first_error().unwrap_or("none"),
        "Collection run complete"
    );
}

// ============================================================================
// Scheduled job wrapper
// ============================================================================

/// The collection job as the scheduler sees it. Provider failures count
/// toward the job's failure counter only when no database in the run
/// succeeded; storage failures always count.
pub struct CollectionJob {
    orchestrator: CollectionOrchestrator,
}

impl CollectionJob {
    pub fn new(orchestrator: CollectionOrchestrator) -> Self {
        Self { orchestrator }
    }

    async fn execute(&self, ctx: JobContext) -> MonitorResult<()> {
        let summary = self.orchestrator.run(ctx.config, ctx.cancel).await?;

        if summary.database_count() > 0 && !summary.any_database_succeeded() {
            return Err(MonitorError::provider_unavailable(format!(
                "no database succeeded: {}",
                summary.first_error().unwrap_or("unknown error")
            )));
        }
        Ok(())
    }
}

impl ScheduledTask for CollectionJob {
    fn name(&self) -> &str {
        "collection"
    }

    fn run(&self, ctx: JobContext) -> Pin<Box<dyn Future<Output = MonitorResult<()>> + Send + '_>> {
        Box::pin(self.execute(ctx))
    }
}
