//! Health Service
//!
//! Three logical probes behind the HTTP surface: liveness (process
//! responsive), storage readiness (metric store reachable, schema
//! complete), and instance readiness (per-instance connectivity; degraded
//! when some fail, unhealthy when all fail). Probes run under a 10 s
//! timeout and never block the caller indefinitely. A healthy aggregate
//! probe resumes any suspended jobs.

use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::ConfigHandle;
use crate::services::metric_store::MetricStore;
use crate::services::stats_provider::StatsProvider;
use crate::utils::scheduled_executor::JobControl;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceProbe {
    pub name: String,
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub status: ProbeStatus,
    pub detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceProbe>,
}

pub struct HealthService {
    pool: SqlitePool,
    metrics: MetricStore,
    provider: Arc<dyn StatsProvider>,
    config: ConfigHandle,
    jobs: RwLock<Vec<JobControl>>,
}

impl HealthService {
    pub fn new(
        pool: SqlitePool,
        metrics: MetricStore,
        provider: Arc<dyn StatsProvider>,
        config: ConfigHandle,
    ) -> Self {
        Self { pool, metrics, provider, config, jobs: RwLock::new(Vec::new()) }
    }

    /// Register the job controls the readiness path may resume. Called once
    /// at startup after the scheduler spawns its jobs.
    pub fn set_job_controls(&self, controls: Vec<JobControl>) {
        if let Ok(mut jobs) = self.jobs.write() {
            *jobs = controls;
        }
    }

    pub fn liveness(&self) -> ProbeStatus {
        // Answering at all is the liveness criterion
        ProbeStatus::Healthy
    }

    /// Metric store reachable and the schema complete.
    pub async fn storage_readiness(&self) -> ReadinessReport {
        let probe = async {
            self.metrics.ping().await?;
            let complete = crate::db::schema_complete(&self.pool)
                .await
                .map_err(crate::utils::MonitorError::from)?;
            Ok::<bool, crate::utils::MonitorError>(complete)
        };

        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(true)) => ReadinessReport {
                status: ProbeStatus::Healthy,
                detail: "storage reachable, schema complete".to_string(),
                instances: Vec::new(),
            },
            Ok(Ok(false)) => ReadinessReport {
                status: ProbeStatus::Unhealthy,
                detail: "schema incomplete".to_string(),
                instances: Vec::new(),
            },
            Ok(Err(e)) => ReadinessReport {
                status: ProbeStatus::Unhealthy,
                detail: format!("storage unreachable: {}", e),
                instances: Vec::new(),
            },
            Err(_) => ReadinessReport {
                status: ProbeStatus::Unhealthy,
                detail: "storage probe timed out".to_string(),
                instances: Vec::new(),
            },
        }
    }

    /// Every enabled instance probed concurrently. Healthy when all answer,
    /// degraded when some fail, unhealthy when none do.
    pub async fn instance_readiness(&self) -> ReadinessReport {
        let config = self.config.current();
        let instances = config.enabled_instances();

        if instances.is_empty() {
            return ReadinessReport {
                status: ProbeStatus::Healthy,
                detail: "no instances configured".to_string(),
                instances: Vec::new(),
            };
        }

        let mut probes = Vec::with_capacity(instances.len());
        for instance in &instances {
            let reachable = matches!(
                tokio::time::timeout(PROBE_TIMEOUT, self.provider.test_connection(instance)).await,
                Ok(true)
            );
            probes.push(InstanceProbe { name: instance.name.clone(), reachable });
        }

        let reachable = probes.iter().filter(|p| p.reachable).count();
        let status = if reachable == probes.len() {
            ProbeStatus::Healthy
        } else if reachable > 0 {
            ProbeStatus::Degraded
        } else {
            ProbeStatus::Unhealthy
        };

        ReadinessReport {
            status,
            detail: format!("{}/{} instances reachable", reachable, probes.len()),
            instances: probes,
        }
    }

    /// Aggregate readiness: the worse of the two probes. A non-unhealthy
    /// outcome resumes suspended jobs.
    pub async fn readiness(&self) -> ReadinessReport {
        let storage = self.storage_readiness().await;
        let instances = self.instance_readiness().await;

        let status = match (storage.status, instances.status) {
            (ProbeStatus::Unhealthy, _) | (_, ProbeStatus::Unhealthy) => ProbeStatus::Unhealthy,
            (ProbeStatus::Degraded, _) | (_, ProbeStatus::Degraded) => ProbeStatus::Degraded,
            _ => ProbeStatus::Healthy,
        };

        if status != ProbeStatus::Unhealthy {
            self.resume_suspended_jobs();
        }

        ReadinessReport {
            status,
            detail: format!("storage: {}; instances: {}", storage.detail, instances.detail),
            instances: instances.instances,
        }
    }

    fn resume_suspended_jobs(&self) {
        if let Ok(jobs) = self.jobs.read() {
            for job in jobs.iter() {
                job.resume();
            }
        }
    }
}
