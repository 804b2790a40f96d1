//! Vigil Library
//!
//! This library contains all the core modules for the Vigil monitoring
//! daemon: the plan-collection pipeline, the analysis engine, the
//! remediation guard, and the job scheduler.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{ConfigHandle, MonitorConfig};
pub use services::{
    AuditStore, BaselineService, CollectionOrchestrator, EventStore, FingerprintService,
    FingerprintStore, HealthService, MetricStore, MySqlStatsProvider, ProviderPoolManager,
    RegressionDetector, RemediationGuard, RemediationService, StatsProvider, SummaryService,
};
pub use utils::{MonitorError, MonitorResult};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI
/// container. All services are wrapped in Arc for cheap cloning and thread
/// safety; the config handle publishes immutable snapshots.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: ConfigHandle,

    pub provider: Arc<dyn StatsProvider>,
    pub fingerprint_store: FingerprintStore,
    pub metric_store: MetricStore,
    pub event_store: EventStore,
    pub audit_store: AuditStore,

    pub baseline_service: BaselineService,
    pub health_service: Arc<HealthService>,
}
