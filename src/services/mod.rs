pub mod analysis;
pub mod audit_store;
pub mod baseline_service;
pub mod collector;
pub mod event_store;
pub mod fingerprint_service;
pub mod fingerprint_store;
pub mod health_service;
pub mod hotspot_detector;
pub mod metric_store;
pub mod regression_detector;
pub mod remediation_guard;
pub mod remediation_service;
pub mod stats_provider;
pub mod summary_service;

pub use analysis::AnalysisJob;
pub use audit_store::AuditStore;
pub use baseline_service::{BaselineRebuildJob, BaselineService, RebuildResult};
pub use collector::{
    CollectionJob, CollectionOrchestrator, DatabaseRunSummary, InstanceRunSummary, RunSummary,
};
pub use event_store::EventStore;
pub use fingerprint_service::FingerprintService;
pub use fingerprint_store::FingerprintStore;
pub use health_service::{HealthService, ProbeStatus, ReadinessReport};
pub use metric_store::MetricStore;
pub use regression_detector::{AnalysisOutcome, RegressionDetector};
pub use remediation_guard::RemediationGuard;
pub use remediation_service::{AttemptOutcome, RemediationService};
pub use stats_provider::{MySqlStatsProvider, ProviderPoolManager, StatsProvider};
pub use summary_service::{DailySummaryJob, SummaryService};
