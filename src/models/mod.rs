pub mod baseline;
pub mod fingerprint;
pub mod hotspot;
pub mod regression;
pub mod remediation;
pub mod sample;

pub use baseline::{BaselineStats, MetricStats, QueryBaseline};
pub use fingerprint::{Fingerprint, FingerprintParts, FingerprintUpsert};
pub use hotspot::{Hotspot, HotspotCandidate, RankMetric};
pub use regression::{EventStatus, RegressionEvent, Severity, TrackedMetric};
pub use remediation::{
    AuditRecord, GuardDecision, NewAuditRecord, RemediationRequest, RemediationType, RiskLevel,
    SecurityMode,
};
pub use sample::{MetricSample, NewMetricSample, QueryStat, TimeWindow};
