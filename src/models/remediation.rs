use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How far the daemon is allowed to go on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Observe only; never execute anything
    ReadOnly,
    /// Produce proposals, never execute
    SuggestRemediation,
    /// Execute automatically, but only Low-risk remediations
    AutoApplyLowRisk,
}

impl Default for SecurityMode {
    fn default() -> Self {
        Self::ReadOnly
    }
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::SuggestRemediation => "suggest_remediation",
            Self::AutoApplyLowRisk => "auto_apply_low_risk",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_only" => Ok(Self::ReadOnly),
            "suggest_remediation" => Ok(Self::SuggestRemediation),
            "auto_apply_low_risk" => Ok(Self::AutoApplyLowRisk),
            other => Err(format!("unknown security mode: {}", other)),
        }
    }
}

/// Risk classification of a remediation. Ordered: Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// The remediation catalogue. The only type the daemon proposes on its own
/// is AnalyzeTable; everything else arrives from an operator and passes the
/// same guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationType {
    /// Refresh the optimizer's statistics for a table
    AnalyzeTable,
    /// Rebuild a table and its indexes
    OptimizeTable,
}

impl RemediationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzeTable => "analyze_table",
            Self::OptimizeTable => "optimize_table",
        }
    }

    pub fn default_risk(&self) -> RiskLevel {
        match self {
            Self::AnalyzeTable => RiskLevel::Low,
            Self::OptimizeTable => RiskLevel::High,
        }
    }
}

impl fmt::Display for RemediationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed remediation, the guard's subject.
#[derive(Debug, Clone)]
pub struct RemediationRequest {
    pub instance_name: String,
    pub database_name: String,
    pub fingerprint_id: Option<i64>,
    pub remediation_type: RemediationType,
    pub statement: String,
    pub risk: RiskLevel,
}

/// The guard's verdict. Permit carries the effective dry-run flag; deny
/// carries the first failing gate's reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub permitted: bool,
    pub reason: String,
    pub is_dry_run: bool,
}

impl GuardDecision {
    pub fn permit(is_dry_run: bool) -> Self {
        Self { permitted: true, reason: "permitted".to_string(), is_dry_run }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { permitted: false, reason: reason.into(), is_dry_run: false }
    }
}

/// Immutable audit entry for one remediation attempt. Dry-runs and failures
/// are recorded too; denials are not attempts and are only logged.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub fingerprint_id: Option<i64>,
    pub remediation_type: String,
    pub sql_text: String,
    pub is_dry_run: bool,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub actor: String,
    pub host: String,
    pub service_version: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub instance_name: String,
    pub database_name: String,
    pub fingerprint_id: Option<i64>,
    pub remediation_type: RemediationType,
    pub sql_text: String,
    pub is_dry_run: bool,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub actor: String,
    pub host: String,
    pub service_version: String,
    pub executed_at: DateTime<Utc>,
}
