use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The per-execution metrics compared against baselines.
///
/// `ALL` is in lexicographic name order; that order is the final tie-break
/// when two metrics regress with identical ratio and z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedMetric {
    AvgCpu,
    AvgDuration,
    AvgLogicalReads,
}

impl TrackedMetric {
    pub const ALL: [TrackedMetric; 3] = [Self::AvgCpu, Self::AvgDuration, Self::AvgLogicalReads];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AvgCpu => "avg_cpu",
            Self::AvgDuration => "avg_duration",
            Self::AvgLogicalReads => "avg_logical_reads",
        }
    }
}

impl fmt::Display for TrackedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackedMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg_cpu" => Ok(Self::AvgCpu),
            "avg_duration" => Ok(Self::AvgDuration),
            "avg_logical_reads" => Ok(Self::AvgLogicalReads),
            other => Err(format!("unknown tracked metric: {}", other)),
        }
    }
}

/// Severity is a function of the ratio on the regressed metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// [2, 3) Low; [3, 6) Medium; [6, 10) High; >= 10 Critical.
    /// Callers only map ratios that already cleared the regression rule.
    pub fn from_ratio(r: f64) -> Self {
        if r >= 10.0 {
            Self::Critical
        } else if r >= 6.0 {
            Self::High
        } else if r >= 3.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Regression event lifecycle.
///
/// New → Acknowledged → (Resolved | AutoResolved | Dismissed); AutoResolved
/// is also reachable straight from New. Terminal states have no outgoing
/// transitions; a later regression opens a fresh event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    New,
    Acknowledged,
    Resolved,
    AutoResolved,
    Dismissed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::AutoResolved => "auto_resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::Acknowledged)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        match self {
            Self::New => matches!(
                next,
                Self::Acknowledged | Self::Resolved | Self::AutoResolved | Self::Dismissed
            ),
            Self::Acknowledged => {
                matches!(next, Self::Resolved | Self::AutoResolved | Self::Dismissed)
            },
            _ => false,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            "auto_resolved" => Ok(Self::AutoResolved),
            "dismissed" => Ok(Self::Dismissed),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// One detected regression for one (fingerprint, metric). At most one open
/// event per pair exists at any time.
#[derive(Debug, Clone, Serialize)]
pub struct RegressionEvent {
    pub id: i64,
    pub fingerprint_id: i64,
    pub instance_name: String,
    pub database_name: String,
    pub metric: TrackedMetric,
    pub status: EventStatus,
    pub severity: Severity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Baseline mean for the regressed metric at detection time
    pub baseline_mean: f64,
    /// Recent median for the regressed metric at the latest evaluation
    pub current_value: f64,
    /// current / baseline ratio
    pub magnitude: f64,
    /// Consecutive evaluations below the hysteresis threshold; two in a row
    /// auto-resolve the event
    pub clear_streak: i64,
}
