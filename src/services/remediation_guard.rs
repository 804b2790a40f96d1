//! Remediation Guard
//!
//! The multi-layer policy gate consulted before any remediation statement
//! runs. Pure over (config, audit history, now, request): it performs no
//! I/O, executes nothing, and writes nothing; the caller audits actual
//! attempts. Gates evaluate in a fixed order and the first denial wins.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::config::SecurityConfig;
use crate::models::{AuditRecord, GuardDecision, RemediationRequest, RiskLevel, SecurityMode};

/// Databases remediation must never touch, regardless of configuration.
/// Covers the classic system catalogs plus the MySQL system schemata the
/// provider can reach.
const SYSTEM_DATABASES: &[&str] = &[
    "master",
    "msdb",
    "model",
    "tempdb",
    "resource",
    "mysql",
    "information_schema",
    "performance_schema",
    "sys",
];

/// True when `hour` lies inside `[start, end)` with wrap-around when
/// `end <= start` (a window of 22 to 4 covers 22:00 through 03:59).
pub fn in_maintenance_window(hour: u32, start: u8, end: u8) -> bool {
    let (start, end) = (start as u32, end as u32);
    if end <= start {
        hour >= start || hour < end
    } else {
        hour >= start && hour < end
    }
}

pub struct RemediationGuard;

impl RemediationGuard {
    /// Evaluate the gate chain. Identical inputs always yield identical
    /// decisions.
    pub fn evaluate(
        request: &RemediationRequest,
        security: &SecurityConfig,
        recent_audits: &[AuditRecord],
        now: DateTime<Utc>,
    ) -> GuardDecision {
        // 1. Global kill switch
        if !security.enable_remediation {
            return GuardDecision::deny("Remediation is globally disabled");
        }

        // 2. Mode
        match security.mode {
            SecurityMode::ReadOnly => {
                return GuardDecision::deny("Read-only mode: execution not permitted");
            },
            SecurityMode::SuggestRemediation => {
                return GuardDecision::deny(
                    "Suggest-only mode: execution not permitted",
                );
            },
            SecurityMode::AutoApplyLowRisk => {
                if request.risk > RiskLevel::Low {
                    return GuardDecision::deny(format!(
                        "Risk {} exceeds Low threshold for auto-apply",
                        request.risk
                    ));
                }
            },
        }

        // 3. System databases
        if SYSTEM_DATABASES
            .iter()
            .any(|db| db.eq_ignore_ascii_case(&request.database_name))
        {
            return GuardDecision::deny(format!(
                "'{}' is a system database",
                request.database_name
            ));
        }

        // 4. Excluded databases
        if security
            .excluded_databases
            .iter()
            .any(|db| db.eq_ignore_ascii_case(&request.database_name))
        {
            return GuardDecision::deny(format!(
                "'{}' is excluded by configuration",
                request.database_name
            ));
        }

        // 5. Approval threshold
        if request.risk >= security.approval_threshold {
            return GuardDecision::deny(format!(
                "Risk {} requires approval (threshold: {})",
                request.risk, security.approval_threshold
            ));
        }

        // 6. Rate limit: real executions only; failures and dry-runs do
        //    not consume budget
        let hour_ago = now - Duration::hours(1);
        let executed_last_hour = recent_audits
            .iter()
            .filter(|a| a.success && !a.is_dry_run && a.executed_at > hour_ago)
            .count() as u32;
        if executed_last_hour >= security.max_remediations_per_hour {
            return GuardDecision::deny(format!(
                "Rate limit exceeded: {} of {} remediations in the last hour",
                executed_last_hour, security.max_remediations_per_hour
            ));
        }

        // 7. Maintenance window
        if security.require_maintenance_window {
            let hour = now.hour();
            if !in_maintenance_window(
                hour,
                security.maintenance_window_start_hour,
                security.maintenance_window_end_hour,
            ) {
                return GuardDecision::deny(format!(
                    "Outside maintenance window [{:02}:00, {:02}:00)",
                    security.maintenance_window_start_hour, security.maintenance_window_end_hour
                ));
            }
        }

        // 8. Permitted; the dry-run flag rides along from configuration
        GuardDecision::permit(security.dry_run)
    }
}
