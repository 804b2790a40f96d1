//! Remediation Service
//!
//! Builds remediation proposals for open regressions, consults the guard,
//! and (when permitted) executes through the provider. Exactly one audit
//! record is appended per attempt, dry-runs and failures included; denials
//! are logged, never audited.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{InstanceConfig, MonitorConfig};
use crate::models::{
    Fingerprint, GuardDecision, NewAuditRecord, RegressionEvent, RemediationRequest,
    RemediationType, Severity,
};
use crate::services::audit_store::AuditStore;
use crate::services::remediation_guard::RemediationGuard;
use crate::services::stats_provider::StatsProvider;
use crate::utils::{MonitorError, MonitorResult};

/// Execution timeout for a permitted remediation statement.
const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one handled event: the decision, and the audit row id when an
/// attempt was made.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub decision: GuardDecision,
    pub audit_id: Option<i64>,
}

#[derive(Clone)]
pub struct RemediationService {
    provider: Arc<dyn StatsProvider>,
    audits: AuditStore,
    host: String,
    service_version: String,
}

impl RemediationService {
    pub fn new(provider: Arc<dyn StatsProvider>, audits: AuditStore) -> Self {
        Self {
            provider,
            audits,
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Build the automatic proposal for a regressed fingerprint: refresh
    /// statistics for the primary table of the normalised statement. None
    /// when no table can be named or the regression is not severe enough.
    pub fn propose_for_event(
        &self,
        event: &RegressionEvent,
        fingerprint: &Fingerprint,
    ) -> Option<RemediationRequest> {
        if event.severity < Severity::High {
            return None;
        }

        let table = extract_primary_table(&fingerprint.normalized_text)?;
        Some(RemediationRequest {
            instance_name: event.instance_name.clone(),
            database_name: event.database_name.clone(),
            fingerprint_id: Some(event.fingerprint_id),
            remediation_type: RemediationType::AnalyzeTable,
            statement: format!("ANALYZE TABLE `{}`", table),
            risk: RemediationType::AnalyzeTable.default_risk(),
        })
    }

    /// Run one request through the guard and, when permitted, through the
    /// provider. The audit record is written on every attempt.
    pub async fn attempt(
        &self,
        request: &RemediationRequest,
        config: &MonitorConfig,
    ) -> MonitorResult<AttemptOutcome> {
        let now = Utc::now();
        let recent = self.audits.recent(now - chrono::Duration::hours(1)).await?;
        let decision = RemediationGuard::evaluate(request, &config.security, &recent, now);

        if !decision.permitted {
            tracing::info!(
                instance = %request.instance_name,
                database = %request.database_name,
                remediation = %request.remediation_type,
                reason = %decision.reason,
                "Remediation denied"
            );
            return Ok(AttemptOutcome { decision, audit_id: None });
        }

        let Some(instance) = config
            .instances
            .iter()
            .find(|i| i.name == request.instance_name)
        else {
            return Err(MonitorError::internal(format!(
                "instance '{}' disappeared from configuration",
                request.instance_name
            )));
        };

        let started = tokio::time::Instant::now();
        let (success, error) = if decision.is_dry_run {
            tracing::info!(
                instance = %request.instance_name,
                database = %request.database_name,
                statement = %request.statement,
                "Dry-run: statement not executed"
            );
            (true, None)
        } else {
            match self.execute(instance, request).await {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            }
        };

        let record = NewAuditRecord {
            instance_name: request.instance_name.clone(),
            database_name: request.database_name.clone(),
            fingerprint_id: request.fingerprint_id,
            remediation_type: request.remediation_type,
            sql_text: request.statement.clone(),
            is_dry_run: decision.is_dry_run,
            success,
            error: error.clone(),
            duration_ms: started.elapsed().as_millis() as i64,
            actor: config.security.actor.clone(),
            host: self.host.clone(),
            service_version: self.service_version.clone(),
            executed_at: now,
        };
        let audit_id = self.audits.append(&record).await?;

        match &error {
            None => tracing::info!(
                instance = %request.instance_name,
                database = %request.database_name,
                remediation = %request.remediation_type,
                dry_run = decision.is_dry_run,
                audit_id,
                "Remediation attempt recorded"
            ),
            Some(e) => tracing::warn!(
                instance = %request.instance_name,
                database = %request.database_name,
                remediation = %request.remediation_type,
                error = %e,
                audit_id,
                "Remediation attempt failed"
            ),
        }

        Ok(AttemptOutcome { decision, audit_id: Some(audit_id) })
    }

    async fn execute(
        &self,
        instance: &InstanceConfig,
        request: &RemediationRequest,
    ) -> MonitorResult<()> {
        match tokio::time::timeout(
            EXECUTION_TIMEOUT,
            self.provider
                .execute_statement(instance, &request.database_name, &request.statement),
        )
        .await
        {
            Err(_) => Err(MonitorError::provider_timeout(format!(
                "remediation statement exceeded {:?}",
                EXECUTION_TIMEOUT
            ))),
            Ok(inner) => inner,
        }
    }
}

/// First table named after FROM/UPDATE/INTO in a normalised statement.
/// Subqueries yield nothing (the next token is a parenthesis).
pub fn extract_primary_table(normalized: &str) -> Option<String> {
    let mut tokens = normalized.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if matches!(token, "FROM" | "UPDATE" | "INTO") {
            let candidate = tokens.peek()?;
            if candidate.starts_with('(') {
                return None;
            }
            let table = candidate
                .trim_matches('`')
                .trim_end_matches([',', ';'])
                .rsplit('.')
                .next()
                .unwrap_or(candidate)
                .trim_matches('`');
            if table.is_empty() || table == "?" {
                return None;
            }
            return Some(table.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_primary_table() {
        assert_eq!(
            extract_primary_table("SELECT * FROM orders WHERE id = ?"),
            Some("orders".to_string())
        );
        assert_eq!(
            extract_primary_table("SELECT a FROM `billing`.`invoices` JOIN x ON ..."),
            Some("invoices".to_string())
        );
        assert_eq!(
            extract_primary_table("UPDATE accounts SET v = ?"),
            Some("accounts".to_string())
        );
        assert_eq!(
            extract_primary_table("INSERT INTO audit_log VALUES (?)"),
            Some("audit_log".to_string())
        );
        assert_eq!(extract_primary_table("SELECT * FROM (SELECT ?) t"), None);
        assert_eq!(extract_primary_table("SELECT ?"), None);
    }
}
