// Remediation attempt path: the guard decision applied through the real
// audit store, dry-run handling, failure auditing, and the rate limit over
// actual executions.

use chrono::Utc;
use std::sync::Arc;

use crate::models::{RemediationRequest, RemediationType, RiskLevel, SecurityMode};
use crate::services::{AuditStore, RemediationService, StatsProvider};
use crate::tests::common::{create_test_db, test_config, test_instance, MockStatsProvider};

fn request() -> RemediationRequest {
    RemediationRequest {
        instance_name: "prod".to_string(),
        database_name: "sales".to_string(),
        fingerprint_id: Some(1),
        remediation_type: RemediationType::AnalyzeTable,
        statement: "ANALYZE TABLE `orders`".to_string(),
        risk: RiskLevel::Low,
    }
}

fn permissive_config() -> crate::config::MonitorConfig {
    let mut config = test_config(vec![test_instance("prod")]);
    config.security.enable_remediation = true;
    config.security.mode = SecurityMode::AutoApplyLowRisk;
    config.security.dry_run = false;
    config.security.approval_threshold = RiskLevel::Medium;
    config.security.require_maintenance_window = false;
    config.security.max_remediations_per_hour = 3;
    config
}

#[tokio::test]
async fn test_denial_writes_no_audit_record() {
    let pool = create_test_db().await;
    let audits = AuditStore::new(pool.clone());
    let provider = Arc::new(MockStatsProvider::new());
    let service = RemediationService::new(Arc::clone(&provider) as Arc<dyn StatsProvider>, audits.clone());

    // Defaults: remediation globally disabled
    let config = test_config(vec![test_instance("prod")]);
    let outcome = service.attempt(&request(), &config).await.unwrap();

    assert!(!outcome.decision.permitted);
    assert!(outcome.audit_id.is_none());
    let records = audits.recent(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert!(records.is_empty());
    assert!(provider.executed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dry_run_is_audited_but_not_executed() {
    let pool = create_test_db().await;
    let audits = AuditStore::new(pool.clone());
    let provider = Arc::new(MockStatsProvider::new());
    let service = RemediationService::new(Arc::clone(&provider) as Arc<dyn StatsProvider>, audits.clone());

    let mut config = permissive_config();
    config.security.dry_run = true;

    let outcome = service.attempt(&request(), &config).await.unwrap();
    assert!(outcome.decision.permitted);
    assert!(outcome.decision.is_dry_run);
    assert!(outcome.audit_id.is_some());

    // Nothing reached the provider
    assert!(provider.executed.lock().unwrap().is_empty());

    let records = audits.recent(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_dry_run);
    assert!(records[0].success);

    // Dry-runs never consume rate-limit budget
    assert_eq!(
        audits
            .executed_count_since(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_execution_failure_is_audited_as_failure() {
    let pool = create_test_db().await;
    let audits = AuditStore::new(pool.clone());
    let provider = Arc::new(MockStatsProvider::new());
    provider.fail_execute_on("prod");
    let service = RemediationService::new(Arc::clone(&provider) as Arc<dyn StatsProvider>, audits.clone());

    let outcome = service.attempt(&request(), &permissive_config()).await.unwrap();
    assert!(outcome.decision.permitted);

    let records = audits.recent(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error.as_deref().unwrap().contains("scripted"));

    // Failed attempts do not count as executions either
    assert_eq!(
        audits
            .executed_count_since(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_rate_limit_applies_to_real_executions() {
    let pool = create_test_db().await;
    let audits = AuditStore::new(pool.clone());
    let provider = Arc::new(MockStatsProvider::new());
    let service = RemediationService::new(Arc::clone(&provider) as Arc<dyn StatsProvider>, audits.clone());
    let config = permissive_config();

    // Three real executions fill the hourly budget
    for _ in 0..3 {
        let outcome = service.attempt(&request(), &config).await.unwrap();
        assert!(outcome.decision.permitted);
        assert!(!outcome.decision.is_dry_run);
    }
    assert_eq!(provider.executed.lock().unwrap().len(), 3);

    // The fourth is denied and leaves no audit row
    let denied = service.attempt(&request(), &config).await.unwrap();
    assert!(!denied.decision.permitted);
    assert!(denied.decision.reason.contains("Rate limit"));
    assert_eq!(provider.executed.lock().unwrap().len(), 3);

    let records = audits.recent(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn test_system_database_denied_in_attempt_path() {
    let pool = create_test_db().await;
    let audits = AuditStore::new(pool.clone());
    let provider = Arc::new(MockStatsProvider::new());
    let service = RemediationService::new(Arc::clone(&provider) as Arc<dyn StatsProvider>, audits.clone());

    let mut req = request();
    req.database_name = "TempDB".to_string();
    let outcome = service.attempt(&req, &permissive_config()).await.unwrap();

    assert!(!outcome.decision.permitted);
    assert!(outcome.decision.reason.contains("system database"));
    assert!(provider.executed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_records_carry_identity() {
    let pool = create_test_db().await;
    let audits = AuditStore::new(pool.clone());
    let provider = Arc::new(MockStatsProvider::new());
    let service = RemediationService::new(Arc::clone(&provider) as Arc<dyn StatsProvider>, audits.clone());

    let mut config = permissive_config();
    config.security.actor = "ops-bot".to_string();
    service.attempt(&request(), &config).await.unwrap();

    let records = audits.recent(Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(records[0].actor, "ops-bot");
    assert_eq!(records[0].service_version, env!("CARGO_PKG_VERSION"));
    assert!(!records[0].host.is_empty());
    assert_eq!(records[0].remediation_type, "analyze_table");
}
