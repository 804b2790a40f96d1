// Audit Store
// Purpose: Append-only log of remediation attempts. Dry-runs and failures
// are recorded; rows are never rewritten. The guard's rate limit reads
// back through `recent`.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{AuditRecord, NewAuditRecord};
use crate::utils::MonitorResult;

#[derive(Clone)]
pub struct AuditStore {
    pool: SqlitePool,
}

impl AuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, record: &NewAuditRecord) -> MonitorResult<i64> {
        let result = sqlx::query(
            "INSERT INTO remediation_audit
                 (instance_name, database_name, fingerprint_id, remediation_type,
                  sql_text, is_dry_run, success, error, duration_ms, actor, host,
                  service_version, executed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.instance_name)
        .bind(&record.database_name)
        .bind(record.fingerprint_id)
        .bind(record.remediation_type.as_str())
        .bind(&record.sql_text)
        .bind(record.is_dry_run)
        .bind(record.success)
        .bind(&record.error)
        .bind(record.duration_ms)
        .bind(&record.actor)
        .bind(&record.host)
        .bind(&record.service_version)
        .bind(record.executed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All records at or after the given instant, oldest first. The guard
    /// receives this slice and applies its own filters.
    pub async fn recent(&self, since: DateTime<Utc>) -> MonitorResult<Vec<AuditRecord>> {
        let records: Vec<AuditRecord> = sqlx::query_as(
            "SELECT * FROM remediation_audit
             WHERE executed_at >= ?
             ORDER BY executed_at ASC, id ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Count of real executions (success, not dry-run) since the instant.
    pub async fn executed_count_since(&self, since: DateTime<Utc>) -> MonitorResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM remediation_audit
             WHERE executed_at >= ? AND success = 1 AND is_dry_run = 0",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
