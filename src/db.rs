// Local state database
// Purpose: SQLite pool creation and idempotent schema setup for the
// fingerprint, sample, baseline, event and audit tables.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Tables the readiness probe checks for. Order matches creation order.
pub const REQUIRED_TABLES: &[&str] = &[
    "fingerprints",
    "metric_samples",
    "baselines",
    "regression_events",
    "remediation_audit",
];

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS fingerprints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        hash TEXT NOT NULL,
        sample_text TEXT NOT NULL,
        normalized_text TEXT NOT NULL,
        first_seen DATETIME NOT NULL,
        last_seen DATETIME NOT NULL,
        UNIQUE(instance_name, database_name, hash)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metric_samples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint_id INTEGER NOT NULL REFERENCES fingerprints(id),
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        sampled_at DATETIME NOT NULL,
        execution_count INTEGER NOT NULL,
        total_cpu_us INTEGER NOT NULL,
        avg_cpu_us INTEGER NOT NULL,
        total_elapsed_us INTEGER NOT NULL,
        avg_elapsed_us INTEGER NOT NULL,
        total_logical_reads INTEGER NOT NULL,
        avg_logical_reads REAL NOT NULL,
        total_logical_writes INTEGER NOT NULL,
        total_physical_reads INTEGER NOT NULL,
        plan_handle TEXT,
        counter_reset INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_samples_fp_time
        ON metric_samples(fingerprint_id, sampled_at)",
    "CREATE INDEX IF NOT EXISTS idx_samples_time ON metric_samples(sampled_at)",
    r#"
    CREATE TABLE IF NOT EXISTS baselines (
        fingerprint_id INTEGER NOT NULL,
        window_end_day TEXT NOT NULL,
        window_start DATETIME NOT NULL,
        window_end DATETIME NOT NULL,
        sample_count INTEGER NOT NULL,
        valid INTEGER NOT NULL,
        stats_json TEXT NOT NULL,
        PRIMARY KEY (fingerprint_id, window_end_day)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS regression_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint_id INTEGER NOT NULL,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        metric TEXT NOT NULL,
        status TEXT NOT NULL,
        severity TEXT NOT NULL,
        first_seen DATETIME NOT NULL,
        last_seen DATETIME NOT NULL,
        baseline_mean REAL NOT NULL,
        current_value REAL NOT NULL,
        magnitude REAL NOT NULL,
        clear_streak INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // At most one open event per (fingerprint, metric)
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_open_event
        ON regression_events(fingerprint_id, metric)
        WHERE status IN ('new', 'acknowledged')
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS remediation_audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_name TEXT NOT NULL,
        database_name TEXT NOT NULL,
        fingerprint_id INTEGER,
        remediation_type TEXT NOT NULL,
        sql_text TEXT NOT NULL,
        is_dry_run INTEGER NOT NULL,
        success INTEGER NOT NULL,
        error TEXT,
        duration_ms INTEGER NOT NULL,
        actor TEXT NOT NULL,
        host TEXT NOT NULL,
        service_version TEXT NOT NULL,
        executed_at DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audit_time ON remediation_audit(executed_at)",
];

pub async fn create_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Schema initialized ({} tables)", REQUIRED_TABLES.len());
    Ok(())
}

/// True when every required table exists. Used by the storage readiness probe.
pub async fn schema_complete(pool: &SqlitePool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(pool)
                .await?;
        if found.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
        assert!(schema_complete(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_incomplete_on_empty_db() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        assert!(!schema_complete(&pool).await.unwrap());
    }
}
