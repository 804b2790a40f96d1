// Common test utilities and helpers

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::{InstanceConfig, MonitorConfig};
use crate::models::{QueryStat, TimeWindow};
use crate::services::stats_provider::StatsProvider;
use crate::utils::{MonitorError, MonitorResult};

/// Create an in-memory SQLite database for testing
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    crate::db::init_schema(&pool)
        .await
        .expect("Failed to initialize schema");

    pool
}

pub fn test_instance(name: &str) -> InstanceConfig {
    InstanceConfig {
        name: name.to_string(),
        connection_string: format!("mysql://vigil:secret@{}.test:3306", name),
        enabled: true,
        top_n: None,
        lookback_secs: None,
        timeout_secs: None,
        min_exec_count: None,
        min_elapsed_ms: None,
        databases: Vec::new(),
    }
}

pub fn test_config(instances: Vec<InstanceConfig>) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.instances = instances;
    config
}

/// A provider row with the given digest-style hash byte and per-execution
/// averages in milliseconds.
pub fn test_stat(sql_text: &str, hash: &[u8], execs: i64, avg_cpu_ms: f64, avg_elapsed_ms: f64) -> QueryStat {
    QueryStat {
        query_hash: Some(hash.to_vec()),
        sql_text: sql_text.to_string(),
        execution_count: execs,
        total_cpu_ms: avg_cpu_ms * execs as f64,
        avg_cpu_ms,
        total_elapsed_ms: avg_elapsed_ms * execs as f64,
        avg_elapsed_ms,
        total_logical_reads: 100 * execs,
        avg_logical_reads: 100.0,
        total_logical_writes: 0,
        total_physical_reads: 0,
        plan_handle: None,
    }
}

/// Scripted statistics provider: per-(instance, database) rows, per-target
/// failures, and a call log for execute_statement.
#[derive(Default)]
pub struct MockStatsProvider {
    stats: Mutex<HashMap<(String, String), Vec<QueryStat>>>,
    databases: Mutex<HashMap<String, Vec<String>>>,
    timeout_targets: Mutex<HashSet<(String, String)>>,
    unreachable_instances: Mutex<HashSet<String>>,
    execute_failures: Mutex<HashSet<String>>,
    pub executed: Mutex<Vec<(String, String, String)>>,
}

impl MockStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stats(&self, instance: &str, database: &str, rows: Vec<QueryStat>) {
        self.stats
            .lock()
            .unwrap()
            .insert((instance.to_string(), database.to_string()), rows);
    }

    pub fn set_databases(&self, instance: &str, databases: &[&str]) {
        self.databases
            .lock()
            .unwrap()
            .insert(instance.to_string(), databases.iter().map(|s| s.to_string()).collect());
    }

    /// Make one (instance, database) pair fail with ProviderTimeout.
    pub fn fail_with_timeout(&self, instance: &str, database: &str) {
        self.timeout_targets
            .lock()
            .unwrap()
            .insert((instance.to_string(), database.to_string()));
    }

    /// Make a whole instance unreachable (discovery and probes fail).
    pub fn make_unreachable(&self, instance: &str) {
        self.unreachable_instances.lock().unwrap().insert(instance.to_string());
    }

    pub fn fail_execute_on(&self, instance: &str) {
        self.execute_failures.lock().unwrap().insert(instance.to_string());
    }
}

#[async_trait]
impl StatsProvider for MockStatsProvider {
    async fn top_queries_by_elapsed(
        &self,
        instance: &InstanceConfig,
        database: &str,
        top_n: u32,
        _window: TimeWindow,
    ) -> MonitorResult<Vec<QueryStat>> {
        if self
            .timeout_targets
            .lock()
            .unwrap()
            .contains(&(instance.name.clone(), database.to_string()))
        {
            return Err(MonitorError::provider_timeout(format!(
                "instance '{}', database '{}': scripted timeout",
                instance.name, database
            )));
        }
        if self.unreachable_instances.lock().unwrap().contains(&instance.name) {
            return Err(MonitorError::provider_unavailable(format!(
                "instance '{}': scripted outage",
                instance.name
            )));
        }

        let rows = self
            .stats
            .lock()
            .unwrap()
            .get(&(instance.name.clone(), database.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(rows.into_iter().take(top_n as usize).collect())
    }

    async fn list_databases(&self, instance: &InstanceConfig) -> MonitorResult<Vec<String>> {
        if self.unreachable_instances.lock().unwrap().contains(&instance.name) {
            return Err(MonitorError::provider_unavailable(format!(
                "instance '{}': scripted outage",
                instance.name
            )));
        }
        Ok(self
            .databases
            .lock()
            .unwrap()
            .get(&instance.name)
            .cloned()
            .unwrap_or_default())
    }

    async fn test_connection(&self, instance: &InstanceConfig) -> bool {
        !self.unreachable_instances.lock().unwrap().contains(&instance.name)
    }

    async fn execute_statement(
        &self,
        instance: &InstanceConfig,
        database: &str,
        sql: &str,
    ) -> MonitorResult<()> {
        if self.execute_failures.lock().unwrap().contains(&instance.name) {
            return Err(MonitorError::provider_unavailable(format!(
                "instance '{}': scripted execute failure",
                instance.name
            )));
        }
        self.executed.lock().unwrap().push((
            instance.name.to_string(),
            database.to_string(),
            sql.to_string(),
        ));
        Ok(())
    }
}
