use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::models::{RankMetric, RiskLevel, SecurityMode};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub collection: CollectionConfig,
    pub analysis: AnalysisConfig,
    pub baseline: BaselineConfig,
    pub hotspots: HotspotConfig,
    pub security: SecurityConfig,
    pub instances: Vec<InstanceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the health surface
    pub listen: String,
    /// Drain window granted to in-flight runs on shutdown (default: 30s)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub shutdown_drain_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Plan-collection settings. Per-instance and per-database overrides win over
/// these global values (database → instance → global).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Collection interval (default: 5m)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub interval_secs: u64,
    /// Top-N queries fetched per (instance, database) (default: 50)
    pub top_n: u32,
    /// Statistics lookback window (default: 15m)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub lookback_secs: u64,
    /// Minimum execution count for regression eligibility (default: 5)
    pub min_exec_count: i64,
    /// Minimum average elapsed time for regression eligibility (default: 10ms)
    pub min_elapsed_ms: u64,
    /// Per-database provider timeout (default: 60s)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub timeout_secs: u64,
    /// Concurrent instances per run (default: 4, cap 16)
    pub max_instance_parallelism: usize,
    /// Concurrent databases per instance (default: 2, cap 8)
    pub max_db_parallelism: usize,
    /// Keep collecting from other instances after one fails (default: true)
    pub continue_on_instance_error: bool,
    /// Keep collecting from other databases after one fails (default: true)
    pub continue_on_database_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analysis interval (default: 5m)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub interval_secs: u64,
    /// Recent-sample window compared against baselines (default: 30m)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub recent_window_secs: u64,
    /// Minimum current/baseline ratio to declare a regression (default: 2.0)
    pub r_min: f64,
    /// Minimum z-score to declare a regression (default: 3.0)
    pub z_min: f64,
    /// Auto-resolve hysteresis factor applied to r_min (default: 0.8)
    pub hysteresis: f64,
    /// Minimum samples for a baseline to be valid (default: 30)
    pub n_min_baseline: i64,
    /// Minimum window coverage for a baseline to be valid (default: 24h)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub w_min_baseline_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Rebuild time of day, UTC, "HH:MM" (default: "02:00")
    pub rebuild_time: String,
    /// Trailing window baselines are computed over (default: 14d)
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    /// Number of hotspots to keep (default: 20)
    pub top_n: usize,
    /// Ranking metric (default: total_cpu_time)
    pub rank_by: RankMetric,
    /// Include queries that also have an open regression (default: true)
    pub include_regressions: bool,
    /// Threshold filters applied before ranking
    pub min_total_cpu_ms: u64,
    pub min_total_elapsed_ms: u64,
    pub min_executions: i64,
    pub min_avg_elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub mode: SecurityMode,
    /// Global kill switch for the whole remediation path (default: false)
    pub enable_remediation: bool,
    /// Permitted remediations are audited but not executed (default: true)
    pub dry_run: bool,
    /// Risk at or above this level always requires human approval
    pub approval_threshold: RiskLevel,
    /// Databases remediation must never touch (case-insensitive)
    pub excluded_databases: Vec<String>,
    pub max_remediations_per_hour: u32,
    pub require_maintenance_window: bool,
    /// Maintenance window [start, end) in UTC hours; wraps when end <= start
    pub maintenance_window_start_hour: u8,
    pub maintenance_window_end_hour: u8,
    /// Actor identity recorded in audit entries (default: "vigil")
    pub actor: String,
}

/// One monitored database instance.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    /// MySQL-protocol URL; treated as a secret reference, never logged
    pub connection_string: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Optional per-instance overrides of the collection settings
    #[serde(default)]
    pub top_n: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_opt_duration_secs")]
    pub lookback_secs: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_duration_secs")]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub min_exec_count: Option<i64>,
    #[serde(default)]
    pub min_elapsed_ms: Option<u64>,
    /// Explicit database list; empty means auto-discovery via the provider
    #[serde(default)]
    pub databases: Vec<DatabaseEntry>,
}

/// A database under an instance: either a bare name or a name with overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DatabaseEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        top_n: Option<u32>,
        #[serde(default, deserialize_with = "deserialize_opt_duration_secs")]
        lookback_secs: Option<u64>,
        #[serde(default, deserialize_with = "deserialize_opt_duration_secs")]
        timeout_secs: Option<u64>,
        #[serde(default)]
        min_exec_count: Option<i64>,
        #[serde(default)]
        min_elapsed_ms: Option<u64>,
    },
}

impl DatabaseEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Detailed { name, .. } => name,
        }
    }
}

/// Effective collection parameters for one (instance, database) after the
/// database → instance → global cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveCollection {
    pub top_n: u32,
    pub lookback: Duration,
    pub timeout: Duration,
    pub min_exec_count: i64,
    pub min_elapsed_ms: u64,
}

impl EffectiveCollection {
    pub fn resolve(
        global: &CollectionConfig,
        instance: &InstanceConfig,
        database: Option<&DatabaseEntry>,
    ) -> Self {
        let (db_top_n, db_lookback, db_timeout, db_min_exec, db_min_elapsed) = match database {
            Some(DatabaseEntry::Detailed {
                top_n,
                lookback_secs,
                timeout_secs,
                min_exec_count,
                min_elapsed_ms,
                ..
            }) => (*top_n, *lookback_secs, *timeout_secs, *min_exec_count, *min_elapsed_ms),
            _ => (None, None, None, None, None),
        };

        Self {
            top_n: db_top_n.or(instance.top_n).unwrap_or(global.top_n),
            lookback: Duration::from_secs(
                db_lookback
                    .or(instance.lookback_secs)
                    .unwrap_or(global.lookback_secs),
            ),
            timeout: Duration::from_secs(
                db_timeout
                    .or(instance.timeout_secs)
                    .unwrap_or(global.timeout_secs),
            ),
            min_exec_count: db_min_exec
                .or(instance.min_exec_count)
                .unwrap_or(global.min_exec_count),
            min_elapsed_ms: db_min_elapsed
                .or(instance.min_elapsed_ms)
                .unwrap_or(global.min_elapsed_ms),
        }
    }
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "vigil")]
#[command(version, about = "Vigil - Query Performance Monitoring Daemon")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Health surface listen address (overrides config file)
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Local state database URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub storage_url: Option<String>,

    /// Logging level (overrides config file, e.g., "info,vigil=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Collection interval (overrides config file, e.g., "30s", "5m")
    #[arg(long, value_name = "DURATION")]
    pub collection_interval: Option<String>,

    /// Analysis interval (overrides config file, e.g., "5m")
    #[arg(long, value_name = "DURATION")]
    pub analysis_interval: Option<String>,

    /// Security mode (overrides config file: read_only, suggest_remediation,
    /// auto_apply_low_risk)
    #[arg(long, value_name = "MODE")]
    pub security_mode: Option<String>,
}

impl MonitorConfig {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with VIGIL_)
    /// 3. Configuration file (vigil.toml)
    /// 4. Default values
    ///
    /// Returns the validated config plus the file path it was read from, so
    /// the reload path can re-read the same file later.
    pub fn load() -> Result<(Self, Option<String>), anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = match cli_args.config.clone() {
            Some(explicit) => Some(explicit),
            None => Self::find_config_file(),
        };
        let mut config = match config_path.as_deref() {
            Some(path) => Self::from_toml(path)?,
            None => {
                tracing::warn!("No configuration file found; starting from built-in defaults");
                MonitorConfig::default()
            },
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok((config, config_path))
    }

    /// Supported environment variables:
    /// - VIGIL_LISTEN: Health surface listen address
    /// - VIGIL_STORAGE_URL: Local state database URL
    /// - VIGIL_LOG_LEVEL: Logging level
    /// - VIGIL_COLLECTION_INTERVAL: Collection interval (accepts "30s", "5m")
    /// - VIGIL_ANALYSIS_INTERVAL: Analysis interval
    /// - VIGIL_SECURITY_MODE: Security mode
    fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("VIGIL_LISTEN") {
            self.server.listen = listen;
            tracing::info!("server.listen overridden from env: {}", self.server.listen);
        }

        if let Ok(url) = std::env::var("VIGIL_STORAGE_URL") {
            self.storage.url = url;
            tracing::info!("storage.url overridden from env");
        }

        if let Ok(level) = std::env::var("VIGIL_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("logging.level overridden from env: {}", self.logging.level);
        }

        if let Ok(interval) = std::env::var("VIGIL_COLLECTION_INTERVAL") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.collection.interval_secs = val;
                    tracing::info!(
                        "collection.interval overridden from env: {}s",
                        self.collection.interval_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid VIGIL_COLLECTION_INTERVAL '{}': {} (keep {})",
                    interval,
                    e,
                    self.collection.interval_secs
                ),
            }
        }

        if let Ok(interval) = std::env::var("VIGIL_ANALYSIS_INTERVAL") {
            match parse_duration_to_secs(&interval) {
                Ok(val) => {
                    self.analysis.interval_secs = val;
                    tracing::info!(
                        "analysis.interval overridden from env: {}s",
                        self.analysis.interval_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid VIGIL_ANALYSIS_INTERVAL '{}': {} (keep {})",
                    interval,
                    e,
                    self.analysis.interval_secs
                ),
            }
        }

        if let Ok(mode) = std::env::var("VIGIL_SECURITY_MODE") {
            match mode.parse::<SecurityMode>() {
                Ok(val) => {
                    self.security.mode = val;
                    tracing::info!("security.mode overridden from env: {}", self.security.mode);
                },
                Err(e) => tracing::warn!("Invalid VIGIL_SECURITY_MODE '{}': {}", mode, e),
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(listen) = &args.listen {
            self.server.listen = listen.clone();
            tracing::info!("server.listen overridden from CLI: {}", self.server.listen);
        }

        if let Some(url) = &args.storage_url {
            self.storage.url = url.clone();
            tracing::info!("storage.url overridden from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("logging.level overridden from CLI: {}", self.logging.level);
        }

        if let Some(interval) = &args.collection_interval {
            match parse_duration_to_secs(interval) {
                Ok(val) => {
                    self.collection.interval_secs = val;
                    tracing::info!(
                        "collection.interval overridden from CLI: {}s",
                        self.collection.interval_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid --collection-interval '{}': {} (keep {})",
                    interval,
                    e,
                    self.collection.interval_secs
                ),
            }
        }

        if let Some(interval) = &args.analysis_interval {
            match parse_duration_to_secs(interval) {
                Ok(val) => {
                    self.analysis.interval_secs = val;
                    tracing::info!(
                        "analysis.interval overridden from CLI: {}s",
                        self.analysis.interval_secs
                    );
                },
                Err(e) => tracing::warn!(
                    "Invalid --analysis-interval '{}': {} (keep {})",
                    interval,
                    e,
                    self.analysis.interval_secs
                ),
            }
        }

        if let Some(mode) = &args.security_mode {
            match mode.parse::<SecurityMode>() {
                Ok(val) => {
                    self.security.mode = val;
                    tracing::info!("security.mode overridden from CLI: {}", self.security.mode);
                },
                Err(e) => tracing::warn!("Invalid --security-mode '{}': {}", mode, e),
            }
        }
    }

    /// Validate configuration bounds. Invalid configuration fails startup;
    /// at reload the previous snapshot is retained.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.listen.is_empty() {
            anyhow::bail!("server.listen cannot be empty");
        }
        if self.storage.url.is_empty() {
            anyhow::bail!("storage.url cannot be empty");
        }

        let c = &self.collection;
        if !(10..=86_400).contains(&c.interval_secs) {
            anyhow::bail!("collection.interval must be within [10s, 24h]");
        }
        if !(1..=1000).contains(&c.top_n) {
            anyhow::bail!("collection.top_n must be within [1, 1000]");
        }
        if !(1..=600).contains(&c.timeout_secs) {
            anyhow::bail!("collection.timeout must be within [1s, 10m]");
        }
        if !(1..=16).contains(&c.max_instance_parallelism) {
            anyhow::bail!("collection.max_instance_parallelism must be within [1, 16]");
        }
        if !(1..=8).contains(&c.max_db_parallelism) {
            anyhow::bail!("collection.max_db_parallelism must be within [1, 8]");
        }
        if c.lookback_secs == 0 {
            anyhow::bail!("collection.lookback must be > 0");
        }
        if c.min_exec_count < 0 {
            anyhow::bail!("collection.min_exec_count must be >= 0");
        }

        let a = &self.analysis;
        if !(10..=86_400).contains(&a.interval_secs) {
            anyhow::bail!("analysis.interval must be within [10s, 24h]");
        }
        if a.recent_window_secs == 0 {
            anyhow::bail!("analysis.recent_window must be > 0");
        }
        if a.r_min < 1.0 {
            anyhow::bail!("analysis.r_min must be >= 1.0");
        }
        if a.z_min < 0.0 {
            anyhow::bail!("analysis.z_min must be >= 0");
        }
        if !(a.hysteresis > 0.0 && a.hysteresis <= 1.0) {
            anyhow::bail!("analysis.hysteresis must be within (0, 1]");
        }
        if a.n_min_baseline < 1 {
            anyhow::bail!("analysis.n_min_baseline must be >= 1");
        }

        self.baseline.rebuild_time_of_day().map_err(|e| {
            anyhow::anyhow!("baseline.rebuild_time '{}': {}", self.baseline.rebuild_time, e)
        })?;
        if !(86_400..=90 * 86_400).contains(&self.baseline.window_secs) {
            anyhow::bail!("baseline.window must be within [1d, 90d]");
        }

        if self.hotspots.top_n == 0 {
            anyhow::bail!("hotspots.top_n must be >= 1");
        }

        let s = &self.security;
        if s.maintenance_window_start_hour > 23 || s.maintenance_window_end_hour > 23 {
            anyhow::bail!("security maintenance window hours must be within [0, 23]");
        }
        if s.max_remediations_per_hour == 0 {
            anyhow::bail!("security.max_remediations_per_hour must be >= 1");
        }

        let mut seen = std::collections::HashSet::new();
        for instance in &self.instances {
            if instance.name.trim().is_empty() {
                anyhow::bail!("instance name cannot be empty");
            }
            if !seen.insert(instance.name.clone()) {
                anyhow::bail!("duplicate instance name: {}", instance.name);
            }
            if instance.connection_string.is_empty() {
                anyhow::bail!("instance '{}': connection_string cannot be empty", instance.name);
            }
            if let Some(top_n) = instance.top_n
                && !(1..=1000).contains(&top_n)
            {
                anyhow::bail!("instance '{}': top_n must be within [1, 1000]", instance.name);
            }
        }

        Ok(())
    }

    /// Enabled instances only; collection runs operate on this snapshot.
    pub fn enabled_instances(&self) -> Vec<InstanceConfig> {
        self.instances.iter().filter(|i| i.enabled).cloned().collect()
    }

    /// Default locations checked when --config is not given: a file named
    /// after the binary in the working directory, then under conf/.
    fn find_config_file() -> Option<String> {
        let file = concat!(env!("CARGO_PKG_NAME"), ".toml");
        [file.to_string(), format!("conf/{}", file)]
            .into_iter()
            .find(|candidate| Path::new(candidate).is_file())
    }

    pub fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path))
    }
}

impl BaselineConfig {
    /// Parse "HH:MM" into (hour, minute), both UTC.
    pub fn rebuild_time_of_day(&self) -> Result<(u32, u32), String> {
        let (h, m) = self
            .rebuild_time
            .trim()
            .trim_end_matches('Z')
            .split_once(':')
            .ok_or_else(|| "expected HH:MM".to_string())?;
        let hour: u32 = h.parse().map_err(|_| "invalid hour".to_string())?;
        let minute: u32 = m.parse().map_err(|_| "invalid minute".to_string())?;
        if hour > 23 || minute > 59 {
            return Err("hour must be 0-23, minute 0-59".to_string());
        }
        Ok((hour, minute))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: "0.0.0.0:8080".to_string(), shutdown_drain_secs: 30 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { url: "sqlite://data/vigil.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,vigil=debug".to_string(), file: Some("logs/vigil.log".to_string()) }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            top_n: 50,
            lookback_secs: 900,
            min_exec_count: 5,
            min_elapsed_ms: 10,
            timeout_secs: 60,
            max_instance_parallelism: 4,
            max_db_parallelism: 2,
            continue_on_instance_error: true,
            continue_on_database_error: true,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            recent_window_secs: 1800,
            r_min: 2.0,
            z_min: 3.0,
            hysteresis: 0.8,
            n_min_baseline: 30,
            w_min_baseline_secs: 86_400,
        }
    }
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self { rebuild_time: "02:00".to_string(), window_secs: 14 * 86_400 }
    }
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            top_n: 20,
            rank_by: RankMetric::TotalCpuTime,
            include_regressions: true,
            min_total_cpu_ms: 0,
            min_total_elapsed_ms: 0,
            min_executions: 1,
            min_avg_elapsed_ms: 0,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: SecurityMode::ReadOnly,
            enable_remediation: false,
            dry_run: true,
            approval_threshold: RiskLevel::Medium,
            excluded_databases: Vec::new(),
            max_remediations_per_hour: 5,
            require_maintenance_window: true,
            maintenance_window_start_hour: 22,
            maintenance_window_end_hour: 4,
            actor: "vigil".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Configuration snapshot handle
// =============================================================================

/// Shared handle to the current configuration snapshot.
///
/// The snapshot is immutable for the duration of a single run: jobs call
/// `current()` once at run start and keep the Arc. A reload publishes a new
/// snapshot through the watch channel; in-flight runs are unaffected and
/// subsequent runs observe the new value. An invalid reload is rejected and
/// the previous snapshot is retained.
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<MonitorConfig>>>,
}

impl ConfigHandle {
    pub fn new(initial: MonitorConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// The current snapshot. Cheap; callers keep the Arc for the whole run.
    pub fn current(&self) -> Arc<MonitorConfig> {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot changes (components that cache derived state,
    /// e.g. the provider pool manager, watch this).
    pub fn subscribe(&self) -> watch::Receiver<Arc<MonitorConfig>> {
        self.tx.subscribe()
    }

    /// Re-read the config file and atomically publish a new snapshot.
    /// On any error the previous snapshot stays in effect.
    pub fn reload_from(&self, path: &str) -> Result<(), anyhow::Error> {
        let mut config = MonitorConfig::from_toml(path)?;
        config.apply_env_overrides();
        config.validate()?;
        self.tx.send_replace(Arc::new(config));
        tracing::info!("Configuration reloaded from {}", path);
        Ok(())
    }
}

// =========================
// Helpers for parsing values
// =========================

/// Suffix table for human-readable durations. Longest spellings first so a
/// suffix never swallows part of a longer one ("mins" before "s").
const DURATION_UNITS: &[(&str, u64)] = &[
    ("seconds", 1),
    ("minutes", 60),
    ("second", 1),
    ("minute", 60),
    ("hours", 3600),
    ("mins", 60),
    ("secs", 1),
    ("hour", 3600),
    ("days", 86_400),
    ("sec", 1),
    ("min", 60),
    ("hrs", 3600),
    ("day", 86_400),
    ("hr", 3600),
    ("s", 1),
    ("m", 60),
    ("h", 3600),
    ("d", 86_400),
];

/// Turn "45", "30s", "15m", "6h" or "2d" into seconds.
fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    let text = input.trim().to_ascii_lowercase();
    if text.is_empty() {
        return Err("duration is empty".to_string());
    }

    for (suffix, multiplier) in DURATION_UNITS {
        let Some(count) = text.strip_suffix(suffix) else { continue };
        if let Ok(count) = count.trim_end().parse::<u64>() {
            return count
                .checked_mul(*multiplier)
                .ok_or_else(|| format!("duration '{}' overflows", input));
        }
    }

    // No recognized suffix: a bare count of seconds is also accepted
    text.parse::<u64>()
        .map_err(|_| format!("cannot parse '{}' as a duration", input))
}

// Config durations may be written as plain seconds or as suffixed strings
fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(secs),
        RawDuration::Text(text) => parse_duration_to_secs(&text).map_err(serde::de::Error::custom),
    }
}

fn deserialize_opt_duration_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_duration_secs")] u64);

    let opt = Option::<Wrapper>::deserialize(deserializer)?;
    Ok(opt.map(|w| w.0))
}
