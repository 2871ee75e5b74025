//! Configuration management for the rollup engine
//!
//! TOML configuration with per-field defaults and `ROLLUP_*` environment
//! variable overrides.
//!
//! ```toml
//! [builder]
//! shapes = ["store", "store_item"]
//!
//! [pipeline]
//! max_concurrent_units = 8
//! unit_max_retries = 3
//! unit_retry_backoff_ms = 5000
//! unit_timeout_secs = 1800
//!
//! [planner]
//! coarse_coverage_threshold = 0.5
//! clamp_to_today = true
//!
//! [progress]
//! ttl_secs = 86400
//! key_prefix = "rollup:rebuild"
//! redis_url = "redis://localhost:6379"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::RetryPolicy;
use crate::types::DimensionShape;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Rollup builder settings
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Rebuild pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Query planner settings
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Progress store settings
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Rollup builder configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuilderConfig {
    /// Table families to build
    #[serde(default = "default_shapes")]
    pub shapes: Vec<DimensionShape>,
}

/// Pipeline orchestrator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Units of one stage running at the same time
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Retries per unit after the first attempt
    #[serde(default = "default_unit_max_retries")]
    pub unit_max_retries: u32,

    /// Fixed delay between unit attempts
    #[serde(default = "default_unit_retry_backoff_ms")]
    pub unit_retry_backoff_ms: u64,

    /// Limit on a single unit attempt
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
}

/// Query planner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlannerConfig {
    /// Ranges up to this many days scan the hourly table
    #[serde(default = "default_hourly_fast_path_days")]
    pub hourly_fast_path_days: u32,

    /// Ranges up to this many days scan the daily table
    #[serde(default = "default_daily_fast_path_days")]
    pub daily_fast_path_days: u32,

    /// Share of a coarse period that must be inside the range before it is
    /// added and the excess subtracted
    #[serde(default = "default_coverage_threshold")]
    pub coarse_coverage_threshold: f64,

    /// Consider whole-week exclusions
    #[serde(default = "default_true")]
    pub allow_weekly_exclusion: bool,

    /// Consider whole-month exclusions
    #[serde(default = "default_true")]
    pub allow_monthly_exclusion: bool,

    /// Clamp range ends to the current UTC date
    #[serde(default = "default_true")]
    pub clamp_to_today: bool,

    /// Refuse plans with more operations than this
    #[serde(default = "default_max_plan_operations")]
    pub max_plan_operations: usize,
}

/// Progress store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProgressConfig {
    /// Status document lifetime
    #[serde(default = "default_progress_ttl_secs")]
    pub ttl_secs: u64,

    /// Key prefix; documents live at `<prefix>:<run_id>`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Redis URL; the in-memory store is used when unset
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub structured_logging: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_shapes() -> Vec<DimensionShape> { vec![DimensionShape::Store, DimensionShape::StoreItem] }
fn default_max_concurrent_units() -> usize { num_cpus::get() * 2 }
fn default_unit_max_retries() -> u32 { 3 }
fn default_unit_retry_backoff_ms() -> u64 { 5_000 }
fn default_unit_timeout_secs() -> u64 { 1_800 }
fn default_hourly_fast_path_days() -> u32 { 3 }
fn default_daily_fast_path_days() -> u32 { 14 }
fn default_coverage_threshold() -> f64 { 0.5 }
fn default_max_plan_operations() -> usize { 1_000 }
fn default_progress_ttl_secs() -> u64 { 86_400 }
fn default_key_prefix() -> String { "rollup:rebuild".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            shapes: default_shapes(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_max_concurrent_units(),
            unit_max_retries: default_unit_max_retries(),
            unit_retry_backoff_ms: default_unit_retry_backoff_ms(),
            unit_timeout_secs: default_unit_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    /// Retry policy applied to every unit
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.unit_max_retries,
            backoff: Duration::from_millis(self.unit_retry_backoff_ms),
            timeout: Duration::from_secs(self.unit_timeout_secs),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            hourly_fast_path_days: default_hourly_fast_path_days(),
            daily_fast_path_days: default_daily_fast_path_days(),
            coarse_coverage_threshold: default_coverage_threshold(),
            allow_weekly_exclusion: true,
            allow_monthly_exclusion: true,
            clamp_to_today: true,
            max_plan_operations: default_max_plan_operations(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_progress_ttl_secs(),
            key_prefix: default_key_prefix(),
            redis_url: None,
        }
    }
}

impl ProgressConfig {
    /// Status document lifetime
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Key of a run's status document
    pub fn key_for(&self, run_id: impl std::fmt::Display) -> String {
        format!("{}:{}", self.key_prefix, run_id)
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            structured_logging: false,
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Builder
        if let Ok(shapes) = std::env::var("ROLLUP_SHAPES") {
            let parsed: Result<Vec<DimensionShape>, _> =
                shapes.split(',').map(|s| s.parse()).collect();
            if let Ok(shapes) = parsed {
                self.builder.shapes = shapes;
            }
        }

        // Pipeline
        override_parsed("ROLLUP_MAX_CONCURRENT_UNITS", &mut self.pipeline.max_concurrent_units);
        override_parsed("ROLLUP_UNIT_MAX_RETRIES", &mut self.pipeline.unit_max_retries);
        override_parsed("ROLLUP_UNIT_RETRY_BACKOFF_MS", &mut self.pipeline.unit_retry_backoff_ms);
        override_parsed("ROLLUP_UNIT_TIMEOUT_SECS", &mut self.pipeline.unit_timeout_secs);

        // Planner
        override_parsed("ROLLUP_COARSE_COVERAGE_THRESHOLD", &mut self.planner.coarse_coverage_threshold);
        override_parsed("ROLLUP_CLAMP_TO_TODAY", &mut self.planner.clamp_to_today);

        // Progress
        override_parsed("ROLLUP_PROGRESS_TTL_SECS", &mut self.progress.ttl_secs);
        if let Ok(url) = std::env::var("ROLLUP_REDIS_URL") {
            self.progress.redis_url = Some(url);
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.builder.shapes.is_empty() {
            return Err("At least one dimension shape must be built".to_string());
        }

        if self.pipeline.max_concurrent_units == 0 {
            return Err("Max concurrent units must be > 0".to_string());
        }
        if self.pipeline.unit_timeout_secs == 0 {
            return Err("Unit timeout must be > 0".to_string());
        }

        let planner = &self.planner;
        if planner.hourly_fast_path_days > planner.daily_fast_path_days {
            return Err("Hourly fast path cannot exceed the daily fast path".to_string());
        }
        if !(planner.coarse_coverage_threshold > 0.0 && planner.coarse_coverage_threshold <= 1.0) {
            return Err("Coarse coverage threshold must be in (0, 1]".to_string());
        }
        if planner.max_plan_operations == 0 {
            return Err("Max plan operations must be > 0".to_string());
        }

        if self.progress.ttl_secs == 0 {
            return Err("Progress TTL must be > 0".to_string());
        }
        if self.progress.key_prefix.is_empty() {
            return Err("Progress key prefix cannot be empty".to_string());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        if let Ok(value) = raw.trim().parse() {
            *target = value;
        }
    }
}

mod num_cpus {
    pub fn get() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}
