//! Runtime configuration for payload-tier.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All policy knobs (tier capacities, scoring constants, admission bonuses,
//! starvation thresholds, throttle limits) live here so that policy can change
//! without code changes.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::queue::request::{OperationType, QueueClass};
use crate::tenant::SubscriptionTier;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "payload-tier", about = "Tiered payload cache and priority admission queue")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Tier capacities and blob storage.
    pub tiers: TierConfig,

    /// Eviction scoring.
    pub eviction: EvictionConfig,

    /// Predictive preload.
    pub preload: PreloadConfig,

    /// Admission priority policy.
    pub admission: PriorityPolicy,

    /// Boosting and reaping.
    pub scheduler: SchedulerConfig,

    /// Load-based throttling.
    pub throttle: ThrottleConfig,

    /// Telemetry retention.
    pub telemetry: TelemetryConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Tier capacity and blob store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Target capacity of the Memory tier in bytes.
    pub memory_capacity_bytes: u64,

    /// Advisory capacity of the SSD tier in bytes. Reported in cache stats and
    /// health; demotion does not enforce it.
    pub ssd_capacity_bytes: u64,

    /// Root directory of the filesystem blob store. `None` keeps blobs in memory.
    pub blob_root: Option<PathBuf>,

    /// Apply zstd compression to blobs written by demotion.
    pub compress_blobs: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            memory_capacity_bytes: 30 * 1024 * 1024 * 1024, // 30 GB
            ssd_capacity_bytes: 500 * 1024 * 1024 * 1024,   // 500 GB
            blob_root: None,
            compress_blobs: true,
            zstd_level: 3,
        }
    }
}

/// Eviction scoring constants.
///
/// ```text
/// priority(p) = access_count * exp(-hours_since_last_access / decay_hours) * multiplier
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Recency decay constant in hours.
    pub decay_hours: f64,

    /// Multiplier applied when a Premium/Enterprise tenant touched the payload in the window.
    pub premium_multiplier: f64,

    /// Rolling window for access counts, in seconds.
    pub access_window_secs: u64,

    /// How often the eviction cycle runs, in seconds.
    pub interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            decay_hours: 12.0,
            premium_multiplier: 2.0,
            access_window_secs: 24 * 3600,
            interval_secs: 30,
        }
    }
}

impl EvictionConfig {
    pub fn access_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_window_secs as i64)
    }
}

/// Predictive preload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Number of payloads at each end of a model (first/last layers) placed in
    /// Memory for Premium/Enterprise interactions.
    pub premium_memory_layers: usize,

    /// Number of payloads promoted by the scheduled trigger.
    pub scheduled_top_n: usize,

    /// UTC hour at which the scheduled trigger fires.
    pub scheduled_hour_utc: u32,

    /// Trailing window for the scheduled trigger, in days.
    pub trailing_days: u32,

    /// Number of most-used models promoted by the tenant trigger.
    pub tenant_top_models: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            premium_memory_layers: 1,
            scheduled_top_n: 20,
            scheduled_hour_utc: 6,
            trailing_days: 7,
            tenant_top_models: 3,
        }
    }
}

/// Admission priority policy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityPolicy {
    /// Starting priority for every request.
    pub base_priority: u8,

    /// Hard upper bound on admission priority.
    pub max_priority: u8,

    /// Bonus per subscription tier.
    pub tier_bonus: TierBonus,

    /// `(exclusive upper bound, bonus)` pairs checked in order; first match wins.
    pub size_bonus: Vec<(u64, u8)>,

    /// Bonus for interactive requests.
    pub interactive_bonus: u8,

    /// Bonus per operation type.
    pub operation_bonus: OperationBonus,

    /// Priorities at or above this are Hot.
    pub hot_threshold: u8,

    /// Priorities at or above this (and below hot) are Warm.
    pub warm_threshold: u8,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            base_priority: 50,
            max_priority: 100,
            tier_bonus: TierBonus::default(),
            size_bonus: vec![(1_000, 20), (10_000, 10)],
            interactive_bonus: 10,
            operation_bonus: OperationBonus::default(),
            hot_threshold: 80,
            warm_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBonus {
    pub free: u8,
    pub standard: u8,
    pub premium: u8,
    pub enterprise: u8,
}

impl Default for TierBonus {
    fn default() -> Self {
        Self {
            free: 0,
            standard: 20,
            premium: 30,
            enterprise: 40,
        }
    }
}

impl TierBonus {
    pub fn for_tier(&self, tier: SubscriptionTier) -> u8 {
        match tier {
            SubscriptionTier::Free => self.free,
            SubscriptionTier::Standard => self.standard,
            SubscriptionTier::Premium => self.premium,
            SubscriptionTier::Enterprise => self.enterprise,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationBonus {
    pub search: u8,
    pub embedding: u8,
    pub inference: u8,
    pub ingestion: u8,
}

impl Default for OperationBonus {
    fn default() -> Self {
        Self {
            search: 10,
            embedding: 5,
            inference: 5,
            ingestion: 0,
        }
    }
}

impl OperationBonus {
    pub fn for_operation(&self, op: OperationType) -> u8 {
        match op {
            OperationType::Search => self.search,
            OperationType::Embedding => self.embedding,
            OperationType::Inference => self.inference,
            OperationType::Ingestion => self.ingestion,
        }
    }
}

/// Starvation boosting and stuck-item reaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the boost job runs, in seconds.
    pub boost_interval_secs: u64,

    /// Starvation threshold for Hot items, in seconds.
    pub hot_threshold_secs: u64,

    /// Starvation threshold for Warm items, in seconds.
    pub warm_threshold_secs: u64,

    /// Starvation threshold for Cold items, in seconds.
    pub cold_threshold_secs: u64,

    /// Priority added per elapsed threshold.
    pub boost_step: u8,

    /// Boosting never raises priority above this.
    pub boost_cap: u8,

    /// A Processing item without a heartbeat for this long is reaped.
    pub heartbeat_deadline_secs: u64,

    /// How often the reaper runs, in seconds.
    pub reap_interval_secs: u64,

    /// Reaped items beyond this many retries are failed.
    pub max_retries: u32,

    /// Pending items older than this are failed with a timeout.
    pub max_pending_lifetime_secs: u64,

    /// Completed/Failed items are dropped from the table after this long.
    pub finished_retention_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            boost_interval_secs: 10,
            hot_threshold_secs: 5,
            warm_threshold_secs: 30,
            cold_threshold_secs: 300,
            boost_step: 10,
            boost_cap: 95,
            heartbeat_deadline_secs: 120,
            reap_interval_secs: 15,
            max_retries: 3,
            max_pending_lifetime_secs: 6 * 3600,
            finished_retention_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    /// Starvation threshold for a queue class.
    pub fn starvation_threshold(&self, class: QueueClass) -> chrono::Duration {
        let secs = match class {
            QueueClass::Hot => self.hot_threshold_secs,
            QueueClass::Warm => self.warm_threshold_secs,
            QueueClass::Cold => self.cold_threshold_secs,
        };
        chrono::Duration::seconds(secs as i64)
    }
}

/// Load-based throttling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// How often the load monitor samples, in seconds.
    pub sample_interval_secs: u64,

    /// Cold items are throttled above this CPU percentage.
    pub cold_cpu_percent: f64,

    /// Cold items are throttled above this memory percentage.
    pub cold_memory_percent: f64,

    /// Cold items are throttled above this pending count.
    pub cold_queue_depth: usize,

    /// Warm items are also throttled above this CPU percentage.
    pub warm_cpu_percent: f64,

    /// Warm items are also throttled above this pending count.
    pub warm_queue_depth: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 5,
            cold_cpu_percent: 80.0,
            cold_memory_percent: 85.0,
            cold_queue_depth: 10_000,
            warm_cpu_percent: 90.0,
            warm_queue_depth: 50_000,
        }
    }
}

/// Telemetry retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Raw access events older than this are rolled up and discarded.
    pub raw_retention_secs: u64,

    /// Daily aggregates older than this many days are discarded.
    pub archive_retention_days: u32,

    /// How often the rollup job runs, in seconds.
    pub rollup_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            raw_retention_secs: 24 * 3600,
            archive_retention_days: 30,
            rollup_interval_secs: 600,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject policy combinations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        let a = &self.admission;
        if a.warm_threshold > a.hot_threshold {
            return Err(Error::InvalidConfig(format!(
                "warm_threshold ({}) exceeds hot_threshold ({})",
                a.warm_threshold, a.hot_threshold
            )));
        }
        if a.max_priority > 100 || a.base_priority > a.max_priority {
            return Err(Error::InvalidConfig(
                "priorities must satisfy base <= max <= 100".to_string(),
            ));
        }
        let s = &self.scheduler;
        if s.hot_threshold_secs == 0 || s.warm_threshold_secs == 0 || s.cold_threshold_secs == 0 {
            return Err(Error::InvalidConfig(
                "starvation thresholds must be non-zero".to_string(),
            ));
        }
        if s.boost_cap > a.max_priority {
            return Err(Error::InvalidConfig(format!(
                "boost_cap ({}) exceeds max_priority ({})",
                s.boost_cap, a.max_priority
            )));
        }
        if self.eviction.decay_hours <= 0.0 {
            return Err(Error::InvalidConfig("decay_hours must be positive".to_string()));
        }
        if self.preload.scheduled_hour_utc > 23 {
            return Err(Error::InvalidConfig(
                "scheduled_hour_utc must be in 0..=23".to_string(),
            ));
        }
        Ok(())
    }
}

/// Convert a seconds knob into a ticker period, never zero.
pub fn ticker_period(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.eviction.decay_hours, 12.0);
        assert_eq!(cfg.admission.base_priority, 50);
        assert_eq!(cfg.scheduler.boost_cap, 95);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{ "tiers": { "memory_capacity_bytes": 1024 } }"#).unwrap();
        assert_eq!(cfg.tiers.memory_capacity_bytes, 1024);
        assert_eq!(cfg.tiers.zstd_level, 3);
        assert_eq!(cfg.scheduler.cold_threshold_secs, 300);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = Config::default();
        cfg.admission.warm_threshold = 90;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_starvation_thresholds() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.starvation_threshold(QueueClass::Hot).num_seconds(), 5);
        assert_eq!(cfg.starvation_threshold(QueueClass::Warm).num_seconds(), 30);
        assert_eq!(cfg.starvation_threshold(QueueClass::Cold).num_seconds(), 300);
    }
}
