//! Pool configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: `Default` implementations below
//! 2. **Config file**: TOML file named by `CHANPOOL_CONFIG`, else `config/chanpool.toml`
//! 3. **Environment variables**: `CHANPOOL__SECTION__FIELD` overrides single fields
//!
//! # Bounds
//!
//! Out-of-range pool bounds are never fatal. [`AppConfig::normalize`] clamps
//! them to usable values and reports every adjustment.
//!
//! # Example
//!
//! ```toml
//! [pool]
//! max_size = 4
//! min_size = 1
//! concurrent_streams_low_watermark = 50
//!
//! [resiliency]
//! not_ready_fallback_enabled = true
//!
//! [[methods]]
//! names = ["/google.spanner.v1.Spanner/CreateSession"]
//! affinity = { command = "BIND", affinity_key = "name" }
//! ```

use std::{collections::HashMap, path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::pool::{keys::MethodAffinity, unresponsive::UnresponsiveConfig};

/// Hard cap on concurrent streams per channel, also the default low watermark.
pub const MAX_STREAMS_PER_CHANNEL: usize = 100;

/// Pool size used when none (or zero) is configured.
pub const DEFAULT_MAX_CHANNELS: usize = 10;

/// Pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on channels. Defaults to `10`.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Channels created eagerly and kept connected. Defaults to `0`.
    #[serde(default)]
    pub min_size: usize,

    /// Busiest acceptable channel load before the pool grows instead of
    /// reusing a channel. Accepted range is `0..=100`. Defaults to `100`.
    #[serde(default = "default_low_watermark")]
    pub concurrent_streams_low_watermark: usize,

    /// Route bind calls round-robin, growing to `max_size` first.
    #[serde(default)]
    pub use_round_robin_on_bind: bool,
}

fn default_max_size() -> usize {
    DEFAULT_MAX_CHANNELS
}

fn default_low_watermark() -> usize {
    MAX_STREAMS_PER_CHANNEL
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_CHANNELS,
            min_size: 0,
            concurrent_streams_low_watermark: MAX_STREAMS_PER_CHANNEL,
            use_round_robin_on_bind: false,
        }
    }
}

/// Fallback and unresponsiveness detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencyConfig {
    /// Route around channels that are not ready.
    #[serde(default)]
    pub not_ready_fallback_enabled: bool,

    /// Force channels to idle when they stop answering.
    #[serde(default)]
    pub unresponsive_detection_enabled: bool,

    /// Minimum time without a response before a channel counts as unresponsive.
    #[serde(default)]
    pub unresponsive_detection_ms: u64,

    /// Minimum consecutive deadline-exceeded calls before a channel counts as unresponsive.
    #[serde(default)]
    pub unresponsive_detection_dropped_count: u32,
}

impl ResiliencyConfig {
    /// Detector thresholds, or `None` when detection is disabled.
    #[must_use]
    pub fn unresponsive(&self) -> Option<UnresponsiveConfig> {
        self.unresponsive_detection_enabled.then(|| UnresponsiveConfig {
            stall: Duration::from_millis(self.unresponsive_detection_ms),
            dropped_count: self.unresponsive_detection_dropped_count,
        })
    }
}

/// Affinity behaviour shared by a set of methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodConfig {
    /// Fully qualified method names, e.g. `/package.Service/Method`.
    pub names: Vec<String>,
    pub affinity: MethodAffinity,
}

/// Metrics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Forward snapshots to the `metrics` facade.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Prefix for every metric name.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Interval of the periodic metrics log. `0` disables it.
    #[serde(default = "default_log_interval_seconds")]
    pub log_interval_seconds: u64,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_name_prefix() -> String {
    "chanpool_".to_string()
}

fn default_log_interval_seconds() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name_prefix: default_name_prefix(),
            log_interval_seconds: default_log_interval_seconds(),
        }
    }
}

impl MetricsConfig {
    #[must_use]
    pub fn log_interval(&self) -> Option<Duration> {
        (self.log_interval_seconds > 0).then(|| Duration::from_secs(self.log_interval_seconds))
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset. Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`. Defaults to `pretty`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub resiliency: ResiliencyConfig,

    #[serde(default)]
    pub methods: Vec<MethodConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error. Environment variables with the
    /// `CHANPOOL__` prefix override single values, using `__` between nested
    /// fields (e.g. `CHANPOOL__POOL__MAX_SIZE=4`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("pool.max_size", i64::try_from(DEFAULT_MAX_CHANNELS).unwrap_or(10))?
            .set_default("pool.min_size", 0)?
            .set_default(
                "pool.concurrent_streams_low_watermark",
                i64::try_from(MAX_STREAMS_PER_CHANNEL).unwrap_or(100),
            )?
            .set_default("pool.use_round_robin_on_bind", false)?
            .set_default("resiliency.not_ready_fallback_enabled", false)?
            .set_default("resiliency.unresponsive_detection_enabled", false)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.name_prefix", default_name_prefix())?
            .set_default("metrics.log_interval_seconds", 60)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("CHANPOOL").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Loads from `CHANPOOL_CONFIG`, falling back to `config/chanpool.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CHANPOOL_CONFIG")
            .unwrap_or_else(|_| "config/chanpool.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Clamps invalid bounds to usable values.
    ///
    /// Returns one message per adjustment; each is also logged at warn level.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut adjustments = Vec::new();

        if self.pool.max_size == 0 {
            adjustments.push(format!("pool.max_size 0 replaced with {DEFAULT_MAX_CHANNELS}"));
            self.pool.max_size = DEFAULT_MAX_CHANNELS;
        }

        if self.pool.concurrent_streams_low_watermark > MAX_STREAMS_PER_CHANNEL {
            adjustments.push(format!(
                "pool.concurrent_streams_low_watermark {} outside 0..={MAX_STREAMS_PER_CHANNEL}, using {MAX_STREAMS_PER_CHANNEL}",
                self.pool.concurrent_streams_low_watermark
            ));
            self.pool.concurrent_streams_low_watermark = MAX_STREAMS_PER_CHANNEL;
        }

        if self.pool.min_size > self.pool.max_size {
            adjustments.push(format!(
                "pool.min_size {} exceeds pool.max_size {}, using {}",
                self.pool.min_size, self.pool.max_size, self.pool.max_size
            ));
            self.pool.min_size = self.pool.max_size;
        }

        if self.resiliency.unresponsive_detection_enabled &&
            self.resiliency.unresponsive_detection_dropped_count == 0
        {
            adjustments.push(
                "resiliency.unresponsive_detection_dropped_count 0 replaced with 1".to_string(),
            );
            self.resiliency.unresponsive_detection_dropped_count = 1;
        }

        for adjustment in &adjustments {
            tracing::warn!(adjustment = %adjustment, "configuration adjusted");
        }

        adjustments
    }

    /// Validates what cannot be clamped.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }

    /// Per-method affinity keyed by full method name.
    ///
    /// A method listed in several entries keeps the last one.
    #[must_use]
    pub fn method_affinity(&self) -> HashMap<String, MethodAffinity> {
        self.methods
            .iter()
            .flat_map(|method| {
                method.names.iter().map(|name| (name.clone(), method.affinity.clone()))
            })
            .collect()
    }
}
