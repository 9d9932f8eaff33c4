//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a single cache tier
///
/// Defaults:
/// - TTL: 5 minutes, a short window for listing data that changes through the admin UI
/// - Memory: eviction brings usage back to 80% of the budget
/// - Sweep: every minute, dropping anything older than twice the TTL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Default time-to-live for cache entries
    pub default_ttl: Duration,

    /// Maximum number of entries in the tier
    pub max_entries: usize,

    /// Memory budget in estimated bytes
    pub max_memory_bytes: usize,

    /// Fraction of the budget that memory eviction drains down to (0.0 - 1.0)
    pub memory_target_ratio: f64,

    /// TTL jitter factor (0.0 - 1.0) applied when no explicit TTL is given
    pub ttl_jitter: f64,

    /// Start the periodic sweep task on construction
    pub enable_auto_cleanup: bool,

    /// Interval of the periodic sweep
    pub cleanup_interval: Duration,

    /// Entries older than `default_ttl * sweep_age_factor` are swept
    pub sweep_age_factor: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 1_000,
            // 50 MB
            max_memory_bytes: 50 * 1024 * 1024,
            memory_target_ratio: 0.8,
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(60),
            sweep_age_factor: 2.0,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(CacheError::ConfigError(
                "max_entries must be greater than 0".to_string(),
            ));
        }

        if self.max_memory_bytes == 0 {
            return Err(CacheError::ConfigError(
                "max_memory_bytes must be greater than 0".to_string(),
            ));
        }

        if self.default_ttl.is_zero() {
            return Err(CacheError::ConfigError(
                "default_ttl must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.memory_target_ratio) {
            return Err(CacheError::ConfigError(
                "memory_target_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::ConfigError(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.sweep_age_factor < 1.0 {
            return Err(CacheError::ConfigError(
                "sweep_age_factor must be at least 1.0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::ConfigError(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }

    /// Age beyond which the periodic sweep removes an entry unconditionally
    pub fn sweep_age(&self) -> Duration {
        self.default_ttl.mul_f64(self.sweep_age_factor)
    }

    /// Memory level that eviction drains down to
    pub fn memory_target_bytes(&self) -> usize {
        (self.max_memory_bytes as f64 * self.memory_target_ratio) as usize
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    max_entries: Option<usize>,
    max_memory_bytes: Option<usize>,
    memory_target_ratio: Option<f64>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    sweep_age_factor: Option<f64>,
}

impl CacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set memory budget in bytes
    pub fn max_memory_bytes(mut self, size: usize) -> Self {
        self.max_memory_bytes = Some(size);
        self
    }

    /// Set the fraction of the budget memory eviction drains down to
    pub fn memory_target_ratio(mut self, ratio: f64) -> Self {
        self.memory_target_ratio = Some(ratio);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable the periodic sweep task
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set the TTL multiple after which the sweep drops entries
    pub fn sweep_age_factor(mut self, factor: f64) -> Self {
        self.sweep_age_factor = Some(factor);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_memory_bytes: self.max_memory_bytes.unwrap_or(defaults.max_memory_bytes),
            memory_target_ratio: self
                .memory_target_ratio
                .unwrap_or(defaults.memory_target_ratio),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            sweep_age_factor: self.sweep_age_factor.unwrap_or(defaults.sweep_age_factor),
        }
    }
}

/// Preset configurations for the two tiers
impl CacheConfig {
    /// Small, short-lived pool for tier 1
    pub fn fast_tier() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_entries: 100,
            max_memory_bytes: 10 * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Larger pool for tier 2 with three times the tier-1 TTL
    pub fn capacity_tier() -> Self {
        Self {
            default_ttl: Duration::from_secs(900),
            max_entries: 500,
            max_memory_bytes: 40 * 1024 * 1024,
            ..Default::default()
        }
    }
}

/// Configuration for the two-tier store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TieredConfig {
    /// Fast, short-TTL pool
    pub l1: CacheConfig,

    /// Large, long-TTL pool
    pub l2: CacheConfig,

    /// Entries with `priority > l2_priority_threshold` are mirrored into tier 2
    pub l2_priority_threshold: u8,

    /// Payloads whose estimate exceeds this many bytes are compacted
    pub compression_threshold_bytes: usize,

    /// Enable payload compaction
    pub enable_compression: bool,

    /// Move tier-1 victims that were read at least once into tier 2
    pub enable_demotion: bool,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            l1: CacheConfig::fast_tier(),
            l2: CacheConfig::capacity_tier(),
            l2_priority_threshold: 2,
            compression_threshold_bytes: 1024,
            enable_compression: true,
            enable_demotion: true,
        }
    }
}

impl TieredConfig {
    /// Create a new builder for tiered configuration
    pub fn builder() -> TieredConfigBuilder {
        TieredConfigBuilder::default()
    }

    /// Validate both tiers and the tier-2 relationship
    pub fn validate(&self) -> Result<()> {
        self.l1
            .validate()
            .map_err(|e| CacheError::ConfigError(format!("l1: {}", e)))?;
        self.l2
            .validate()
            .map_err(|e| CacheError::ConfigError(format!("l2: {}", e)))?;

        if self.l2.default_ttl < self.l1.default_ttl {
            return Err(CacheError::ConfigError(
                "l2 default_ttl must not be shorter than l1 default_ttl".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from `QUERY_CACHE_*` environment variables
    ///
    /// A `.env` file is read first if present. Unset variables keep their
    /// defaults; unparsable ones are a configuration error.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("QUERY_CACHE_L1_TTL_SECS")? {
            config.l1.default_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("QUERY_CACHE_L1_MAX_ENTRIES")? {
            config.l1.max_entries = max;
        }
        if let Some(secs) = env_parse::<u64>("QUERY_CACHE_L2_TTL_SECS")? {
            config.l2.default_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse::<usize>("QUERY_CACHE_L2_MAX_ENTRIES")? {
            config.l2.max_entries = max;
        }
        if let Some(bytes) = env_parse::<usize>("QUERY_CACHE_MAX_MEMORY_BYTES")? {
            config.l1.max_memory_bytes = bytes;
            config.l2.max_memory_bytes = bytes;
        }
        if let Some(secs) = env_parse::<u64>("QUERY_CACHE_CLEANUP_INTERVAL_SECS")? {
            config.l1.cleanup_interval = Duration::from_secs(secs);
            config.l2.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse::<u8>("QUERY_CACHE_L2_PRIORITY_THRESHOLD")? {
            config.l2_priority_threshold = threshold;
        }
        if let Some(bytes) = env_parse::<usize>("QUERY_CACHE_COMPRESSION_THRESHOLD")? {
            config.compression_threshold_bytes = bytes;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Builder for tiered configuration
#[derive(Debug, Default)]
pub struct TieredConfigBuilder {
    l1: Option<CacheConfig>,
    l2: Option<CacheConfig>,
    l2_priority_threshold: Option<u8>,
    compression_threshold_bytes: Option<usize>,
    enable_compression: Option<bool>,
    enable_demotion: Option<bool>,
}

impl TieredConfigBuilder {
    pub fn l1(mut self, config: CacheConfig) -> Self {
        self.l1 = Some(config);
        self
    }

    pub fn l2(mut self, config: CacheConfig) -> Self {
        self.l2 = Some(config);
        self
    }

    pub fn l2_priority_threshold(mut self, threshold: u8) -> Self {
        self.l2_priority_threshold = Some(threshold);
        self
    }

    pub fn compression_threshold_bytes(mut self, bytes: usize) -> Self {
        self.compression_threshold_bytes = Some(bytes);
        self
    }

    pub fn enable_compression(mut self, enable: bool) -> Self {
        self.enable_compression = Some(enable);
        self
    }

    pub fn enable_demotion(mut self, enable: bool) -> Self {
        self.enable_demotion = Some(enable);
        self
    }

    /// Build the tiered configuration
    pub fn build(self) -> TieredConfig {
        let defaults = TieredConfig::default();

        TieredConfig {
            l1: self.l1.unwrap_or(defaults.l1),
            l2: self.l2.unwrap_or(defaults.l2),
            l2_priority_threshold: self
                .l2_priority_threshold
                .unwrap_or(defaults.l2_priority_threshold),
            compression_threshold_bytes: self
                .compression_threshold_bytes
                .unwrap_or(defaults.compression_threshold_bytes),
            enable_compression: self
                .enable_compression
                .unwrap_or(defaults.enable_compression),
            enable_demotion: self.enable_demotion.unwrap_or(defaults.enable_demotion),
        }
    }
}

/// Read and parse an environment variable, `None` when unset
pub(crate) fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::ConfigError(format!("{}={:?}: {}", name, raw, e))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(CacheError::ConfigError(format!("{}: {}", name, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.max_entries, 1_000);
        assert_eq!(config.sweep_age(), Duration::from_secs(600));
        assert!(config.enable_auto_cleanup);
    }

    #[test]
    fn test_config_validation() {
        let valid_config = CacheConfig::default();
        assert!(valid_config.validate().is_ok());

        let mut invalid_config = CacheConfig::default();
        invalid_config.max_entries = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.ttl_jitter = 1.5;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.memory_target_ratio = -0.1;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = CacheConfig::default();
        invalid_config.sweep_age_factor = 0.5;
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .max_entries(5000)
            .max_memory_bytes(50_000_000)
            .enable_auto_cleanup(false)
            .build();

        assert_eq!(config.default_ttl, Duration::from_secs(600));
        assert_eq!(config.max_entries, 5000);
        assert_eq!(config.max_memory_bytes, 50_000_000);
        assert_eq!(config.memory_target_bytes(), 40_000_000);
        assert!(!config.enable_auto_cleanup);
    }

    #[test]
    fn test_ttl_with_jitter() {
        let config = CacheConfig {
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.1,
            ..Default::default()
        };

        let ttl = config.ttl_with_jitter();
        assert!(ttl.as_secs_f64() >= 3600.0 - 360.0);
        assert!(ttl.as_secs_f64() <= 3600.0 + 360.0);

        let exact = CacheConfig::default();
        assert_eq!(exact.ttl_with_jitter(), exact.default_ttl);
    }

    #[test]
    fn test_tiered_defaults() {
        let config = TieredConfig::default();
        assert_eq!(config.l2.default_ttl, config.l1.default_ttl * 3);
        assert_eq!(config.l2_priority_threshold, 2);
        assert_eq!(config.compression_threshold_bytes, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tiered_validation_rejects_short_l2() {
        let config = TieredConfig::builder()
            .l1(CacheConfig::builder().default_ttl(Duration::from_secs(60)).build())
            .l2(CacheConfig::builder().default_ttl(Duration::from_secs(30)).build())
            .build();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("l2 default_ttl"));
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("QUERY_CACHE_TEST_ENV_PARSE_OK", " 42 ");
        std::env::set_var("QUERY_CACHE_TEST_ENV_PARSE_BAD", "forty-two");

        assert_eq!(env_parse::<u64>("QUERY_CACHE_TEST_ENV_PARSE_OK").unwrap(), Some(42));
        assert!(env_parse::<u64>("QUERY_CACHE_TEST_ENV_PARSE_BAD").is_err());
        assert_eq!(env_parse::<u64>("QUERY_CACHE_TEST_ENV_PARSE_UNSET").unwrap(), None);
    }
}
