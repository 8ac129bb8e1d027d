//! Configuration Module
//!
//! Closed, validated configuration structs for each component of the
//! optimization layer. Every field is checked at construction; invalid
//! limits are programming errors and fail fast, never at call time.

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

// == Cache Config ==
/// Configuration for the bounded TTL cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// TTL applied to entries stored without an explicit TTL
    pub default_ttl: Duration,
}

impl CacheConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidCapacity(
                "cache max_entries must be > 0".to_string(),
            ));
        }
        if self.default_ttl.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "cache default_ttl must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(300),
        }
    }
}

// == Dedupe Config ==
/// Configuration for the single-flight coalescer.
#[derive(Debug, Clone)]
pub struct DedupeConfig {
    /// Maximum age of a pending call that new callers may still join
    pub max_age: Duration,
    /// How long a settled call lingers to absorb near-simultaneous
    /// callers. Kept short: a lingering settled call can re-serve a key
    /// for up to this long after its cache entry is invalidated.
    pub grace: Duration,
}

impl DedupeConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_age.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "dedupe max_age must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30),
            grace: Duration::from_millis(100),
        }
    }
}

// == Debounce Mode ==
/// Edge on which a debounced call fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceMode {
    /// Fire after a quiet period, with the latest call winning
    Trailing,
    /// Fire on the first call of a quiet period, suppress the rest
    Immediate,
}

// == Debounce Config ==
/// Configuration for the fixed-delay debouncer.
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Quiet period a call must survive before firing
    pub delay: Duration,
    /// Trailing or immediate edge
    pub mode: DebounceMode,
}

impl DebounceConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delay.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "debounce delay must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            mode: DebounceMode::Trailing,
        }
    }
}

// == Adaptive Config ==
/// Configuration for the frequency-adaptive debouncer.
///
/// The effective delay scales with observed request frequency:
/// `clamp(requests_per_second * 50ms, min_delay, max_delay)`. Above
/// `max_requests` calls per window the debouncer degrades to serving
/// from the cache.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Lower bound on the computed delay
    pub min_delay: Duration,
    /// Upper bound on the computed delay
    pub max_delay: Duration,
    /// Frequency tracking window
    pub window: Duration,
    /// Calls per window above which debouncing is bypassed entirely
    pub max_requests: u32,
}

impl AdaptiveConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "adaptive window must be > 0".to_string(),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidDuration(
                "adaptive min_delay must not exceed max_delay".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidLimit(
                "adaptive max_requests must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
            window: Duration::from_secs(10),
            max_requests: 100,
        }
    }
}

// == Rate Limit Config ==
/// Configuration for the sliding-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum admitted calls per key within the window
    pub max_requests: usize,
    /// Trailing window length
    pub window: Duration,
}

impl RateLimitConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidLimit(
                "rate limit max_requests must be > 0".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "rate limit window must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

// == Batch Config ==
/// Configuration for the batch coalescer.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Collection window before a batch executes
    pub delay: Duration,
    /// Entry count that triggers immediate execution
    pub max_batch_size: usize,
}

impl BatchConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "batch max_batch_size must be > 0".to_string(),
            ));
        }
        if self.delay.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "batch delay must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(10),
            max_batch_size: 25,
        }
    }
}

// == Optimizer Config ==
/// Aggregate configuration for the request orchestrator.
///
/// Debounce policies are optional; when both the fixed and adaptive
/// policies are present the adaptive one takes precedence.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Bounded TTL cache settings
    pub cache: CacheConfig,
    /// Single-flight coalescer settings
    pub dedupe: DedupeConfig,
    /// Optional fixed-delay debounce policy
    pub debounce: Option<DebounceConfig>,
    /// Optional frequency-adaptive debounce policy
    pub adaptive: Option<AdaptiveConfig>,
    /// Sliding-window rate limiter settings
    pub rate_limit: RateLimitConfig,
    /// Interval of the background sweep task
    pub sweep_interval: Duration,
}

impl OptimizerConfig {
    /// Validates every component configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.dedupe.validate()?;
        if let Some(debounce) = &self.debounce {
            debounce.validate()?;
        }
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate()?;
        }
        self.rate_limit.validate()?;
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "sweep_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates an OptimizerConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `DEFAULT_TTL_MS` - Default cache TTL in milliseconds (default: 300000)
    /// - `RATE_LIMIT_MAX` - Admitted calls per key per window (default: 100)
    /// - `RATE_LIMIT_WINDOW_MS` - Rate window in milliseconds (default: 60000)
    /// - `SWEEP_INTERVAL_SECS` - Sweep frequency in seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache: CacheConfig {
                max_entries: env_or("MAX_ENTRIES", defaults.cache.max_entries),
                default_ttl: Duration::from_millis(env_or(
                    "DEFAULT_TTL_MS",
                    defaults.cache.default_ttl.as_millis() as u64,
                )),
            },
            rate_limit: RateLimitConfig {
                max_requests: env_or("RATE_LIMIT_MAX", defaults.rate_limit.max_requests),
                window: Duration::from_millis(env_or(
                    "RATE_LIMIT_WINDOW_MS",
                    defaults.rate_limit.window.as_millis() as u64,
                )),
            },
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
            ..defaults
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            dedupe: DedupeConfig::default(),
            debounce: None,
            adaptive: None,
            rate_limit: RateLimitConfig::default(),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Reads an environment variable, falling back to a default on absence
/// or parse failure.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_config_default_is_valid() {
        let config = OptimizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
    }

    #[test]
    fn test_cache_config_rejects_zero_capacity() {
        let config = CacheConfig {
            max_entries: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCapacity(_))
        ));
    }

    #[test]
    fn test_cache_config_rejects_zero_ttl() {
        let config = CacheConfig {
            default_ttl: Duration::ZERO,
            ..CacheConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_adaptive_config_rejects_inverted_delays() {
        let config = AdaptiveConfig {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(100),
            ..AdaptiveConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_config_rejects_zero_budget() {
        let config = RateLimitConfig {
            max_requests: 0,
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLimit(_))
        ));
    }

    #[test]
    fn test_batch_config_rejects_zero_size() {
        let config = BatchConfig {
            max_batch_size: 0,
            ..BatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_optimizer_config_validates_nested_policies() {
        let config = OptimizerConfig {
            debounce: Some(DebounceConfig {
                delay: Duration::ZERO,
                mode: DebounceMode::Trailing,
            }),
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("MAX_ENTRIES");
        env::remove_var("DEFAULT_TTL_MS");
        env::remove_var("RATE_LIMIT_MAX");
        env::remove_var("RATE_LIMIT_WINDOW_MS");
        env::remove_var("SWEEP_INTERVAL_SECS");

        let config = OptimizerConfig::from_env();
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(300));
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }
}
