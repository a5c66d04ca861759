//! Configuration types

use crate::{ConfigError, PacerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Throttler configuration.
///
/// Durations are stored as milliseconds so the struct maps one-to-one onto
/// the TOML file and the `PACER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Maximum number of requests in flight at once
    pub max_concurrent: usize,
    /// Pause between finishing one request and admitting the next queued one
    pub delay_between_requests_ms: u64,
    /// Total attempts per request, including the first
    pub retry_attempts: u32,
    /// Base backoff delay; doubled on every retry
    pub retry_delay_ms: u64,
    /// How long a cached GET response stays valid
    pub cache_ttl_ms: u64,
    /// Upper bound on cached entries (None = unbounded)
    pub cache_max_entries: Option<usize>,
    /// Per-attempt deadline (None = wait indefinitely)
    pub request_timeout_ms: Option<u64>,
    /// Attach identical concurrent GETs to a single network call
    pub coalesce_in_flight: bool,
    /// Default stagger between requests of a batch
    pub batch_stagger_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            delay_between_requests_ms: 150,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            cache_ttl_ms: 300_000,
            cache_max_entries: Some(256),
            request_timeout_ms: None,
            coalesce_in_flight: true,
            batch_stagger_ms: 200,
        }
    }
}

impl ThrottleConfig {
    pub fn delay_between_requests(&self) -> Duration {
        Duration::from_millis(self.delay_between_requests_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn batch_stagger(&self) -> Duration {
        Duration::from_millis(self.batch_stagger_ms)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_concurrent >= 1
    /// - retry_attempts >= 1
    /// - cache_ttl_ms > 0
    /// - cache_max_entries, when set, is > 0
    /// - request_timeout_ms, when set, is > 0
    pub fn validate(&self) -> PacerResult<()> {
        if self.max_concurrent == 0 {
            return Err(invalid("throttle.max_concurrent", 0, "must be >= 1"));
        }

        if self.retry_attempts == 0 {
            return Err(invalid(
                "throttle.retry_attempts",
                0,
                "must be >= 1 (counts the first attempt)",
            ));
        }

        if self.cache_ttl_ms == 0 {
            return Err(invalid("throttle.cache_ttl_ms", 0, "must be > 0"));
        }

        if self.cache_max_entries == Some(0) {
            return Err(invalid(
                "throttle.cache_max_entries",
                0,
                "must be > 0 when set; omit it for an unbounded cache",
            ));
        }

        if self.request_timeout_ms == Some(0) {
            return Err(invalid("throttle.request_timeout_ms", 0, "must be > 0 when set"));
        }

        Ok(())
    }
}

/// Configuration for the lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HookConfig {
    pub debounce_ms: u64,
    pub min_call_gap_ms: u64,
    pub min_refresh_interval_ms: u64,
    pub sequential_delay_ms: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            min_call_gap_ms: 300,
            min_refresh_interval_ms: 30_000,
            sequential_delay_ms: 200,
        }
    }
}

impl HookConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn min_call_gap(&self) -> Duration {
        Duration::from_millis(self.min_call_gap_ms)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    pub fn sequential_delay(&self) -> Duration {
        Duration::from_millis(self.sequential_delay_ms)
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacerConfig {
    pub throttle: ThrottleConfig,
    pub hooks: HookConfig,
}

impl PacerConfig {
    /// Load from a TOML file, overlay `PACER_*` environment variables, validate.
    pub fn load(path: &Path) -> PacerResult<Self> {
        let config = Self::from_path(path)?.overlay(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> PacerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> PacerResult<Self> {
        toml::from_str(contents).map_err(|e| {
            ConfigError::ParseFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Defaults overlaid with environment variables.
    ///
    /// Environment variables:
    /// - `PACER_MAX_CONCURRENT` (default: 3)
    /// - `PACER_DELAY_BETWEEN_REQUESTS_MS` (default: 150)
    /// - `PACER_RETRY_ATTEMPTS` (default: 3)
    /// - `PACER_RETRY_DELAY_MS` (default: 1000)
    /// - `PACER_CACHE_TTL_MS` (default: 300000)
    /// - `PACER_CACHE_MAX_ENTRIES` (default: 256)
    /// - `PACER_REQUEST_TIMEOUT_MS` (default: unset)
    /// - `PACER_DEBOUNCE_MS` (default: 300)
    /// - `PACER_MIN_REFRESH_INTERVAL_MS` (default: 30000)
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored.
    pub fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let throttle = &mut self.throttle;
        set_parsed(&lookup, "PACER_MAX_CONCURRENT", &mut throttle.max_concurrent);
        set_parsed(
            &lookup,
            "PACER_DELAY_BETWEEN_REQUESTS_MS",
            &mut throttle.delay_between_requests_ms,
        );
        set_parsed(&lookup, "PACER_RETRY_ATTEMPTS", &mut throttle.retry_attempts);
        set_parsed(&lookup, "PACER_RETRY_DELAY_MS", &mut throttle.retry_delay_ms);
        set_parsed(&lookup, "PACER_CACHE_TTL_MS", &mut throttle.cache_ttl_ms);
        set_parsed(&lookup, "PACER_BATCH_STAGGER_MS", &mut throttle.batch_stagger_ms);
        if let Some(max) = parsed(&lookup, "PACER_CACHE_MAX_ENTRIES") {
            throttle.cache_max_entries = Some(max);
        }
        if let Some(timeout) = parsed(&lookup, "PACER_REQUEST_TIMEOUT_MS") {
            throttle.request_timeout_ms = Some(timeout);
        }

        let hooks = &mut self.hooks;
        set_parsed(&lookup, "PACER_DEBOUNCE_MS", &mut hooks.debounce_ms);
        set_parsed(&lookup, "PACER_MIN_CALL_GAP_MS", &mut hooks.min_call_gap_ms);
        set_parsed(
            &lookup,
            "PACER_MIN_REFRESH_INTERVAL_MS",
            &mut hooks.min_refresh_interval_ms,
        );
        set_parsed(&lookup, "PACER_SEQUENTIAL_DELAY_MS", &mut hooks.sequential_delay_ms);
        self
    }

    pub fn validate(&self) -> PacerResult<()> {
        self.throttle.validate()
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key).and_then(|s| s.trim().parse().ok())
}

fn set_parsed<F, T>(lookup: &F, key: &str, field: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(value) = parsed(lookup, key) {
        *field = value;
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> crate::PacerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacerError;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ThrottleConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.delay_between_requests(), Duration::from_millis(150));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert!(config.validate().is_ok());

        let hooks = HookConfig::default();
        assert_eq!(hooks.debounce(), Duration::from_millis(300));
        assert_eq!(hooks.min_call_gap(), Duration::from_millis(300));
        assert_eq!(hooks.min_refresh_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ThrottleConfig {
            max_concurrent: 0,
            ..ThrottleConfig::default()
        };
        match config.validate() {
            Err(PacerError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "throttle.max_concurrent");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_attempts_and_capacity() {
        let attempts = ThrottleConfig {
            retry_attempts: 0,
            ..ThrottleConfig::default()
        };
        assert!(attempts.validate().is_err());

        let capacity = ThrottleConfig {
            cache_max_entries: Some(0),
            ..ThrottleConfig::default()
        };
        assert!(capacity.validate().is_err());

        let unbounded = ThrottleConfig {
            cache_max_entries: None,
            ..ThrottleConfig::default()
        };
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_file_keeps_defaults() {
        let config = PacerConfig::from_toml_str(
            r#"
            [throttle]
            max_concurrent = 5
            request_timeout_ms = 10000

            [hooks]
            debounce_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.throttle.max_concurrent, 5);
        assert_eq!(config.throttle.request_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.throttle.retry_attempts, 3);
        assert_eq!(config.hooks.debounce_ms, 500);
        assert_eq!(config.hooks.min_refresh_interval_ms, 30_000);
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        let result = PacerConfig::from_toml_str("[throttle]\nmax_parallel = 2\n");
        assert!(matches!(
            result,
            Err(PacerError::Config(ConfigError::ParseFailed { .. }))
        ));
    }

    #[test]
    fn test_overlay_applies_parseable_values_only() {
        let env: HashMap<&str, &str> = [
            ("PACER_MAX_CONCURRENT", "6"),
            ("PACER_RETRY_DELAY_MS", "250"),
            ("PACER_CACHE_TTL_MS", "not-a-number"),
            ("PACER_REQUEST_TIMEOUT_MS", "8000"),
            ("PACER_DEBOUNCE_MS", " 120 "),
        ]
        .into_iter()
        .collect();

        let config = PacerConfig::default().overlay(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.throttle.max_concurrent, 6);
        assert_eq!(config.throttle.retry_delay_ms, 250);
        assert_eq!(config.throttle.cache_ttl_ms, 300_000);
        assert_eq!(config.throttle.request_timeout_ms, Some(8000));
        assert_eq!(config.hooks.debounce_ms, 120);
    }

    #[test]
    fn test_from_path_missing_file() {
        let result = PacerConfig::from_path(Path::new("/definitely/not/here/pacer.toml"));
        assert!(matches!(
            result,
            Err(PacerError::Config(ConfigError::ReadFailed { .. }))
        ));
    }
}
