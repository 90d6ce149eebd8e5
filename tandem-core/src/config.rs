//! Configuration types
//!
//! Every primitive takes a small serde-deserializable config. Defaults match
//! the long-standing behaviour of the coordination layer (100-entry caches,
//! 10-call / 50ms batch windows, 100-slot throttles). [`TandemConfig`] bundles
//! them so a host can load one TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ConfigError;

/// Which medium a cache lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map owned by the cache.
    #[default]
    Memory,
    /// Host-supplied persistent medium.
    Local,
    /// Host-supplied medium scoped to the current session.
    Session,
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Namespace prefix for every backend key this cache writes.
    pub name: String,
    /// Maximum number of live entries before LRU eviction kicks in.
    pub max_size: usize,
    /// Backend selector used by the cache registry.
    pub backend: BackendKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_size: 100,
            backend: BackendKind::Memory,
        }
    }
}

impl CacheConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::invalid("cache.name", "\"\"", "must not be empty"));
        }
        // Tabs delimit the namespace from entry keys in external media.
        if self.name.contains('\t') {
            return Err(ConfigError::invalid(
                "cache.name",
                &self.name,
                "must not contain tab characters",
            ));
        }
        if self.max_size == 0 {
            return Err(ConfigError::invalid("cache.max_size", 0, "must be > 0"));
        }
        Ok(())
    }
}

/// Batcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BatcherConfig {
    /// Pending-call count that triggers an immediate flush.
    pub max: usize,
    /// Quiet period, in milliseconds, after the last call before flushing.
    pub window_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max: 10,
            window_ms: 50,
        }
    }
}

impl BatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Set the quiet period. Partial milliseconds round up, so only a zero
    /// duration fails validation.
    pub fn with_window(mut self, window: Duration) -> Self {
        let millis = window.as_nanos().div_ceil(1_000_000);
        self.window_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max == 0 {
            return Err(ConfigError::invalid("batch.max", 0, "must be > 0"));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::invalid("batch.window_ms", 0, "must be > 0"));
        }
        Ok(())
    }
}

/// Getter configuration.
///
/// Injected caches and throttle objects are supplied to the getter builder
/// directly; this struct only carries the declarative part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GetterConfig {
    /// Cache results by call key.
    pub cache: bool,
    /// Size of the private cache created when none is injected.
    pub cache_size: usize,
    /// Name of a shared throttle; `None` disables throttling.
    pub throttle: Option<String>,
    /// Maximum in-flight operations allowed by the throttle.
    pub throttle_size: usize,
}

impl Default for GetterConfig {
    fn default() -> Self {
        Self {
            cache: true,
            cache_size: 100,
            throttle: None,
            throttle_size: 100,
        }
    }
}

impl GetterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_throttle(mut self, name: impl Into<String>) -> Self {
        self.throttle = Some(name.into());
        self
    }

    pub fn with_throttle_size(mut self, size: usize) -> Self {
        self.throttle_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache && self.cache_size == 0 {
            return Err(ConfigError::invalid("getter.cache_size", 0, "must be > 0"));
        }
        if self.throttle_size == 0 {
            return Err(ConfigError::invalid("getter.throttle_size", 0, "must be > 0"));
        }
        Ok(())
    }
}

/// Bundled configuration for a host embedding all primitives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TandemConfig {
    pub cache: CacheConfig,
    pub batch: BatcherConfig,
    pub getter: GetterConfig,
}

impl TandemConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TandemConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.batch.validate()?;
        self.getter.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TandemConfig::default().validate().is_ok());
        assert_eq!(BatcherConfig::default().window(), Duration::from_millis(50));
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new("profiles")
            .with_max_size(5)
            .with_backend(BackendKind::Session);
        assert_eq!(config.name, "profiles");
        assert_eq!(config.max_size, 5);
        assert_eq!(config.backend, BackendKind::Session);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(CacheConfig::default().with_max_size(0).validate().is_err());
        assert!(BatcherConfig::new().with_max(0).validate().is_err());
        assert!(BatcherConfig::new()
            .with_window(Duration::ZERO)
            .validate()
            .is_err());
        assert!(GetterConfig::new().with_throttle_size(0).validate().is_err());
    }

    #[test]
    fn test_sub_millisecond_window_rounds_up() {
        let config = BatcherConfig::new().with_window(Duration::from_micros(200));
        assert_eq!(config.window_ms, 1);
        assert!(config.validate().is_ok());
        let config = BatcherConfig::new().with_window(Duration::from_micros(2_500));
        assert_eq!(config.window(), Duration::from_millis(3));
    }

    #[test]
    fn test_disabled_cache_ignores_cache_size() {
        let config = GetterConfig::new().with_cache(false).with_cache_size(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tab_in_cache_name_rejected() {
        let err = CacheConfig::new("a\tb").validate().unwrap_err();
        assert!(format!("{}", err).contains("tab"));
    }

    #[test]
    fn test_from_toml_str() {
        let config = TandemConfig::from_toml_str(
            r#"
            [cache]
            name = "streams"
            max_size = 3
            backend = "local"

            [batch]
            max = 4
            window_ms = 20

            [getter]
            throttle = "network"
            throttle_size = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.backend, BackendKind::Local);
        assert_eq!(config.batch.max, 4);
        assert_eq!(config.getter.throttle.as_deref(), Some("network"));
        assert!(config.getter.cache);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = TandemConfig::from_toml_str("[cache]\nmaxsize = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values_rejected_on_load() {
        let err = TandemConfig::from_toml_str("[batch]\nwindow_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
