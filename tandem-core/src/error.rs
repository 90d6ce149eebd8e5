//! Error types for Tandem operations

use thiserror::Error;

/// Configuration errors.
///
/// Raised when a config value is malformed (zero sizes, empty windows) or when
/// a config file cannot be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config value for {field} ({value}): {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Key-value backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Quota exceeded writing {key} (limit {limit})")]
    QuotaExceeded { key: String, limit: usize },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed for {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Corrupt LRU link at {key}: neighbour record is missing")]
    CorruptLink { key: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Getter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GetterError {
    #[error("Throttle released while nothing was in flight")]
    ThrottleUnderflow,

    #[error("Reply dropped before a value was delivered")]
    Canceled,

    #[error("Getter lock poisoned")]
    LockPoisoned,
}

/// Batcher errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Batcher requires a tokio runtime to schedule its window timer")]
    NoRuntime,

    #[error("Batcher lock poisoned")]
    LockPoisoned,
}

/// Master error type for all Tandem errors.
#[derive(Debug, Error)]
pub enum TandemError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Getter error: {0}")]
    Getter(#[from] GetterError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
}

/// Result type alias for Tandem operations.
pub type TandemResult<T> = Result<T, TandemError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::invalid("max_size", 0, "must be > 0");
        let msg = format!("{}", err);
        assert!(msg.contains("max_size"));
        assert!(msg.contains("(0)"));
        assert!(msg.contains("must be > 0"));
    }

    #[test]
    fn test_backend_error_display_quota_exceeded() {
        let err = BackendError::QuotaExceeded {
            key: "users\t\t[1]".to_string(),
            limit: 16,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Quota exceeded"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn test_cache_error_display_corrupt_link() {
        let err = CacheError::CorruptLink {
            key: "alpha".to_string(),
        };
        assert!(format!("{}", err).contains("alpha"));
    }

    #[test]
    fn test_tandem_error_from_variants() {
        let config = TandemError::from(ConfigError::invalid("window_ms", 0, "must be > 0"));
        assert!(matches!(config, TandemError::Config(_)));

        let backend = TandemError::from(BackendError::LockPoisoned);
        assert!(matches!(backend, TandemError::Backend(_)));

        let cache = TandemError::from(CacheError::LockPoisoned);
        assert!(matches!(cache, TandemError::Cache(_)));

        let getter = TandemError::from(GetterError::ThrottleUnderflow);
        assert!(matches!(getter, TandemError::Getter(_)));

        let batch = TandemError::from(BatchError::NoRuntime);
        assert!(matches!(batch, TandemError::Batch(_)));
    }

    #[test]
    fn test_lock_poisoned_messages() {
        assert!(format!("{}", BackendError::LockPoisoned).contains("lock poisoned"));
        assert!(format!("{}", GetterError::LockPoisoned).contains("lock poisoned"));
    }
}
