//! Key-value backend trait and in-process media.
//!
//! A cache never assumes anything about where its records live beyond this
//! string-keyed get/set/remove surface. The LRU bookkeeping is stored inside
//! the values themselves, so any medium that can hold strings can hold a
//! complete cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tandem_core::BackendError;

/// Capability interface for a cache medium.
///
/// Implementations must be internally synchronized; the cache serializes its
/// own mutations but several caches may share one medium under different
/// namespaces.
pub trait KeyValueBackend: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Capacity failures (quota, map size) are reported here and nowhere else.
    fn set(&self, key: &str, value: String) -> Result<(), BackendError>;

    /// Delete `key`. Returns whether a value was present.
    fn remove(&self, key: &str) -> Result<bool, BackendError>;
}

impl<T: KeyValueBackend + ?Sized> KeyValueBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        (**self).remove(key)
    }
}

// ============================================================================
// PROCESS-LOCAL MEMORY
// ============================================================================

/// Process-local map owned by a single cache.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw records, metadata included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }
}

// ============================================================================
// SHARED SESSION MEDIUM
// ============================================================================

/// A medium shared between caches for the lifetime of a session.
///
/// Cloning yields another handle to the same storage. An optional quota caps
/// the number of raw records, mirroring the storage limits external media
/// impose; writes of new keys past the quota fail with
/// [`BackendError::QuotaExceeded`]. Overwrites of existing keys always succeed.
#[derive(Debug, Clone, Default)]
pub struct SharedBackend {
    entries: Arc<RwLock<HashMap<String, String>>>,
    quota: Option<usize>,
}

impl SharedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Arc::default(),
            quota: Some(quota),
        }
    }

    pub fn quota(&self) -> Option<usize> {
        self.quota
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw keys currently stored under `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .read()
            .map(|e| {
                e.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl KeyValueBackend for SharedBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let entries = self.entries.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        if let Some(limit) = self.quota {
            if !entries.contains_key(key) && entries.len() >= limit {
                return Err(BackendError::QuotaExceeded {
                    key: key.to_string(),
                    limit,
                });
            }
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut entries = self.entries.write().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        assert!(backend.get("a").unwrap().is_none());
        backend.set("a", "1".to_string()).unwrap();
        assert_eq!(backend.get("a").unwrap().as_deref(), Some("1"));
        assert!(backend.remove("a").unwrap());
        assert!(!backend.remove("a").unwrap());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_shared_backend_handles_share_storage() {
        let first = SharedBackend::new();
        let second = first.clone();
        first.set("k", "v".to_string()).unwrap();
        assert_eq!(second.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_shared_backend_quota() {
        let backend = SharedBackend::with_quota(2);
        backend.set("a", "1".to_string()).unwrap();
        backend.set("b", "2".to_string()).unwrap();
        // Overwrite is fine at the limit.
        backend.set("a", "3".to_string()).unwrap();

        let err = backend.set("c", "4".to_string()).unwrap_err();
        assert_eq!(
            err,
            BackendError::QuotaExceeded {
                key: "c".to_string(),
                limit: 2
            }
        );
    }

    #[test]
    fn test_keys_with_prefix() {
        let backend = SharedBackend::new();
        backend.set("one\tcount", "1".to_string()).unwrap();
        backend.set("two\tcount", "1".to_string()).unwrap();
        assert_eq!(backend.keys_with_prefix("one\t"), vec!["one\tcount".to_string()]);
    }

    #[test]
    fn test_arc_backend_delegates() {
        let backend: Arc<dyn KeyValueBackend> = Arc::new(MemoryBackend::new());
        backend.set("x", "y".to_string()).unwrap();
        assert_eq!(KeyValueBackend::get(&backend, "x").unwrap().as_deref(), Some("y"));
    }
}
