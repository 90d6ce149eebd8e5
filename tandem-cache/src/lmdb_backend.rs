//! LMDB-backed persistent medium.
//!
//! Uses the heed crate (Rust bindings for LMDB) to give caches a medium that
//! survives process restarts. Because the cache stores its LRU metadata next
//! to its entries, reopening the same directory restores the full cache,
//! recency order included.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`
//! - One write transaction per `set` / `remove`

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, MdbError};
use tandem_core::BackendError;

use crate::backend::KeyValueBackend;

/// Persistent key-value medium stored in an LMDB environment.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use tandem_cache::{Cache, LmdbBackend};
/// use tandem_core::CacheConfig;
///
/// let medium = Arc::new(LmdbBackend::new("/tmp/tandem", 16)?);
/// let cache: Cache<String> = Cache::new(&CacheConfig::new("users"), medium)?;
/// cache.set("alice", &"online".to_string())?;
/// ```
pub struct LmdbBackend {
    env: Env,
    db: Database<Str, Str>,
    map_size_bytes: usize,
}

impl LmdbBackend {
    /// Open (or create) an LMDB medium in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, BackendError> {
        std::fs::create_dir_all(&path).map_err(|e| BackendError::Unavailable {
            reason: e.to_string(),
        })?;

        let map_size_bytes = max_size_mb * 1024 * 1024;

        // SAFETY: the environment is opened once per directory by this backend
        // and never mapped twice within the process by tandem itself.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_bytes)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| BackendError::Unavailable {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(transaction)?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(transaction)?;
        wtxn.commit().map_err(transaction)?;

        Ok(Self {
            env,
            db,
            map_size_bytes,
        })
    }

    /// Number of raw records, metadata included.
    pub fn len(&self) -> Result<u64, BackendError> {
        let rtxn = self.env.read_txn().map_err(transaction)?;
        self.db.len(&rtxn).map_err(transaction)
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }
}

fn transaction(e: heed::Error) -> BackendError {
    BackendError::Transaction {
        reason: e.to_string(),
    }
}

impl KeyValueBackend for LmdbBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        let rtxn = self.env.read_txn().map_err(transaction)?;
        let value = self.db.get(&rtxn, key).map_err(transaction)?;
        Ok(value.map(str::to_string))
    }

    fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
        let mut wtxn = self.env.write_txn().map_err(transaction)?;

        let written = self
            .db
            .put(&mut wtxn, key, value.as_str())
            .and_then(|()| wtxn.commit());

        match written {
            Ok(()) => Ok(()),
            Err(heed::Error::Mdb(MdbError::MapFull)) => Err(BackendError::QuotaExceeded {
                key: key.to_string(),
                limit: self.map_size_bytes,
            }),
            Err(e) => Err(transaction(e)),
        }
    }

    fn remove(&self, key: &str) -> Result<bool, BackendError> {
        let mut wtxn = self.env.write_txn().map_err(transaction)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(transaction)?;
        wtxn.commit().map_err(transaction)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = LmdbBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[test]
    fn test_set_and_get() {
        let (backend, _temp_dir) = create_test_backend();
        backend
            .set("users\t\talice", "{\"value\":1}".to_string())
            .expect("set should succeed");
        let value = backend.get("users\t\talice").expect("get should succeed");
        assert_eq!(value.as_deref(), Some("{\"value\":1}"));
    }

    #[test]
    fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        assert!(backend.get("missing").expect("get should succeed").is_none());
    }

    #[test]
    fn test_remove() {
        let (backend, _temp_dir) = create_test_backend();
        backend.set("k", "v".to_string()).expect("set should succeed");
        assert!(backend.remove("k").expect("remove should succeed"));
        assert!(!backend.remove("k").expect("remove should succeed"));
        assert!(backend.is_empty().expect("len should succeed"));
    }

    #[test]
    fn test_overwrite() {
        let (backend, _temp_dir) = create_test_backend();
        backend.set("k", "old".to_string()).expect("set should succeed");
        backend.set("k", "new".to_string()).expect("set should succeed");
        assert_eq!(backend.get("k").expect("get should succeed").as_deref(), Some("new"));
        assert_eq!(backend.len().expect("len should succeed"), 1);
    }

    #[test]
    fn test_reopen_preserves_records() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend = LmdbBackend::new(temp_dir.path(), 10).expect("open should succeed");
            backend.set("k", "kept".to_string()).expect("set should succeed");
        }
        let backend = LmdbBackend::new(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(backend.get("k").expect("get should succeed").as_deref(), Some("kept"));
    }
}
