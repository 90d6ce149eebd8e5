//! Memoized cache factory.
//!
//! Three flavors of medium are available, matching where a host may want its
//! cached data to live:
//! - `document`: a private in-process map per cache
//! - `local`: a host-supplied persistent medium (e.g. [`crate::LmdbBackend`])
//! - `session`: a medium shared by every session cache of this registry
//!
//! Asking for the same name and flavor twice returns the same instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tandem_core::{BackendError, BackendKind, CacheConfig, CacheError, TandemResult};

use crate::backend::{KeyValueBackend, MemoryBackend, SharedBackend};
use crate::lru::Cache;

type CacheMap<V> = HashMap<(BackendKind, String), Arc<Cache<V>>>;

pub struct CacheRegistry<V = Value> {
    local: Option<Arc<dyn KeyValueBackend>>,
    session: Arc<dyn KeyValueBackend>,
    caches: Mutex<CacheMap<V>>,
}

impl<V> Default for CacheRegistry<V> {
    fn default() -> Self {
        Self {
            local: None,
            session: Arc::new(SharedBackend::new()),
            caches: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> CacheRegistry<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Registry with a fresh session medium and no persistent medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the medium used by [`CacheRegistry::local`].
    pub fn with_local(mut self, backend: Arc<dyn KeyValueBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    /// Replace the medium used by [`CacheRegistry::session`].
    pub fn with_session(mut self, backend: Arc<dyn KeyValueBackend>) -> Self {
        self.session = backend;
        self
    }

    pub fn document(&self, name: &str) -> TandemResult<Arc<Cache<V>>> {
        self.open(&CacheConfig::new(name).with_backend(BackendKind::Memory))
    }

    pub fn local(&self, name: &str) -> TandemResult<Arc<Cache<V>>> {
        self.open(&CacheConfig::new(name).with_backend(BackendKind::Local))
    }

    pub fn session(&self, name: &str) -> TandemResult<Arc<Cache<V>>> {
        self.open(&CacheConfig::new(name).with_backend(BackendKind::Session))
    }

    /// Return the cache for `(config.backend, config.name)`, creating it on
    /// first use.
    ///
    /// `max_size` only applies on creation; later calls get the existing
    /// instance unchanged.
    pub fn open(&self, config: &CacheConfig) -> TandemResult<Arc<Cache<V>>> {
        let mut caches = self.caches.lock().map_err(|_| CacheError::LockPoisoned)?;
        let slot = (config.backend, config.name.clone());
        if let Some(cache) = caches.get(&slot) {
            return Ok(Arc::clone(cache));
        }

        let backend: Arc<dyn KeyValueBackend> = match config.backend {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            BackendKind::Local => match &self.local {
                Some(local) => Arc::clone(local),
                None => {
                    return Err(BackendError::Unavailable {
                        reason: "no local medium attached to this registry".to_string(),
                    }
                    .into())
                }
            },
            BackendKind::Session => Arc::clone(&self.session),
        };

        let cache = Arc::new(Cache::new(config, backend)?);
        tracing::debug!(
            cache = %config.name,
            backend = ?config.backend,
            max_size = config.max_size,
            "Opened cache"
        );
        caches.insert(slot, Arc::clone(&cache));
        Ok(cache)
    }
}

impl<V> std::fmt::Debug for CacheRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("has_local", &self.local.is_some())
            .finish_non_exhaustive()
    }
}
