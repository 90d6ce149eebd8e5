//! Bounded LRU cache over an opaque key-value medium.
//!
//! Entries form a doubly linked list ordered by recency of touch. The links
//! live inside the stored records (`prev`/`next` are keys, not pointers) and
//! the list endpoints and entry count are stored as metadata records in the
//! same medium, so a cache on a persistent backend is fully self-describing.
//!
//! ```text
//! earliest ──► [a] ⇄ [b] ⇄ [c] ◄── latest        count = 3
//! ```
//!
//! Record layout in the backend:
//! - `"{name}\t{meta}"` for `earliest`, `latest`, `count`
//! - `"{name}\t\t{key}"` for entries, holding `{ value, prev, next }`
//!
//! A mutation spans several backend writes. Each one is journaled with the
//! record's previous contents, and a failed mutation replays the journal in
//! reverse, so an error leaves the namespace as it was before the call.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_core::{canonical_key, CacheConfig, CacheError, TandemResult};

use crate::backend::{KeyValueBackend, MemoryBackend};
use crate::stats::CacheStats;

const META_EARLIEST: &str = "earliest";
const META_LATEST: &str = "latest";
const META_COUNT: &str = "count";

/// Whether an access marks the entry as most recently used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessOptions {
    pub skip_touch: bool,
}

impl AccessOptions {
    /// Access without changing recency order.
    pub fn skip_touch() -> Self {
        Self { skip_touch: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryRecord {
    value: Value,
    prev: Option<String>,
    next: Option<String>,
}

/// Typed view over the raw records of one cache namespace.
struct Records<'a> {
    name: &'a str,
    backend: &'a dyn KeyValueBackend,
    /// Previous contents of every raw key written so far, first write only.
    undo: RefCell<Vec<(String, Option<String>)>>,
}

impl Records<'_> {
    fn journal(&self, raw_key: &str) -> TandemResult<()> {
        if self.undo.borrow().iter().any(|(key, _)| key == raw_key) {
            return Ok(());
        }
        let previous = self.backend.get(raw_key)?;
        self.undo.borrow_mut().push((raw_key.to_string(), previous));
        Ok(())
    }

    fn write(&self, raw_key: &str, raw: String) -> TandemResult<()> {
        self.journal(raw_key)?;
        self.backend.set(raw_key, raw)?;
        Ok(())
    }

    fn erase(&self, raw_key: &str) -> TandemResult<bool> {
        self.journal(raw_key)?;
        Ok(self.backend.remove(raw_key)?)
    }

    /// Restore every journaled record, newest first.
    fn rollback(&self) {
        let undo = self.undo.take();
        for (raw_key, previous) in undo.into_iter().rev() {
            let restored = match previous {
                Some(raw) => self.backend.set(&raw_key, raw),
                None => self.backend.remove(&raw_key).map(|_| ()),
            };
            if let Err(e) = restored {
                tracing::warn!(cache = %self.name, key = %raw_key, error = %e, "Failed to roll back cache record");
            }
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}\t\t{}", self.name, key)
    }

    fn meta_key(&self, meta: &str) -> String {
        format!("{}\t{}", self.name, meta)
    }

    fn entry(&self, key: &str) -> TandemResult<Option<EntryRecord>> {
        let raw = match self.backend.get(&self.entry_key(key))? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let record = serde_json::from_str(&raw).map_err(|e| CacheError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(record))
    }

    /// Like [`Records::entry`], but a missing record is a broken link.
    fn linked_entry(&self, key: &str) -> TandemResult<EntryRecord> {
        self.entry(key)?.ok_or_else(|| {
            CacheError::CorruptLink {
                key: key.to_string(),
            }
            .into()
        })
    }

    fn put_entry(&self, key: &str, record: &EntryRecord) -> TandemResult<()> {
        let raw = serde_json::to_string(record).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        self.write(&self.entry_key(key), raw)
    }

    fn delete_entry(&self, key: &str) -> TandemResult<bool> {
        self.erase(&self.entry_key(key))
    }

    fn pointer(&self, meta: &str) -> TandemResult<Option<String>> {
        let raw = match self.backend.get(&self.meta_key(meta))? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let key: String = serde_json::from_str(&raw).map_err(|e| CacheError::Deserialization {
            key: self.meta_key(meta),
            reason: e.to_string(),
        })?;
        Ok(Some(key))
    }

    fn set_pointer(&self, meta: &str, key: Option<&str>) -> TandemResult<()> {
        match key {
            Some(key) => {
                let raw = Value::String(key.to_string()).to_string();
                self.write(&self.meta_key(meta), raw)?;
            }
            None => {
                self.erase(&self.meta_key(meta))?;
            }
        }
        Ok(())
    }

    fn count(&self) -> TandemResult<usize> {
        let raw = match self.backend.get(&self.meta_key(META_COUNT))? {
            Some(raw) => raw,
            None => return Ok(0),
        };
        raw.parse().map_err(|_| {
            CacheError::Deserialization {
                key: self.meta_key(META_COUNT),
                reason: format!("not a count: {raw}"),
            }
            .into()
        })
    }

    fn set_count(&self, count: usize) -> TandemResult<()> {
        self.write(&self.meta_key(META_COUNT), count.to_string())
    }

    /// Append `record` at the tail, overwriting its links.
    fn link_latest(&self, key: &str, mut record: EntryRecord) -> TandemResult<()> {
        let latest = self.pointer(META_LATEST)?;
        record.prev = latest.clone();
        record.next = None;
        self.put_entry(key, &record)?;

        match latest {
            Some(prev_key) => {
                let mut prev = self.linked_entry(&prev_key)?;
                prev.next = Some(key.to_string());
                self.put_entry(&prev_key, &prev)?;
            }
            None => self.set_pointer(META_EARLIEST, Some(key))?,
        }
        self.set_pointer(META_LATEST, Some(key))
    }

    /// Detach `record` from its neighbours, repairing endpoints.
    fn unlink(&self, record: &EntryRecord) -> TandemResult<()> {
        match &record.prev {
            Some(prev_key) => {
                let mut prev = self.linked_entry(prev_key)?;
                prev.next = record.next.clone();
                self.put_entry(prev_key, &prev)?;
            }
            None => self.set_pointer(META_EARLIEST, record.next.as_deref())?,
        }
        match &record.next {
            Some(next_key) => {
                let mut next = self.linked_entry(next_key)?;
                next.prev = record.prev.clone();
                self.put_entry(next_key, &next)?;
            }
            None => self.set_pointer(META_LATEST, record.prev.as_deref())?,
        }
        Ok(())
    }

    /// Move an existing entry to the tail unless it is already there.
    fn touch(&self, key: &str, record: EntryRecord) -> TandemResult<()> {
        if record.next.is_none() {
            return Ok(());
        }
        self.unlink(&record)?;
        self.link_latest(key, record)
    }

    fn remove(&self, key: &str) -> TandemResult<bool> {
        let record = match self.entry(key)? {
            Some(record) => record,
            None => return Ok(false),
        };
        self.unlink(&record)?;
        self.delete_entry(key)?;
        let count = self.count()?;
        self.set_count(count.saturating_sub(1))?;
        Ok(true)
    }
}

/// Bounded LRU cache with a pluggable backend.
///
/// All mutations on one instance are serialized by an internal mutex; the
/// backend is only touched while that mutex is held.
///
/// # Example
///
/// ```ignore
/// let cache: Cache<u32> = Cache::in_memory("scores", 2)?;
/// cache.set("a", &1)?;
/// cache.set("b", &2)?;
/// cache.get("a")?;        // a is now most recently used
/// cache.set("c", &3)?;    // evicts b
/// assert!(cache.get("b")?.is_none());
/// ```
pub struct Cache<V = Value> {
    name: String,
    max_size: usize,
    backend: Arc<dyn KeyValueBackend>,
    stats: Mutex<CacheStats>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Cache<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Create a cache over `backend`, namespaced by `config.name`.
    ///
    /// Existing records under that namespace are adopted as-is, so reopening a
    /// persistent medium restores the previous contents and recency order.
    pub fn new(config: &CacheConfig, backend: Arc<dyn KeyValueBackend>) -> TandemResult<Self> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            max_size: config.max_size,
            backend,
            stats: Mutex::new(CacheStats::default()),
            _value: PhantomData,
        })
    }

    /// Create a cache over a fresh process-local map.
    pub fn in_memory(name: impl Into<String>, max_size: usize) -> TandemResult<Self> {
        let config = CacheConfig::new(name).with_max_size(max_size);
        Self::new(&config, Arc::new(MemoryBackend::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> TandemResult<MutexGuard<'_, CacheStats>> {
        Ok(self.stats.lock().map_err(|_| CacheError::LockPoisoned)?)
    }

    fn records(&self) -> Records<'_> {
        Records {
            name: &self.name,
            backend: self.backend.as_ref(),
            undo: RefCell::new(Vec::new()),
        }
    }

    /// Run a mutation, undoing its writes if any step fails.
    fn mutate<T>(
        &self,
        mutation: impl FnOnce(&Records<'_>) -> TandemResult<T>,
    ) -> TandemResult<T> {
        let records = self.records();
        let result = mutation(&records);
        if let Err(e) = &result {
            tracing::debug!(cache = %self.name, error = %e, "Rolling back failed cache mutation");
            records.rollback();
        }
        result
    }

    /// Insert or overwrite `key`, marking it most recently used.
    ///
    /// Returns whether an entry already existed.
    pub fn set<K: Serialize + ?Sized>(&self, key: &K, value: &V) -> TandemResult<bool> {
        self.set_with(key, value, AccessOptions::default())
    }

    /// Insert or overwrite `key`.
    ///
    /// With `skip_touch`, an existing entry keeps its position; a new entry is
    /// still appended at the tail so the list stays complete. When the insert
    /// pushes the count past `max_size`, the earliest entries are evicted.
    pub fn set_with<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: &V,
        options: AccessOptions,
    ) -> TandemResult<bool> {
        let key = canonical_key(key)?;
        let value = serde_json::to_value(value).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let mut stats = self.lock()?;
        let (existed, evicted) = self.mutate(|records| {
            if let Some(mut existing) = records.entry(&key)? {
                existing.value = value;
                if options.skip_touch || existing.next.is_none() {
                    records.put_entry(&key, &existing)?;
                } else {
                    records.unlink(&existing)?;
                    records.link_latest(&key, existing)?;
                }
                return Ok((true, 0));
            }

            records.link_latest(
                &key,
                EntryRecord {
                    value,
                    prev: None,
                    next: None,
                },
            )?;
            let mut count = records.count()? + 1;
            records.set_count(count)?;

            let mut evicted: u64 = 0;
            while count > self.max_size {
                let earliest = match records.pointer(META_EARLIEST)? {
                    Some(earliest) => earliest,
                    None => break,
                };
                tracing::debug!(cache = %self.name, key = %earliest, "Evicting least recently used entry");
                records.remove(&earliest)?;
                evicted += 1;
                count -= 1;
            }
            Ok((false, evicted))
        })?;

        stats.evictions += evicted;
        Ok(existed)
    }

    /// Look up `key`, marking it most recently used.
    pub fn get<K: Serialize + ?Sized>(&self, key: &K) -> TandemResult<Option<V>> {
        self.get_with(key, AccessOptions::default())
    }

    /// Look up `key` without changing recency order.
    pub fn peek<K: Serialize + ?Sized>(&self, key: &K) -> TandemResult<Option<V>> {
        self.get_with(key, AccessOptions::skip_touch())
    }

    pub fn get_with<K: Serialize + ?Sized>(
        &self,
        key: &K,
        options: AccessOptions,
    ) -> TandemResult<Option<V>> {
        self.lookup(key, options, |_| true)
    }

    /// Look up `key`, serving it only if `accept` approves the stored value.
    ///
    /// A rejected entry counts as a miss and keeps its position.
    pub fn get_if<K: Serialize + ?Sized>(
        &self,
        key: &K,
        accept: impl FnOnce(&V) -> bool,
    ) -> TandemResult<Option<V>> {
        self.lookup(key, AccessOptions::default(), accept)
    }

    fn lookup<K: Serialize + ?Sized>(
        &self,
        key: &K,
        options: AccessOptions,
        accept: impl FnOnce(&V) -> bool,
    ) -> TandemResult<Option<V>> {
        let key = canonical_key(key)?;
        let mut stats = self.lock()?;
        let record = match self.records().entry(&key)? {
            Some(record) => record,
            None => {
                stats.misses += 1;
                return Ok(None);
            }
        };

        let value: V = serde_json::from_value(record.value.clone()).map_err(|e| {
            CacheError::Deserialization {
                key: key.clone(),
                reason: e.to_string(),
            }
        })?;
        if !accept(&value) {
            stats.misses += 1;
            return Ok(None);
        }
        stats.hits += 1;

        if !options.skip_touch {
            self.mutate(|records| records.touch(&key, record))?;
        }
        Ok(Some(value))
    }

    /// Whether `key` is present. Never touches the entry.
    pub fn contains<K: Serialize + ?Sized>(&self, key: &K) -> TandemResult<bool> {
        let key = canonical_key(key)?;
        let _guard = self.lock()?;
        Ok(self.records().entry(&key)?.is_some())
    }

    /// Remove `key`. Returns whether an entry was removed.
    pub fn remove<K: Serialize + ?Sized>(&self, key: &K) -> TandemResult<bool> {
        let key = canonical_key(key)?;
        let _guard = self.lock()?;
        self.mutate(|records| records.remove(&key))
    }

    /// Remove every entry by walking the list from the earliest entry.
    ///
    /// Works on media that cannot enumerate their keys.
    pub fn clear(&self) -> TandemResult<()> {
        let _guard = self.lock()?;
        let removed = self.mutate(|records| {
            let mut cursor = records.pointer(META_EARLIEST)?;
            let mut removed = 0usize;
            while let Some(key) = cursor {
                let record = match records.entry(&key)? {
                    Some(record) => record,
                    None => break,
                };
                records.delete_entry(&key)?;
                removed += 1;
                cursor = record.next;
            }

            records.set_pointer(META_EARLIEST, None)?;
            records.set_pointer(META_LATEST, None)?;
            records.set_count(0)?;
            Ok(removed)
        })?;
        tracing::debug!(cache = %self.name, removed, "Cleared cache");
        Ok(())
    }

    /// Key of the least recently touched entry.
    pub fn earliest(&self) -> TandemResult<Option<String>> {
        let _guard = self.lock()?;
        self.records().pointer(META_EARLIEST)
    }

    /// Key of the most recently touched entry.
    pub fn latest(&self) -> TandemResult<Option<String>> {
        let _guard = self.lock()?;
        self.records().pointer(META_LATEST)
    }

    /// Number of live entries.
    pub fn count(&self) -> TandemResult<usize> {
        let _guard = self.lock()?;
        self.records().count()
    }

    /// Keys from earliest to latest.
    ///
    /// Fails with [`CacheError::CorruptLink`] if the walk does not end at the
    /// recorded latest entry after exactly `count` steps.
    pub fn keys(&self) -> TandemResult<Vec<String>> {
        let _guard = self.lock()?;
        let records = self.records();
        let count = records.count()?;

        let mut keys = Vec::with_capacity(count);
        let mut cursor = records.pointer(META_EARLIEST)?;
        while let Some(key) = cursor {
            if keys.len() == count {
                return Err(CacheError::CorruptLink { key }.into());
            }
            let record = records.linked_entry(&key)?;
            cursor = record.next;
            keys.push(key);
        }

        if keys.len() != count || keys.last() != records.pointer(META_LATEST)?.as_ref() {
            let key = keys.last().cloned().unwrap_or_default();
            return Err(CacheError::CorruptLink { key }.into());
        }
        Ok(keys)
    }

    /// Access statistics for this instance.
    pub fn stats(&self) -> TandemResult<CacheStats> {
        let stats = self.lock()?;
        let mut snapshot = stats.clone();
        snapshot.entry_count = self.records().count()? as u64;
        Ok(snapshot)
    }
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SharedBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tandem_core::{BackendError, TandemError};

    fn cache(max_size: usize) -> Cache<u32> {
        Cache::in_memory("test", max_size).expect("cache creation should succeed")
    }

    #[test]
    fn test_set_and_get() {
        let cache = cache(4);
        assert!(!cache.set("a", &1).unwrap());
        assert_eq!(cache.get("a").unwrap(), Some(1));
        assert_eq!(cache.count().unwrap(), 1);
    }

    #[test]
    fn test_overwrite_does_not_increment_count() {
        let cache = cache(4);
        cache.set("a", &1).unwrap();
        assert!(cache.set("a", &2).unwrap());
        assert_eq!(cache.count().unwrap(), 1);
        assert_eq!(cache.get("a").unwrap(), Some(2));
    }

    #[test]
    fn test_lru_eviction_respects_touch() {
        let cache = cache(2);
        cache.set("A", &1).unwrap();
        cache.set("B", &2).unwrap();
        cache.get("A").unwrap();
        cache.set("C", &3).unwrap();

        assert!(cache.peek("B").unwrap().is_none());
        assert_eq!(cache.peek("A").unwrap(), Some(1));
        assert_eq!(cache.peek("C").unwrap(), Some(3));
        assert_eq!(cache.keys().unwrap(), vec!["A", "C"]);
        assert_eq!(cache.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_skip_touch_get_keeps_order() {
        let cache = cache(2);
        cache.set("A", &1).unwrap();
        cache.set("B", &2).unwrap();
        cache.peek("A").unwrap();
        cache.set("C", &3).unwrap();
        assert!(cache.peek("A").unwrap().is_none());
        assert_eq!(cache.keys().unwrap(), vec!["B", "C"]);
    }

    #[test]
    fn test_skip_touch_set_keeps_position() {
        let cache = cache(3);
        cache.set("A", &1).unwrap();
        cache.set("B", &2).unwrap();
        cache
            .set_with("A", &10, AccessOptions::skip_touch())
            .unwrap();
        assert_eq!(cache.keys().unwrap(), vec!["A", "B"]);
        assert_eq!(cache.peek("A").unwrap(), Some(10));
    }

    #[test]
    fn test_skip_touch_set_of_new_key_is_linked_and_counted() {
        let cache = cache(3);
        cache.set("A", &1).unwrap();
        cache
            .set_with("B", &2, AccessOptions::skip_touch())
            .unwrap();
        assert_eq!(cache.count().unwrap(), 2);
        assert_eq!(cache.keys().unwrap(), vec!["A", "B"]);
    }

    #[test]
    fn test_remove_repairs_links() {
        let cache = cache(5);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            cache.set(k, &v).unwrap();
        }

        assert!(cache.remove("b").unwrap());
        assert_eq!(cache.keys().unwrap(), vec!["a", "c"]);

        assert!(cache.remove("a").unwrap());
        assert_eq!(cache.earliest().unwrap().as_deref(), Some("c"));

        assert!(cache.remove("c").unwrap());
        assert!(cache.earliest().unwrap().is_none());
        assert!(cache.latest().unwrap().is_none());
        assert_eq!(cache.count().unwrap(), 0);

        assert!(!cache.remove("c").unwrap());
    }

    #[test]
    fn test_get_touch_moves_middle_entry_to_tail() {
        let cache = cache(5);
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            cache.set(k, &v).unwrap();
        }
        cache.get("b").unwrap();
        assert_eq!(cache.keys().unwrap(), vec!["a", "c", "b"]);
        cache.get("a").unwrap();
        assert_eq!(cache.keys().unwrap(), vec!["c", "b", "a"]);
        assert_eq!(cache.latest().unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_clear_deletes_every_record() {
        let backend = Arc::new(SharedBackend::new());
        let config = CacheConfig::new("clearable").with_max_size(10);
        let cache: Cache<u32> = Cache::new(&config, backend.clone()).unwrap();
        for i in 0..5u32 {
            cache.set(&i, &i).unwrap();
        }
        cache.clear().unwrap();

        assert_eq!(cache.count().unwrap(), 0);
        assert!(cache.keys().unwrap().is_empty());
        // Only the zeroed count record remains.
        assert_eq!(backend.keys_with_prefix("clearable\t"), vec!["clearable\tcount"]);
    }

    #[test]
    fn test_structured_keys_collide() {
        let cache: Cache<String> = Cache::in_memory("structured", 4).unwrap();
        cache.set(&("user", 7), &"seven".to_string()).unwrap();
        assert_eq!(
            cache.get(&serde_json::json!(["user", 7])).unwrap().as_deref(),
            Some("seven")
        );
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let medium = Arc::new(SharedBackend::new());
        let first: Cache<u32> =
            Cache::new(&CacheConfig::new("first"), medium.clone()).unwrap();
        let second: Cache<u32> = Cache::new(&CacheConfig::new("second"), medium).unwrap();
        first.set("k", &1).unwrap();
        second.set("k", &2).unwrap();
        assert_eq!(first.get("k").unwrap(), Some(1));
        assert_eq!(second.get("k").unwrap(), Some(2));
    }

    #[test]
    fn test_backend_quota_surfaces_from_set() {
        // One entry plus its three metadata records.
        let medium = Arc::new(SharedBackend::with_quota(4));
        let cache: Cache<u32> = Cache::new(&CacheConfig::new("q"), medium).unwrap();
        cache.set("a", &1).unwrap();
        let err = cache.set("b", &2).unwrap_err();
        assert!(matches!(
            err,
            TandemError::Backend(BackendError::QuotaExceeded { .. })
        ));
        // The failing key never became visible.
        assert_eq!(cache.keys().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_failed_first_insert_leaves_empty_cache() {
        let medium = Arc::new(SharedBackend::with_quota(1));
        let cache: Cache<u32> = Cache::new(&CacheConfig::new("q"), medium.clone()).unwrap();
        assert!(cache.set("a", &1).is_err());

        assert_eq!(cache.count().unwrap(), 0);
        assert!(cache.keys().unwrap().is_empty());
        assert!(cache.earliest().unwrap().is_none());
        assert!(cache.get("a").unwrap().is_none());
        assert!(medium.is_empty());
    }

    /// Medium that fails exactly one write (set or remove), counted from
    /// the last call to `fail_write`.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        writes: AtomicUsize,
        fail_at: AtomicUsize,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                fail_at: AtomicUsize::new(usize::MAX),
                ..Self::default()
            }
        }

        fn fail_write(&self, n: usize) {
            self.writes.store(0, Ordering::SeqCst);
            self.fail_at.store(n, Ordering::SeqCst);
        }

        fn step(&self, key: &str) -> Result<(), BackendError> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if n == self.fail_at.load(Ordering::SeqCst) {
                return Err(BackendError::Transaction {
                    reason: format!("write {n} to {key} failed"),
                });
            }
            Ok(())
        }
    }

    impl KeyValueBackend for FlakyBackend {
        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: String) -> Result<(), BackendError> {
            self.step(key)?;
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<bool, BackendError> {
            self.step(key)?;
            self.inner.remove(key)
        }
    }

    fn flaky_cache() -> (Arc<FlakyBackend>, Cache<u32>) {
        let medium = Arc::new(FlakyBackend::new());
        let config = CacheConfig::new("flaky").with_max_size(3);
        let cache = Cache::new(&config, medium.clone()).unwrap();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            cache.set(k, &v).unwrap();
        }
        (medium, cache)
    }

    fn assert_unchanged(cache: &Cache<u32>) {
        assert_eq!(cache.keys().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(cache.count().unwrap(), 3);
        assert_eq!(cache.peek("a").unwrap(), Some(1));
        assert_eq!(cache.peek("b").unwrap(), Some(2));
        assert_eq!(cache.peek("c").unwrap(), Some(3));
        assert!(!cache.contains("d").unwrap());
    }

    /// Fail each write of `mutation` in turn; every failure must leave the
    /// cache untouched. Returns the cache after the first clean run.
    fn fail_every_write(mutation: impl Fn(&Cache<u32>) -> TandemResult<bool>) -> Cache<u32> {
        for n in 0.. {
            let (medium, cache) = flaky_cache();
            medium.fail_write(n);
            match mutation(&cache) {
                Err(_) => assert_unchanged(&cache),
                Ok(_) => {
                    assert!(n > 0, "mutation performed no writes");
                    return cache;
                }
            }
        }
        unreachable!()
    }

    #[test]
    fn test_insert_with_eviction_rolls_back_at_every_write() {
        let cache = fail_every_write(|cache| cache.set("d", &4));
        assert_eq!(cache.keys().unwrap(), vec!["b", "c", "d"]);
        assert_eq!(cache.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_touching_overwrite_rolls_back_at_every_write() {
        let cache = fail_every_write(|cache| cache.set("a", &10));
        assert_eq!(cache.keys().unwrap(), vec!["b", "c", "a"]);
        assert_eq!(cache.peek("a").unwrap(), Some(10));
    }

    #[test]
    fn test_remove_rolls_back_at_every_write() {
        let cache = fail_every_write(|cache| cache.remove("b"));
        assert_eq!(cache.keys().unwrap(), vec!["a", "c"]);
        assert_eq!(cache.count().unwrap(), 2);
    }

    #[test]
    fn test_touch_on_get_rolls_back_at_every_write() {
        let cache = fail_every_write(|cache| cache.get("a").map(|v| v.is_some()));
        assert_eq!(cache.keys().unwrap(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let cache = cache(2);
        cache.get("missing").unwrap();
        cache.set("a", &1).unwrap();
        cache.get("a").unwrap();
        cache.get("a").unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_rejected_lookup_counts_as_miss_and_keeps_order() {
        let cache = cache(3);
        cache.set("a", &1).unwrap();
        cache.set("b", &2).unwrap();

        assert!(cache.get_if("a", |v| *v > 5).unwrap().is_none());
        assert_eq!(cache.keys().unwrap(), vec!["a", "b"]);
        assert_eq!(cache.get_if("a", |v| *v == 1).unwrap(), Some(1));
        assert_eq!(cache.keys().unwrap(), vec!["b", "a"]);

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_zero_max_size_rejected() {
        assert!(Cache::<u32>::in_memory("bad", 0).is_err());
    }
}
