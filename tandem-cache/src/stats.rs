//! Access statistics.

/// Statistics about one cache instance.
///
/// Counters are per instance and not persisted; `entry_count` is read from the
/// medium when the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found an entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of live entries.
    pub entry_count: u64,
    /// Number of entries dropped to stay within `max_size`.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
