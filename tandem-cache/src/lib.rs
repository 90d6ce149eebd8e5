//! TANDEM Cache - Bounded LRU over Pluggable Media
//!
//! A [`Cache`] keeps at most `max_size` entries and evicts the least recently
//! touched one when that bound is exceeded. Its recency list is stored inside
//! the backend records, so the same code runs over a private map, a shared
//! session medium, or a persistent LMDB environment.

pub mod backend;
pub mod lmdb_backend;
pub mod lru;
pub mod registry;
pub mod stats;

pub use backend::{KeyValueBackend, MemoryBackend, SharedBackend};
pub use lmdb_backend::LmdbBackend;
pub use lru::{AccessOptions, Cache};
pub use registry::CacheRegistry;
pub use stats::CacheStats;
