//! TANDEM Core - Shared Types for the Coordination Layer
//!
//! Types every coordination primitive depends on:
//! - Error taxonomy and the [`TandemResult`] alias
//! - Key canonicalization for caches and call deduplication
//! - [`Reply`], the single-use continuation handle
//! - Declarative configuration loaded from TOML

pub mod config;
pub mod error;
pub mod key;
pub mod reply;

pub use config::{BackendKind, BatcherConfig, CacheConfig, GetterConfig, TandemConfig};
pub use error::{
    BackendError, BatchError, CacheError, ConfigError, GetterError, TandemError, TandemResult,
};
pub use key::{call_key, canonical_key};
pub use reply::Reply;

/// Re-exported so hosts can build call arguments without a direct dependency.
pub use serde_json::{json, Value};
