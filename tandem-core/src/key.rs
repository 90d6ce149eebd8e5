//! Key canonicalization.
//!
//! Caches and getters address entries by string. Non-string keys are encoded
//! as JSON so that structurally equal keys collide. `serde_json` objects are
//! backed by an ordered map, so field order in the source value never leaks
//! into the key.

use serde::Serialize;
use serde_json::Value;

use crate::{CacheError, TandemResult};

/// Canonicalize any serializable key into its backend string form.
///
/// Strings pass through untouched; everything else becomes compact JSON.
pub fn canonical_key<K: Serialize + ?Sized>(key: &K) -> TandemResult<String> {
    let value = serde_json::to_value(key).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    Ok(match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Derive the dedup/cache key of a call from its ordered argument list.
///
/// Order-sensitive: `[1, 2]` and `[2, 1]` are different calls.
pub fn call_key(args: &[Value]) -> String {
    Value::Array(args.to_vec()).to_string()
}
