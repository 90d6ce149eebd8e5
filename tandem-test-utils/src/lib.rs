//! TANDEM Test Utilities
//!
//! Shared test infrastructure for the TANDEM workspace:
//! - Recording continuations and invocation counters
//! - Proptest generators for call arguments and slot names
//! - Fixtures for temporary persistent media and tracing output
//! - Assertions on `TandemResult` error variants

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub use tandem_core::{
    json, BackendError, BatchError, CacheError, ConfigError, GetterError, Reply, TandemError,
    TandemResult, Value,
};

// ============================================================================
// RECORDING CONTINUATIONS
// ============================================================================

/// Collects every value delivered to the replies it hands out.
///
/// Clones share the same log, so a recorder can be moved into an operation
/// while the test keeps a handle for assertions.
#[derive(Debug)]
pub struct Recorder<R> {
    seen: Arc<Mutex<Vec<R>>>,
}

impl<R> Clone for Recorder<R> {
    fn clone(&self) -> Self {
        Self {
            seen: Arc::clone(&self.seen),
        }
    }
}

impl<R> Default for Recorder<R> {
    fn default() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<R: Send + 'static> Recorder<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reply that appends its value to this recorder.
    pub fn reply(&self) -> Reply<R> {
        let seen = Arc::clone(&self.seen);
        Reply::new(move |value| {
            if let Ok(mut seen) = seen.lock() {
                seen.push(value);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Clone> Recorder<R> {
    /// Values delivered so far, in delivery order.
    pub fn values(&self) -> Vec<R> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Thread-safe invocation counter for wrapped operations and handlers.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    count: Arc<AtomicUsize>,
}

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation, returning the count before it.
    pub fn hit(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for call arguments and slot names.

    use super::*;
    use proptest::prelude::*;

    /// A scalar JSON argument: null, bool, integer or short string.
    pub fn arb_scalar_arg() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9]{0,8}".prop_map(Value::from),
        ]
    }

    /// A JSON argument, possibly one level of array or object nesting.
    pub fn arb_arg() -> impl Strategy<Value = Value> {
        arb_scalar_arg().prop_recursive(2, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// An ordered argument list for one call.
    pub fn arb_args() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(arb_arg(), 0..4)
    }

    /// A small pool of argument lists, so sequences of calls repeat keys.
    pub fn arb_key_pool() -> impl Strategy<Value = Vec<Vec<Value>>> {
        prop::collection::vec(arb_args(), 1..4)
    }

    /// A slot name for a pipe.
    pub fn arb_slot_name() -> impl Strategy<Value = String> {
        "[a-e]"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use tandem_cache::LmdbBackend;
    use tempfile::TempDir;

    /// Install a fmt subscriber filtered by `RUST_LOG` (default `warn`).
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_tracing() {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    /// An LMDB medium in a fresh temporary directory.
    ///
    /// Keep the returned `TempDir` alive for as long as the backend is used.
    pub fn temp_lmdb_backend() -> (Arc<LmdbBackend>, TempDir) {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let backend = LmdbBackend::new(dir.path(), 10).expect("LMDB backend should open");
        (Arc::new(backend), dir)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on `TandemResult` error variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TandemResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_getter_error<T: std::fmt::Debug>(result: &TandemResult<T>, expected: GetterError) {
        match result {
            Err(TandemError::Getter(err)) => assert_eq!(*err, expected),
            other => panic!("Expected Getter error {:?}, got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_quota_exceeded<T: std::fmt::Debug>(result: &TandemResult<T>) {
        match result {
            Err(TandemError::Backend(BackendError::QuotaExceeded { .. })) => {}
            other => panic!("Expected QuotaExceeded, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
