//! Deduplicating, caching, throttled wrapper around a producing operation.
//!
//! Each call is keyed by its ordered argument list. Per key, the getter
//! guarantees at most one in-flight underlying operation:
//!
//! 1. a cached result at a position the caller listens on is delivered
//!    synchronously ([`CallStatus::Cached`])
//! 2. a call whose key is already in flight joins that wave
//!    ([`CallStatus::Coalesced`])
//! 3. otherwise a new wave starts, either immediately
//!    ([`CallStatus::Started`]) or behind the throttle
//!    ([`CallStatus::Throttled`])
//!
//! When any reply position of the leading call first fires, the result is
//! cached, the wave is detached from the waiting table, every caller receives
//! the value at that same position (leader first, then joiners in arrival
//! order) and the throttle is released. Detaching happens before any
//! continuation runs, so a same-key call issued from inside a continuation
//! starts a fresh wave or hits the cache.
//!
//! If the operation drops every reply of a wave without sending, the wave is
//! abandoned: the key leaves the waiting table, the joiners' replies are
//! dropped (closing any [`Getter::fetch`] channels) and the throttle is
//! released. The next call with that key starts a fresh wave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_batch::Batcher;
use tandem_cache::Cache;
use tandem_core::{call_key, GetterConfig, GetterError, Reply, TandemResult};
use uuid::Uuid;

use crate::throttle::{Throttle, ThrottleRegistry};

/// Arguments and reply positions handed to the underlying operation.
#[derive(Debug)]
pub struct Call<R> {
    pub args: Vec<Value>,
    pub replies: Vec<Reply<R>>,
}

/// The producing operation a getter wraps.
///
/// The operation must eventually send on (at least) one of the call's reply
/// positions exactly once per logical call. Failures are ordinary values of
/// `R` (for example `Result<T, E>`); the getter caches and fans them out like
/// any other result.
pub trait Operation<R>: Send + Sync + 'static {
    fn start(&self, call: Call<R>);
}

impl<R, F> Operation<R> for F
where
    F: Fn(Call<R>) + Send + Sync + 'static,
{
    fn start(&self, call: Call<R>) {
        self(call)
    }
}

/// How a call was handled. The numeric codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallStatus {
    /// Served from cache; no operation ran.
    Cached = 0,
    /// Queued behind the throttle.
    Throttled = 1,
    /// Underlying operation started.
    Started = 2,
    /// Joined an in-flight call with the same key.
    Coalesced = 3,
}

impl CallStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// What the getter stores in its cache: the reply position that fired and
/// the value delivered there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReply<R> {
    pub position: usize,
    pub payload: R,
}

type Waiters<R> = Vec<Vec<Reply<R>>>;

struct Inner<R> {
    operation: Box<dyn Operation<R>>,
    cache: Option<Arc<Cache<CachedReply<R>>>>,
    throttle: Option<Throttle>,
    waiting: Mutex<HashMap<String, Waiters<R>>>,
}

impl<R> Inner<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    fn waiting(&self) -> TandemResult<MutexGuard<'_, HashMap<String, Waiters<R>>>> {
        Ok(self.waiting.lock().map_err(|_| GetterError::LockPoisoned)?)
    }

    /// Runs once per wave, on the first reply position to fire.
    fn complete(&self, key: &str, position: usize, value: R, leader: Reply<R>) {
        if let Some(cache) = &self.cache {
            let entry = CachedReply {
                position,
                payload: value.clone(),
            };
            if let Err(e) = cache.set(key, &entry) {
                tracing::warn!(error = %e, key, "Failed to cache getter result");
            }
        }

        let joiners = match self.waiting.lock() {
            Ok(mut waiting) => waiting.remove(key).unwrap_or_default(),
            Err(_) => {
                tracing::warn!(key, "Getter lock poisoned, joiners not served");
                Vec::new()
            }
        };

        tracing::trace!(key, position, joiners = joiners.len(), "Delivering result");
        leader.send(value.clone());
        for replies in joiners {
            if let Some(reply) = replies.into_iter().nth(position) {
                reply.send(value.clone());
            }
        }

        if let Some(throttle) = &self.throttle {
            if let Err(e) = throttle.release() {
                tracing::warn!(error = %e, key, "Failed to release throttle");
            }
        }
    }
}

impl<R> Inner<R> {
    fn abandon(&self, key: &str) {
        let joiners = match self.waiting.lock() {
            Ok(mut waiting) => waiting.remove(key).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        tracing::debug!(key, joiners = joiners.len(), "Wave abandoned without a result");
        // Dropped outside the lock: a joiner's reply may belong to this getter.
        drop(joiners);

        if let Some(throttle) = &self.throttle {
            if let Err(e) = throttle.release() {
                tracing::warn!(error = %e, key, "Failed to release throttle");
            }
        }
    }
}

/// Held by every wrapped reply of one wave.
struct Wave<R> {
    inner: Arc<Inner<R>>,
    key: String,
    fired: AtomicBool,
}

impl<R> Drop for Wave<R> {
    fn drop(&mut self) {
        if !*self.fired.get_mut() {
            self.inner.abandon(&self.key);
        }
    }
}

/// Wraps an [`Operation`] with per-key dedup, caching and throttling.
///
/// Cloning yields another handle onto the same waiting table.
pub struct Getter<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for Getter<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for Getter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Getter")
            .field("cache", &self.inner.cache)
            .field("throttle", &self.inner.throttle)
            .finish_non_exhaustive()
    }
}

impl<R> Getter<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Wrap `operation` using `config`, resolving named throttles through the
    /// process-wide registry.
    pub fn new(operation: impl Operation<R>, config: GetterConfig) -> TandemResult<Self> {
        Self::builder(operation).config(config).build()
    }

    pub fn builder(operation: impl Operation<R>) -> GetterBuilder<R> {
        GetterBuilder {
            operation: Box::new(operation),
            config: GetterConfig::default(),
            cache: None,
            throttle: None,
        }
    }

    /// A getter whose underlying operation queues into `batcher`.
    pub fn from_batcher(batcher: Batcher<R>, config: GetterConfig) -> TandemResult<Self> {
        Self::new(
            move |call: Call<R>| {
                if let Err(e) = batcher.call(call.args, call.replies) {
                    tracing::warn!(error = %e, "Batcher rejected getter call");
                }
            },
            config,
        )
    }

    /// Issue a call.
    ///
    /// A call with no replies gets a no-op reply so the wave still completes
    /// through position 0.
    pub fn call(&self, args: Vec<Value>, mut replies: Vec<Reply<R>>) -> TandemResult<CallStatus> {
        if replies.is_empty() {
            replies.push(Reply::noop());
        }
        let key = call_key(&args);

        if let Some(cache) = &self.inner.cache {
            let positions = replies.len();
            if let Some(hit) = cache.get_if(&key, |hit| hit.position < positions)? {
                tracing::trace!(key = %key, "Getter cache hit");
                if let Some(reply) = replies.into_iter().nth(hit.position) {
                    reply.send(hit.payload);
                }
                return Ok(CallStatus::Cached);
            }
        }

        {
            let mut waiting = self.inner.waiting()?;
            if let Some(joiners) = waiting.get_mut(&key) {
                joiners.push(replies);
                tracing::trace!(key = %key, "Coalesced into in-flight call");
                return Ok(CallStatus::Coalesced);
            }
            waiting.insert(key.clone(), Vec::new());
        }

        let call = Call {
            args,
            replies: self.wrap_replies(&key, replies),
        };

        match &self.inner.throttle {
            Some(throttle) => {
                let inner = Arc::clone(&self.inner);
                let started = throttle.try_run(move || inner.operation.start(call))?;
                let status = if started {
                    CallStatus::Started
                } else {
                    CallStatus::Throttled
                };
                tracing::trace!(key = %key, status = ?status, "Getter call dispatched");
                Ok(status)
            }
            None => {
                tracing::trace!(key = %key, "Getter call started");
                self.inner.operation.start(call);
                Ok(CallStatus::Started)
            }
        }
    }

    fn wrap_replies(&self, key: &str, replies: Vec<Reply<R>>) -> Vec<Reply<R>> {
        let wave = Arc::new(Wave {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            fired: AtomicBool::new(false),
        });
        replies
            .into_iter()
            .enumerate()
            .map(|(position, own)| {
                let wave = Arc::clone(&wave);
                Reply::new(move |value: R| {
                    if wave.fired.swap(true, Ordering::SeqCst) {
                        // Wave already completed through another position.
                        own.send(value);
                    } else {
                        wave.inner.complete(&wave.key, position, value, own);
                    }
                })
            })
            .collect()
    }

    /// Drop the cached result for `args`. Returns whether one was present.
    pub fn forget(&self, args: &[Value]) -> TandemResult<bool> {
        match &self.inner.cache {
            Some(cache) => cache.remove(&call_key(args)),
            None => Ok(false),
        }
    }

    /// Issue a call and await the value delivered at position 0.
    ///
    /// Resolves to [`GetterError::Canceled`] if the operation drops every
    /// reply of the wave without sending.
    pub async fn fetch(&self, args: Vec<Value>) -> TandemResult<R> {
        let (reply, rx) = Reply::channel();
        self.call(args, vec![reply])?;
        rx.await.map_err(|_| GetterError::Canceled.into())
    }

    /// Keys with an in-flight wave.
    pub fn in_flight_keys(&self) -> TandemResult<Vec<String>> {
        Ok(self.inner.waiting()?.keys().cloned().collect())
    }

    pub fn cache(&self) -> Option<&Arc<Cache<CachedReply<R>>>> {
        self.inner.cache.as_ref()
    }

    pub fn throttle(&self) -> Option<&Throttle> {
        self.inner.throttle.as_ref()
    }
}

/// Builder for [`Getter`] with injectable cache and throttle objects.
pub struct GetterBuilder<R> {
    operation: Box<dyn Operation<R>>,
    config: GetterConfig,
    cache: Option<Arc<Cache<CachedReply<R>>>>,
    throttle: Option<Throttle>,
}

impl<R> GetterBuilder<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    pub fn config(mut self, config: GetterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a shared cache instead of a private one. Implies caching.
    pub fn cache(mut self, cache: Arc<Cache<CachedReply<R>>>) -> Self {
        self.config.cache = true;
        self.cache = Some(cache);
        self
    }

    /// Use a specific throttle object, ignoring `config.throttle`.
    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn build(self) -> TandemResult<Getter<R>> {
        self.build_in(ThrottleRegistry::global())
    }

    /// Build, resolving a named throttle through `registry`.
    pub fn build_in(self, registry: &ThrottleRegistry) -> TandemResult<Getter<R>> {
        self.config.validate()?;

        let cache = match (self.config.cache, self.cache) {
            (false, _) => None,
            (true, Some(cache)) => Some(cache),
            (true, None) => {
                let name = format!("getter-{}", Uuid::now_v7());
                Some(Arc::new(Cache::in_memory(name, self.config.cache_size)?))
            }
        };

        let throttle = match (self.throttle, &self.config.throttle) {
            (Some(throttle), _) => Some(throttle),
            (None, Some(name)) => Some(registry.get_or_create(name, self.config.throttle_size)?),
            (None, None) => None,
        };

        Ok(Getter {
            inner: Arc::new(Inner {
                operation: self.operation,
                cache,
                throttle,
                waiting: Mutex::new(HashMap::new()),
            }),
        })
    }
}
