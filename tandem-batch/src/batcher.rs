//! Window-based call coalescing.
//!
//! Every call lands in the pending window and restarts a quiet-period timer.
//! The window is handed to the downstream [`BatchHandler`] when either the
//! timer elapses with no further calls, or the pending count reaches
//! `max`. Pending state is reset before the handler runs.
//!
//! A scheduled window always fires: the timer task keeps the batcher alive
//! until it does, so dropping every handle does not lose queued calls. Calls
//! still pending when the batcher itself is dropped (for example after its
//! runtime shut down) are handed to the handler from `Drop`.
//!
//! ```text
//! call ─┐   call ─┐          call ─┐
//!       ▼         ▼                ▼
//!   [ pending ─── timer reset ─── timer reset ] ── window_ms quiet ──► handler(batch)
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tandem_core::{BatchError, BatcherConfig, Reply, TandemResult};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::batch::{Batch, BatchHandler, BatchedCall};

struct Window<R> {
    pending: Batch<R>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the window is reset so a stale timer does nothing.
    generation: u64,
}

impl<R> Window<R> {
    fn take(&mut self) -> Batch<R> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.pending)
    }
}

struct Inner<R: 'static> {
    config: BatcherConfig,
    handler: Box<dyn BatchHandler<R>>,
    runtime: Handle,
    window: Mutex<Window<R>>,
}

impl<R: Send + 'static> Inner<R> {
    fn lock(&self) -> Result<MutexGuard<'_, Window<R>>, BatchError> {
        self.window.lock().map_err(|_| BatchError::LockPoisoned)
    }

    fn expire(&self, generation: u64) {
        let batch = match self.window.lock() {
            Ok(mut window) if window.generation == generation => {
                // Running inside the timer task itself; nothing to abort.
                window.timer = None;
                window.generation = window.generation.wrapping_add(1);
                std::mem::take(&mut window.pending)
            }
            Ok(_) => return,
            Err(_) => {
                tracing::warn!("Batcher lock poisoned, dropping expired window");
                return;
            }
        };
        self.dispatch(batch, "window");
    }
}

impl<R: 'static> Inner<R> {
    fn dispatch(&self, batch: Batch<R>, trigger: &'static str) -> usize {
        let calls = batch.len();
        if calls == 0 {
            return 0;
        }
        tracing::debug!(calls, trigger, "Flushing batch");
        self.handler.handle(batch);
        calls
    }
}

impl<R: 'static> Drop for Inner<R> {
    fn drop(&mut self) {
        let batch = match self.window.get_mut() {
            Ok(window) => window.take(),
            Err(_) => return,
        };
        self.dispatch(batch, "drop");
    }
}

/// Coalesces time-adjacent calls into one downstream invocation.
///
/// Cloning yields another handle onto the same pending window.
pub struct Batcher<R: 'static> {
    inner: Arc<Inner<R>>,
}

impl<R: 'static> Clone for Batcher<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: 'static> std::fmt::Debug for Batcher<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<R: Send + 'static> Batcher<R> {
    /// Create a batcher whose window timer runs on the current tokio runtime.
    ///
    /// Fails with [`BatchError::NoRuntime`] outside a runtime context.
    pub fn new(config: BatcherConfig, handler: impl BatchHandler<R>) -> TandemResult<Self> {
        let runtime = Handle::try_current().map_err(|_| BatchError::NoRuntime)?;
        Self::with_handle(config, handler, runtime)
    }

    /// Create a batcher whose window timer runs on `runtime`.
    pub fn with_handle(
        config: BatcherConfig,
        handler: impl BatchHandler<R>,
        runtime: Handle,
    ) -> TandemResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                handler: Box::new(handler),
                runtime,
                window: Mutex::new(Window {
                    pending: Batch::default(),
                    timer: None,
                    generation: 0,
                }),
            }),
        })
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Queue one call.
    ///
    /// If this call fills the window to `max`, the handler runs on the
    /// calling thread before `call` returns.
    pub fn call(&self, args: Vec<Value>, replies: Vec<Reply<R>>) -> TandemResult<()> {
        self.enqueue(None, args, replies)
    }

    /// Queue one call carrying a call-context value.
    pub fn call_with_subject(
        &self,
        subject: Value,
        args: Vec<Value>,
        replies: Vec<Reply<R>>,
    ) -> TandemResult<()> {
        self.enqueue(Some(subject), args, replies)
    }

    fn enqueue(
        &self,
        subject: Option<Value>,
        args: Vec<Value>,
        replies: Vec<Reply<R>>,
    ) -> TandemResult<()> {
        let full = {
            let mut window = self.inner.lock()?;
            window.pending.push(BatchedCall {
                subject,
                args,
                replies,
            });
            if window.pending.len() >= self.inner.config.max {
                Some(window.take())
            } else {
                self.restart_timer(&mut window);
                None
            }
        };

        if let Some(batch) = full {
            self.inner.dispatch(batch, "max");
        }
        Ok(())
    }

    fn restart_timer(&self, window: &mut Window<R>) {
        if let Some(timer) = window.timer.take() {
            timer.abort();
        }
        window.generation = window.generation.wrapping_add(1);

        let generation = window.generation;
        let delay = self.inner.config.window();
        let inner = Arc::clone(&self.inner);
        window.timer = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.expire(generation);
        }));
    }

    /// Hand the pending window to the handler now.
    ///
    /// Returns the number of calls flushed; an empty window is a no-op.
    pub fn flush(&self) -> TandemResult<usize> {
        let batch = self.inner.lock()?.take();
        Ok(self.inner.dispatch(batch, "flush"))
    }

    /// Discard the pending window without invoking the handler.
    ///
    /// The discarded calls are returned so their replies can be failed
    /// explicitly. Dropping them drops their replies unsent.
    pub fn cancel(&self) -> TandemResult<Option<Batch<R>>> {
        let batch = self.inner.lock()?.take();
        if batch.is_empty() {
            return Ok(None);
        }
        tracing::debug!(calls = batch.len(), "Canceled pending batch");
        Ok(Some(batch))
    }

    pub fn pending_len(&self) -> TandemResult<usize> {
        Ok(self.inner.lock()?.pending.len())
    }
}
