//! Bounded concurrency with FIFO overflow.
//!
//! A [`Throttle`] admits at most `limit` jobs at a time. Jobs offered while
//! the throttle is full wait in a queue with no expiry and start, in arrival
//! order, as running jobs call [`Throttle::release`]. Several getters may
//! share one throttle through a [`ThrottleRegistry`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tandem_core::{GetterError, TandemResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ThrottleState {
    limit: usize,
    running: usize,
    queue: VecDeque<Job>,
}

impl ThrottleState {
    /// Pop the next queued job if there is spare capacity, counting it as
    /// running.
    fn admit_next(&mut self) -> Option<Job> {
        if self.running >= self.limit {
            return None;
        }
        let job = self.queue.pop_front()?;
        self.running += 1;
        Some(job)
    }
}

/// Shared concurrency limiter.
///
/// Cloning yields another handle onto the same budget. Jobs always run on the
/// thread that admitted them and never under the throttle's lock.
#[derive(Clone)]
pub struct Throttle {
    state: Arc<Mutex<ThrottleState>>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Throttle");
        if let Ok(state) = self.state.lock() {
            s.field("limit", &state.limit)
                .field("running", &state.running)
                .field("queued", &state.queue.len());
        }
        s.finish()
    }
}

impl Throttle {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ThrottleState {
                limit: limit.max(1),
                running: 0,
                queue: VecDeque::new(),
            })),
        }
    }

    fn lock(&self) -> TandemResult<MutexGuard<'_, ThrottleState>> {
        Ok(self.state.lock().map_err(|_| GetterError::LockPoisoned)?)
    }

    /// Run `job` now if under the limit, otherwise queue it.
    ///
    /// Returns `true` if the job ran immediately. A job that ran (now or later)
    /// holds one unit of capacity until [`Throttle::release`] is called.
    pub fn try_run(&self, job: impl FnOnce() + Send + 'static) -> TandemResult<bool> {
        {
            let mut state = self.lock()?;
            if state.running >= state.limit {
                state.queue.push_back(Box::new(job));
                tracing::debug!(
                    limit = state.limit,
                    queued = state.queue.len(),
                    "Throttle full, queueing job"
                );
                return Ok(false);
            }
            state.running += 1;
        }
        job();
        Ok(true)
    }

    /// Return one unit of capacity and start the next queued job, if any.
    ///
    /// Releasing while nothing is running is [`GetterError::ThrottleUnderflow`].
    pub fn release(&self) -> TandemResult<()> {
        let next = {
            let mut state = self.lock()?;
            if state.running == 0 {
                return Err(GetterError::ThrottleUnderflow.into());
            }
            state.running -= 1;
            state.admit_next()
        };
        if let Some(job) = next {
            job();
        }
        Ok(())
    }

    pub fn limit(&self) -> TandemResult<usize> {
        Ok(self.lock()?.limit)
    }

    /// Resize the throttle.
    ///
    /// Raising the limit starts queued jobs up to the new capacity right away;
    /// lowering it lets running jobs finish and holds the queue until the
    /// running count drops below the new limit.
    pub fn set_limit(&self, limit: usize) -> TandemResult<()> {
        let admitted: Vec<Job> = {
            let mut state = self.lock()?;
            state.limit = limit.max(1);
            std::iter::from_fn(|| state.admit_next()).collect()
        };
        for job in admitted {
            job();
        }
        Ok(())
    }

    /// Jobs currently holding capacity.
    pub fn running(&self) -> TandemResult<usize> {
        Ok(self.lock()?.running)
    }

    /// Jobs waiting for capacity.
    pub fn queued(&self) -> TandemResult<usize> {
        Ok(self.lock()?.queue.len())
    }
}

static GLOBAL_THROTTLES: Lazy<ThrottleRegistry> = Lazy::new(ThrottleRegistry::new);

/// Named throttles shared between getters.
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    throttles: Mutex<HashMap<String, Throttle>>,
}

impl ThrottleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by getters built without an explicit one.
    pub fn global() -> &'static ThrottleRegistry {
        &GLOBAL_THROTTLES
    }

    /// Look up `name`, creating it with `limit` on first use.
    ///
    /// An existing throttle keeps its current limit.
    pub fn get_or_create(&self, name: &str, limit: usize) -> TandemResult<Throttle> {
        let mut throttles = self
            .throttles
            .lock()
            .map_err(|_| GetterError::LockPoisoned)?;
        let throttle = throttles
            .entry(name.to_string())
            .or_insert_with(|| Throttle::new(limit));
        Ok(throttle.clone())
    }

    pub fn get(&self, name: &str) -> Option<Throttle> {
        self.throttles.lock().ok()?.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_runs_under_limit() {
        let throttle = Throttle::new(2);
        let started = Arc::new(AtomicUsize::new(0));
        assert!(throttle.try_run(counting_job(&started)).unwrap());
        assert!(throttle.try_run(counting_job(&started)).unwrap());
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(throttle.running().unwrap(), 2);
    }

    #[test]
    fn test_queues_over_limit_and_drains_fifo() {
        let throttle = Throttle::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            throttle
                .try_run(move || order.lock().unwrap().push(i))
                .unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0]);
        assert_eq!(throttle.queued().unwrap(), 2);

        throttle.release().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
        throttle.release().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        throttle.release().unwrap();
        assert_eq!(throttle.running().unwrap(), 0);
    }

    #[test]
    fn test_release_when_idle_underflows() {
        let throttle = Throttle::new(1);
        let err = throttle.release().unwrap_err();
        assert!(matches!(
            err,
            tandem_core::TandemError::Getter(GetterError::ThrottleUnderflow)
        ));
    }

    #[test]
    fn test_raising_limit_admits_queued_jobs() {
        let throttle = Throttle::new(1);
        let started = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            throttle.try_run(counting_job(&started)).unwrap();
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);

        throttle.set_limit(3).unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(throttle.queued().unwrap(), 1);
        assert_eq!(throttle.limit().unwrap(), 3);
    }

    #[test]
    fn test_lowering_limit_holds_queue() {
        let throttle = Throttle::new(2);
        let started = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            throttle.try_run(counting_job(&started)).unwrap();
        }
        throttle.set_limit(1).unwrap();

        // Two running, limit one: the first release only brings running to one.
        throttle.release().unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 2);
        throttle.release().unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_job_may_release_reentrantly() {
        let throttle = Throttle::new(1);
        let handle = throttle.clone();
        throttle
            .try_run(move || handle.release().unwrap())
            .unwrap();
        assert_eq!(throttle.running().unwrap(), 0);
    }

    #[test]
    fn test_registry_shares_by_name() {
        let registry = ThrottleRegistry::new();
        let a = registry.get_or_create("net", 2).unwrap();
        let b = registry.get_or_create("net", 99).unwrap();
        assert_eq!(b.limit().unwrap(), 2);

        let started = Arc::new(AtomicUsize::new(0));
        a.try_run(counting_job(&started)).unwrap();
        assert_eq!(b.running().unwrap(), 1);
        assert!(registry.get("disk").is_none());
    }
}
