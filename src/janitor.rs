//! Shared background scheduler for cleanup strategies.
//!
//! One janitor runs any number of strategies, across any number of caches, on a single worker
//! thread. The worker wakes at the shortest frequency among the current registrations and runs
//! each strategy whose own frequency has elapsed since it last ran. A registration is run on the
//! first wake-up after it is added.
//!
//! There is no process-wide instance: construct one at start-up and share it, or build an
//! isolated one per test.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::cleanup::CleanupStrategy;
use crate::error::{CacheError, CacheResult};
use crate::store::{CacheId, CacheStore};

struct Registration {
    strategy: Arc<dyn CleanupStrategy>,
    /// Time left until the strategy is due. Zero for a registration that has not run yet.
    remaining: Duration,
}

#[derive(Debug, Default)]
struct Schedule {
    /// Shortest frequency among the registrations, `None` while there are none.
    interval: Option<Duration>,
    shutdown: bool,
}

struct Shared {
    registrations: DashMap<CacheId, Registration>,
    schedule: Mutex<Schedule>,
    wake: Condvar,
}

impl Shared {
    fn recompute_interval(&self) -> Option<Duration> {
        let interval = self
            .registrations
            .iter()
            .map(|registration| registration.strategy.options().frequency)
            .min();

        self.schedule.lock().interval = interval;
        tracing::debug!(?interval, "janitor interval recomputed");
        interval
    }

    /// Blocks until the current interval has elapsed since `since`. Returns `false` on shutdown.
    fn wait(&self, since: Instant) -> bool {
        let mut schedule = self.schedule.lock();

        loop {
            if schedule.shutdown {
                return false;
            }

            match schedule.interval {
                None => {
                    self.wake.wait(&mut schedule);
                }
                Some(interval) => {
                    let deadline = since + interval;
                    if Instant::now() >= deadline {
                        return true;
                    }
                    // A registration or shutdown re-evaluates the deadline.
                    self.wake.wait_until(&mut schedule, deadline);
                }
            }
        }
    }

    /// Advances every registration by `slept` and runs the ones that are due.
    fn sweep(&self, slept: Duration) {
        let mut due = Vec::new();

        for mut registration in self.registrations.iter_mut() {
            let registration = registration.value_mut();
            registration.remaining = registration.remaining.saturating_sub(slept);

            if registration.remaining.is_zero() {
                registration.remaining = registration.strategy.options().frequency;
                due.push(Arc::clone(&registration.strategy));
            }
        }

        // Strategies run without holding any shard of the registration table.
        for strategy in &due {
            match panic::catch_unwind(AssertUnwindSafe(|| strategy.perform_cleanup())) {
                Ok(all_removed) => {
                    tracing::debug!(all_removed, "janitor ran cleanup strategy");
                }
                Err(_) => {
                    tracing::warn!("cleanup strategy panicked, continuing with the next one");
                }
            }
        }

        self.prune_detached();
    }

    /// Drops registrations whose cache is gone.
    fn prune_detached(&self) {
        let before = self.registrations.len();
        self.registrations
            .retain(|_, registration| !registration.strategy.is_detached());

        let pruned = before.saturating_sub(self.registrations.len());
        if pruned > 0 {
            tracing::debug!(pruned, "janitor pruned dropped caches");
            self.recompute_interval();
        }
    }

    fn run(&self) {
        tracing::info!("janitor worker started");
        let mut last_tick = Instant::now();

        while self.wait(last_tick) {
            let slept = last_tick.elapsed();
            last_tick = Instant::now();
            self.sweep(slept);
        }

        tracing::info!("janitor worker stopped");
    }
}

/// Runs registered cleanup strategies on a shared background thread.
///
/// The worker thread starts on the first registration and stops when the janitor is shut down
/// or dropped.
pub struct Janitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Janitor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registrations: DashMap::new(),
                schedule: Mutex::new(Schedule::default()),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Registers `strategy` for `cache`, replacing any strategy already registered for it.
    ///
    /// The strategy runs on the worker's next wake-up and then at its own frequency. A janitor
    /// that has been shut down accepts no new registrations.
    pub fn register<Key, Value, C, S>(&self, cache: &C, strategy: S) -> CacheResult<()>
    where
        C: CacheStore<Key, Value> + ?Sized,
        S: CleanupStrategy + 'static,
    {
        let frequency = strategy.options().frequency;
        if frequency.is_zero() {
            return Err(CacheError::InvalidFrequency(frequency));
        }
        if self.is_shut_down() {
            return Err(CacheError::ShutDown);
        }

        self.shared.prune_detached();
        let id = cache.id();
        self.shared.registrations.insert(
            id,
            Registration {
                strategy: Arc::new(strategy),
                remaining: Duration::ZERO,
            },
        );
        tracing::debug!(cache = %id, ?frequency, "janitor registration added");

        self.shared.recompute_interval();
        self.ensure_worker()?;
        self.shared.wake.notify_all();

        Ok(())
    }

    /// Removes the registration for `cache`, returning whether there was one.
    pub fn unregister<Key, Value, C>(&self, cache: &C) -> bool
    where
        C: CacheStore<Key, Value> + ?Sized,
    {
        let id = cache.id();
        let removed = self.shared.registrations.remove(&id).is_some();

        if removed {
            tracing::debug!(cache = %id, "janitor registration removed");
            self.shared.recompute_interval();
        }
        self.shared.prune_detached();
        removed
    }

    /// Number of registrations whose cache is still alive.
    pub fn registrations(&self) -> usize {
        self.shared.prune_detached();
        self.shared.registrations.len()
    }

    /// How long the worker sleeps between sweeps, `None` while nothing is registered.
    pub fn interval(&self) -> Option<Duration> {
        self.shared.prune_detached();
        self.shared.schedule.lock().interval
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.schedule.lock().shutdown
    }

    /// Stops the worker thread and waits for a sweep in progress to finish. Registrations are
    /// kept but no longer run, and later calls to [`register`](Self::register) fail.
    pub fn shutdown(&self) {
        self.shared.schedule.lock().shutdown = true;
        self.shared.wake.notify_all();

        if let Some(handle) = self.worker.lock().take() {
            // A strategy that drops the last janitor handle runs on the worker itself.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("janitor worker panicked");
            }
        }
    }

    fn ensure_worker(&self) -> CacheResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("cache-janitor".to_string())
            .spawn(move || shared.run())?;
        *worker = Some(handle);

        Ok(())
    }
}

impl Default for Janitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
