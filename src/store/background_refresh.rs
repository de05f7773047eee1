use std::cell::Cell;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use interruptible_polling::PollingTask;

use crate::error::{CacheError, CacheResult, FactoryError};
use crate::expiration::SharedExpiration;
use crate::statistics::CacheStatistics;
use crate::store::refresh::{self, Factory, RefreshCore, RefreshOutcome};
use crate::store::{CacheId, CacheStore, EntryIterator, Slot};

/// A cache whose expired entries are rebuilt on a timer rather than when read.
///
/// Reads never wait for a regeneration of an existing key: an expired value keeps being served
/// until the next refresh pass replaces it. Only a read of a missing key runs a factory on the
/// calling thread. The refresh thread stops when the cache is dropped.
pub struct BackgroundRefreshCache<Key, Value> {
    core: Arc<RefreshCore<Key, Value>>,
    _refresh: PollingTask,
}

impl<Key, Value> BackgroundRefreshCache<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    /// A cache without a default factory that refreshes every `rate`.
    pub fn new(rate: Duration, strategy: SharedExpiration<Value>) -> CacheResult<Self> {
        Self::start(rate, RefreshCore::new(strategy, None))
    }

    pub fn with_factory<F>(
        rate: Duration,
        strategy: SharedExpiration<Value>,
        factory: F,
    ) -> CacheResult<Self>
    where
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        Self::start(rate, RefreshCore::new(strategy, Some(refresh::factory(factory))))
    }

    fn start(rate: Duration, core: RefreshCore<Key, Value>) -> CacheResult<Self> {
        if rate.is_zero() {
            return Err(CacheError::InvalidFrequency(rate));
        }

        let core = Arc::new(core);
        let target: Weak<RefreshCore<Key, Value>> = Arc::downgrade(&core);
        let started = Cell::new(false);
        let refresh = PollingTask::new(
            rate,
            Box::new(move || {
                // The task polls as soon as it is spawned, before the cache holds anything.
                if !started.replace(true) {
                    return;
                }
                if let Some(core) = target.upgrade() {
                    core.refresh_expired();
                }
            }),
        )
        .map_err(|_| CacheError::InvalidFrequency(rate))?;

        tracing::info!(cache = %core.table.id(), ?rate, "background refresh started");
        Ok(Self {
            core,
            _refresh: refresh,
        })
    }

    /// Returns the current value for `key`, producing it with the default factory if missing.
    ///
    /// An expired value is returned as is.
    pub fn get(&self, key: &Key) -> CacheResult<Value>
    where
        Value: Clone,
    {
        self.lookup(key, None)
    }

    /// Like [`get`](Self::get), but a missing key is produced by `factory`, which the refresh
    /// passes then use for the key. Present keys keep the factory they were added with.
    pub fn get_or_add<F>(&self, key: &Key, factory: F) -> CacheResult<Value>
    where
        Value: Clone,
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        self.lookup(key, Some(refresh::factory(factory)))
    }

    fn lookup(&self, key: &Key, factory: Option<Factory<Key, Value>>) -> CacheResult<Value>
    where
        Value: Clone,
    {
        let statistics = self.core.table.statistics();
        statistics.record_request();

        match self.core.slot(key) {
            Some(slot) => {
                statistics.record_hit();
                Ok(slot.entry().read().clone())
            }
            None => {
                statistics.record_miss();
                let slot = self.core.generate_missing(key, factory)?;
                Ok(slot.entry().read().clone())
            }
        }
    }

    /// Stores a value that is refreshed with the default factory once it expires.
    pub fn add(&self, key: Key, value: Value) -> bool {
        self.core.add(key, value, None)
    }

    /// Registers a key whose value is produced by `factory` on the next refresh pass.
    ///
    /// Reads before that pass return the default value.
    pub fn add_with_factory<F>(&self, key: Key, factory: F) -> bool
    where
        Value: Default,
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        self.core.add_pending(key, refresh::factory(factory))
    }

    /// Stores a value that is refreshed with `factory` once it expires.
    pub fn add_value_with_factory<F>(&self, key: Key, value: Value, factory: F) -> bool
    where
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        self.core.add(key, value, Some(refresh::factory(factory)))
    }

    /// Runs a refresh pass now, on the calling thread.
    pub fn refresh_expired(&self) -> RefreshOutcome {
        self.core.refresh_expired()
    }
}

impl<Key, Value> CacheStore<Key, Value> for BackgroundRefreshCache<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    fn id(&self) -> CacheId {
        self.core.table.id()
    }

    fn len(&self) -> usize {
        self.core.table.len()
    }

    fn contains(&self, key: &Key) -> bool {
        self.core.table.contains(key)
    }

    fn entries(&self) -> EntryIterator<'_, Key, Value> {
        Box::new(self.core.table.snapshot::<Value>().into_iter())
    }

    fn remove(&self, key: &Key) -> bool {
        self.core.table.remove(key)
    }

    fn clear(&self) -> bool {
        self.core.table.clear()
    }

    fn clean(&self) -> bool {
        self.core.table.clean::<Value>()
    }

    fn statistics(&self) -> &CacheStatistics {
        self.core.table.statistics()
    }
}
