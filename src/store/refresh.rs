use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::entry::CachedEntry;
use crate::error::{CacheError, CacheResult, FactoryError};
use crate::expiration::SharedExpiration;
use crate::store::{EntryTable, Slot};

/// Produces the value for a key. Shared between the cache default and per-key registrations.
pub type Factory<Key, Value> = Arc<dyn Fn(&Key) -> Result<Value, FactoryError> + Send + Sync>;

/// Result of one regeneration pass over the expired entries of a refresh cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub refreshed: usize,
    pub failed: usize,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// An entry plus the factory registered for its key, if any.
pub(crate) struct RefreshSlot<Key, Value> {
    entry: Arc<CachedEntry<Value>>,
    factory: Option<Factory<Key, Value>>,
}

impl<Key, Value> Clone for RefreshSlot<Key, Value> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            factory: self.factory.clone(),
        }
    }
}

impl<Key, Value> RefreshSlot<Key, Value> {
    pub(crate) fn factory(&self) -> Option<Factory<Key, Value>> {
        self.factory.clone()
    }
}

impl<Key, Value> Slot<Value> for RefreshSlot<Key, Value> {
    fn entry(&self) -> &Arc<CachedEntry<Value>> {
        &self.entry
    }
}

/// Storage and regeneration logic shared by the on-demand and background refresh caches.
pub(crate) struct RefreshCore<Key, Value> {
    pub(crate) table: EntryTable<Key, RefreshSlot<Key, Value>>,
    strategy: SharedExpiration<Value>,
    default_factory: Option<Factory<Key, Value>>,
}

impl<Key, Value> RefreshCore<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    pub(crate) fn new(
        strategy: SharedExpiration<Value>,
        default_factory: Option<Factory<Key, Value>>,
    ) -> Self {
        Self {
            table: EntryTable::new(),
            strategy,
            default_factory,
        }
    }

    pub(crate) fn slot(&self, key: &Key) -> Option<RefreshSlot<Key, Value>> {
        self.table.slot(key)
    }

    pub(crate) fn add(&self, key: Key, value: Value, factory: Option<Factory<Key, Value>>) -> bool {
        self.table.statistics().record_update();
        let slot = RefreshSlot {
            entry: Arc::new(CachedEntry::new(value, Arc::clone(&self.strategy))),
            factory,
        };

        self.table.insert_if_absent(key, slot)
    }

    /// Registers a key whose value is produced later, on first access or on the next refresh.
    pub(crate) fn add_pending(&self, key: Key, factory: Factory<Key, Value>) -> bool
    where
        Value: Default,
    {
        self.table.statistics().record_update();
        let slot = RefreshSlot {
            entry: Arc::new(CachedEntry::expired_default()),
            factory: Some(factory),
        };

        self.table.insert_if_absent(key, slot)
    }

    /// Produces a new slot for `key` with its own factory, falling back to the default one.
    pub(crate) fn generate(
        &self,
        key: &Key,
        factory: Option<Factory<Key, Value>>,
    ) -> CacheResult<RefreshSlot<Key, Value>> {
        let per_key = factory.is_some();
        let factory = factory
            .or_else(|| self.default_factory.clone())
            .ok_or(CacheError::NoFactory)?;
        let value = factory(key).map_err(CacheError::Factory)?;

        Ok(RefreshSlot {
            entry: Arc::new(CachedEntry::new(value, Arc::clone(&self.strategy))),
            factory: per_key.then_some(factory),
        })
    }

    /// Generates a value for a missing key and stores it unless another thread got there first.
    ///
    /// A `factory` given here is remembered for the key and used by later regenerations.
    pub(crate) fn generate_missing(
        &self,
        key: &Key,
        factory: Option<Factory<Key, Value>>,
    ) -> CacheResult<RefreshSlot<Key, Value>> {
        let slot = self.generate(key, factory)?;
        Ok(self.table.get_or_insert(key.clone(), slot))
    }

    /// Regenerates an entry read while expired and stores the result unless the entry was
    /// replaced or removed in the meantime. The caller gets the value it produced either way.
    pub(crate) fn regenerate(
        &self,
        key: &Key,
        stale: &RefreshSlot<Key, Value>,
    ) -> CacheResult<Value>
    where
        Value: Clone,
    {
        self.table.statistics().record_update();
        let fresh = self.generate(key, stale.factory())?;
        let value = fresh.entry.read().clone();

        if !self.table.replace_if_current(key, &stale.entry, fresh) {
            tracing::debug!(
                cache = %self.table.id(),
                "entry changed while regenerating, keeping the newer state"
            );
        }
        Ok(value)
    }

    /// Rebuilds every expired entry in place with its key's factory.
    ///
    /// A failing or panicking factory or expiration strategy leaves the stale entry where it is,
    /// so the key is retried on the next pass. Entries replaced or removed while their value was
    /// being produced are left alone.
    pub(crate) fn refresh_expired(&self) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();

        for (key, slot) in self.table.slots() {
            let generated = panic::catch_unwind(AssertUnwindSafe(|| {
                if !slot.entry.is_expired() {
                    return None;
                }

                self.table.statistics().record_update();
                Some(self.generate(&key, slot.factory.clone()))
            }));

            match generated {
                Ok(None) => {}
                Ok(Some(Ok(fresh))) => {
                    if self.table.replace_if_current(&key, &slot.entry, fresh) {
                        outcome.refreshed += 1;
                    }
                }
                Ok(Some(Err(error))) => {
                    tracing::warn!(
                        cache = %self.table.id(),
                        %error,
                        "refresh failed, keeping stale value"
                    );
                    outcome.failed += 1;
                }
                Err(_) => {
                    tracing::warn!(
                        cache = %self.table.id(),
                        "refresh panicked, keeping stale value"
                    );
                    outcome.failed += 1;
                }
            }
        }

        tracing::debug!(
            cache = %self.table.id(),
            refreshed = outcome.refreshed,
            failed = outcome.failed,
            "refresh pass complete"
        );
        outcome
    }
}

/// Wraps a closure as a shareable [`Factory`].
pub(crate) fn factory<Key, Value, F>(factory: F) -> Factory<Key, Value>
where
    F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
{
    Arc::new(factory)
}
