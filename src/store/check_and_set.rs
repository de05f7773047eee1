use std::hash::Hash;
use std::sync::Arc;

use crate::entry::CachedEntry;
use crate::expiration::{Expires, SharedExpiration};
use crate::statistics::CacheStatistics;
use crate::store::{CacheId, CacheStore, EntryIterator, EntryTable};

/// A cache without value regeneration: callers add values and must add them again once they
/// expire.
///
/// Expired entries are not removed on read. They stay in the map, and count towards
/// [`CacheStore::len`], until [`CacheStore::clean`] or a cleanup strategy removes them.
pub struct CheckAndSetCache<Key, Value> {
    table: EntryTable<Key, Arc<CachedEntry<Value>>>,
    strategy: SharedExpiration<Value>,
}

impl<Key, Value> CheckAndSetCache<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    pub fn new(strategy: SharedExpiration<Value>) -> Self {
        Self {
            table: EntryTable::new(),
            strategy,
        }
    }

    /// Looks up a key. Returns `None` when the key is missing or its entry has expired.
    ///
    /// A present key counts as a hit even when its entry turns out to be expired.
    pub fn get(&self, key: &Key) -> Option<Value>
    where
        Value: Clone,
    {
        let statistics = self.table.statistics();
        statistics.record_request();

        match self.table.slot(key) {
            Some(entry) => {
                statistics.record_hit();
                (!entry.is_expired()).then(|| entry.read().clone())
            }
            None => {
                statistics.record_miss();
                None
            }
        }
    }

    /// Stores a value unless the key is already present, returning whether it was stored.
    pub fn add(&self, key: Key, value: Value) -> bool {
        self.table.statistics().record_update();
        let entry = Arc::new(CachedEntry::new(value, Arc::clone(&self.strategy)));

        self.table.insert_if_absent(key, entry)
    }

    /// Computes the value for `key` right away and stores it like [`CheckAndSetCache::add`].
    pub fn add_with<F>(&self, key: Key, factory: F) -> bool
    where
        F: FnOnce(&Key) -> Value,
    {
        let value = factory(&key);
        self.add(key, value)
    }

    /// Forces the entry under `key` to expire. Returns whether the key was present.
    pub fn expire(&self, key: &Key) -> bool {
        self.table.slot(key).map(|entry| entry.expire()).is_some()
    }
}

impl<Key, Value> Default for CheckAndSetCache<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(Expires::never())
    }
}

impl<Key, Value> CacheStore<Key, Value> for CheckAndSetCache<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    fn id(&self) -> CacheId {
        self.table.id()
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn contains(&self, key: &Key) -> bool {
        self.table.contains(key)
    }

    fn entries(&self) -> EntryIterator<'_, Key, Value> {
        Box::new(self.table.snapshot::<Value>().into_iter())
    }

    fn remove(&self, key: &Key) -> bool {
        self.table.remove(key)
    }

    fn clear(&self) -> bool {
        self.table.clear()
    }

    fn clean(&self) -> bool {
        self.table.clean::<Value>()
    }

    fn statistics(&self) -> &CacheStatistics {
        self.table.statistics()
    }
}
