pub mod background_refresh;
pub mod check_and_set;
pub mod on_demand;
mod refresh;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::CachedEntry;
use crate::statistics::CacheStatistics;

pub use refresh::{Factory, RefreshOutcome};

pub type KeyIterator<'a, Key> = Box<dyn Iterator<Item = Key> + 'a>;

/// Snapshot iteration over a cache. Entries are shared, so reading bookkeeping through them
/// observes the live counters, but keys added or removed after the snapshot are not reflected.
pub type EntryIterator<'a, Key, Value> =
    Box<dyn Iterator<Item = (Key, Arc<CachedEntry<Value>>)> + 'a>;

/// Identity of a cache instance, used by the janitor to key registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheId(Uuid);

impl CacheId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CacheId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// The surface cleanup strategies and the janitor use to reach a cache.
///
/// Lookups and inserts differ between cache variants (plain values, factories, fallible
/// regeneration) and live on the concrete types. Everything a sweep needs is here.
pub trait CacheStore<Key, Value>: Send + Sync {
    fn id(&self) -> CacheId;

    /// Number of entries, including expired entries that have not been cleaned yet.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &Key) -> bool;

    fn entries(&self) -> EntryIterator<'_, Key, Value>;

    fn keys<'a>(&'a self) -> KeyIterator<'a, Key>
    where
        Key: 'a,
        Value: 'a,
    {
        Box::new(self.entries().map(|(key, _)| key))
    }

    /// Removes a key, returning whether it was present.
    fn remove(&self, key: &Key) -> bool;

    /// Removes every entry.
    fn clear(&self) -> bool;

    /// Removes every expired entry. Returns whether every removal attempted succeeded.
    fn clean(&self) -> bool;

    fn statistics(&self) -> &CacheStatistics;
}

/// What a backing map stores per key: the entry and anything the variant keeps next to it.
pub(crate) trait Slot<Value>: Clone {
    fn entry(&self) -> &Arc<CachedEntry<Value>>;
}

impl<Value> Slot<Value> for Arc<CachedEntry<Value>> {
    fn entry(&self) -> &Arc<CachedEntry<Value>> {
        self
    }
}

/// Concurrent backing map plus statistics, shared by every cache variant.
///
/// Map guards are never held while a strategy or factory runs: slots are cloned out first.
pub(crate) struct EntryTable<Key, S> {
    id: CacheId,
    map: DashMap<Key, S>,
    statistics: CacheStatistics,
}

impl<Key, S> EntryTable<Key, S>
where
    Key: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            id: CacheId::new(),
            map: DashMap::new(),
            statistics: CacheStatistics::new(),
        }
    }

    pub(crate) fn id(&self) -> CacheId {
        self.id
    }

    pub(crate) fn statistics(&self) -> &CacheStatistics {
        &self.statistics
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn contains(&self, key: &Key) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn slot(&self, key: &Key) -> Option<S>
    where
        S: Clone,
    {
        self.map.get(key).map(|slot| slot.value().clone())
    }

    /// Inserts unless the key is already present. The first writer wins.
    pub(crate) fn insert_if_absent(&self, key: Key, slot: S) -> bool {
        match self.map.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                true
            }
        }
    }

    /// Returns the slot stored under `key`, inserting `slot` first if the key is absent.
    pub(crate) fn get_or_insert(&self, key: Key, slot: S) -> S
    where
        S: Clone,
    {
        self.map.entry(key).or_insert(slot).value().clone()
    }

    /// Replaces the slot under `key` only if it still holds `current`.
    pub(crate) fn replace_if_current<Value>(
        &self,
        key: &Key,
        current: &Arc<CachedEntry<Value>>,
        slot: S,
    ) -> bool
    where
        S: Slot<Value>,
    {
        match self.map.get_mut(key) {
            Some(mut existing) if Arc::ptr_eq(existing.entry(), current) => {
                *existing = slot;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn put(&self, key: Key, slot: S) {
        self.map.insert(key, slot);
    }

    pub(crate) fn slots(&self) -> Vec<(Key, S)>
    where
        S: Clone,
    {
        self.map
            .iter()
            .map(|item| (item.key().clone(), item.value().clone()))
            .collect()
    }

    pub(crate) fn snapshot<Value>(&self) -> Vec<(Key, Arc<CachedEntry<Value>>)>
    where
        S: Slot<Value>,
    {
        self.map
            .iter()
            .map(|item| (item.key().clone(), Arc::clone(item.value().entry())))
            .collect()
    }

    pub(crate) fn remove(&self, key: &Key) -> bool {
        self.statistics.record_eviction();
        self.map.remove(key).is_some()
    }

    pub(crate) fn clear(&self) -> bool {
        self.map.clear();
        self.statistics.record_cleaning();
        true
    }

    pub(crate) fn clean<Value>(&self) -> bool
    where
        S: Slot<Value>,
    {
        self.statistics.record_cleaning();

        let expired: Vec<_> = self
            .snapshot::<Value>()
            .into_iter()
            .filter(|(_, entry)| entry.is_expired())
            .collect();

        // Only the exact entry seen expired is removed; a concurrent replacement survives
        // and the pass reports the removal as failed.
        expired.into_iter().fold(true, |all_removed, (key, entry)| {
            let removed = self
                .map
                .remove_if(&key, |_, slot| Arc::ptr_eq(slot.entry(), &entry))
                .is_some();
            all_removed && removed
        })
    }
}
