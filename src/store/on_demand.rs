use std::hash::Hash;

use crate::error::{CacheResult, FactoryError};
use crate::expiration::SharedExpiration;
use crate::statistics::CacheStatistics;
use crate::store::refresh::{self, Factory, RefreshCore, RefreshOutcome};
use crate::store::{CacheId, CacheStore, EntryIterator, Slot};

/// A cache that regenerates values when they are read.
///
/// A lookup of an expired entry rebuilds it with the factory registered for its key, or the
/// cache-wide default factory, before returning. A lookup of a missing key builds it with the
/// default factory. Values are only ever produced on the calling thread.
pub struct OnDemandRefreshCache<Key, Value> {
    core: RefreshCore<Key, Value>,
}

impl<Key, Value> OnDemandRefreshCache<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    /// A cache without a default factory. Missing keys cannot be produced, and only keys added
    /// with their own factory can be regenerated.
    pub fn new(strategy: SharedExpiration<Value>) -> Self {
        Self {
            core: RefreshCore::new(strategy, None),
        }
    }

    pub fn with_factory<F>(strategy: SharedExpiration<Value>, factory: F) -> Self
    where
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        Self {
            core: RefreshCore::new(strategy, Some(refresh::factory(factory))),
        }
    }

    /// Returns the value for `key`, producing it first if it is missing or expired.
    ///
    /// Regeneration errors are returned to the caller. A failed regeneration of an expired
    /// entry leaves the stale entry in place.
    pub fn get(&self, key: &Key) -> CacheResult<Value>
    where
        Value: Clone,
    {
        self.lookup(key, None)
    }

    /// Like [`get`](Self::get), but a missing key is produced by `factory`, which is then
    /// remembered for the key. Present keys keep the factory they were added with.
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

        let slot = match self.core.slot(key) {
            Some(slot) => {
                statistics.record_hit();
                slot
            }
            None => {
                statistics.record_miss();
                let slot = self.core.generate_missing(key, factory)?;
                return Ok(slot.entry().read().clone());
            }
        };

        if !slot.entry().is_expired() {
            return Ok(slot.entry().read().clone());
        }

        self.core.regenerate(key, &slot)
    }

    /// Stores a value that is regenerated with the default factory once it expires.
    pub fn add(&self, key: Key, value: Value) -> bool {
        self.core.add(key, value, None)
    }

    /// Registers a key whose value is produced by `factory` on first access.
    ///
    /// Until then the key holds an expired default value, so a clean pass removes it.
    pub fn add_with_factory<F>(&self, key: Key, factory: F) -> bool
    where
        Value: Default,
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        self.core.add_pending(key, refresh::factory(factory))
    }

    /// Stores a value that is regenerated with `factory` once it expires.
    pub fn add_value_with_factory<F>(&self, key: Key, value: Value, factory: F) -> bool
    where
        F: Fn(&Key) -> Result<Value, FactoryError> + Send + Sync + 'static,
    {
        self.core.add(key, value, Some(refresh::factory(factory)))
    }

    /// Regenerates every expired entry now instead of waiting for it to be read.
    pub fn refresh_expired(&self) -> RefreshOutcome {
        self.core.refresh_expired()
    }
}

impl<Key, Value> CacheStore<Key, Value> for OnDemandRefreshCache<Key, Value>
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::entry::CachedEntry;
    use crate::error::CacheError;
    use crate::expiration::Expires;

    fn echo_cache(strategy: SharedExpiration<String>) -> OnDemandRefreshCache<String, String> {
        OnDemandRefreshCache::with_factory(strategy, |key: &String| {
            Ok(format!("{key}-generated"))
        })
    }

    fn peek(cache: &OnDemandRefreshCache<String, String>, key: &str) -> Option<String> {
        cache
            .entries()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, entry)| entry.peek().clone())
    }

    #[test]
    fn test_missing_key_uses_default_factory() {
        let cache = echo_cache(Expires::never());

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "key-generated");
        assert!(cache.contains(&"key".to_string()));

        let statistics = cache.statistics().snapshot();
        assert_eq!(statistics.requests, 1);
        assert_eq!(statistics.misses, 1);
        assert_eq!(statistics.hits, 0);
        assert_eq!(statistics.updates, 0);
    }

    #[test]
    fn test_added_value_is_returned() {
        let cache = echo_cache(Expires::never());
        cache.add("key".to_string(), "stored".to_string());

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "stored");
        assert_eq!(cache.statistics().hits(), 1);
        assert_eq!(cache.statistics().updates(), 1);
    }

    /// Expired entries are rebuilt on read and the read counts as a hit plus an update.
    #[test]
    fn test_expired_entry_is_regenerated_on_read() {
        let cache = echo_cache(Expires::always());
        cache.add("key".to_string(), "stored".to_string());

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "key-generated");

        let statistics = cache.statistics().snapshot();
        assert_eq!(statistics.requests, 1);
        assert_eq!(statistics.hits, 1);
        assert_eq!(statistics.updates, 2);
    }

    /// Reading after removal is a miss that regenerates without counting an update.
    #[test]
    fn test_get_after_remove_regenerates() {
        let cache = echo_cache(Expires::never());
        cache.add("key".to_string(), "stored".to_string());
        cache.remove(&"key".to_string());

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "key-generated");

        let statistics = cache.statistics().snapshot();
        assert_eq!(statistics.misses, 1);
        assert_eq!(statistics.evictions, 1);
        assert_eq!(statistics.updates, 1);
    }

    #[test]
    fn test_per_key_factory_overrides_default() {
        let cache = echo_cache(Expires::never());
        cache.add_with_factory("key".to_string(), |_: &String| Ok("own".to_string()));

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "own");
    }

    /// A per-key factory keeps being used for later regenerations of the same key.
    #[test]
    fn test_per_key_factory_survives_regeneration() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cache = echo_cache(Expires::hits(1));
        cache.add_value_with_factory("key".to_string(), "stored".to_string(), move |_: &String| {
            Ok(format!("own-{}", counter.fetch_add(1, Ordering::SeqCst)))
        });

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "stored");
        assert_eq!(cache.get(&"key".to_string()).unwrap(), "own-0");
        assert_eq!(cache.get(&"key".to_string()).unwrap(), "own-1");
    }

    /// A key registered with only a factory holds an expired placeholder until first read.
    #[test]
    fn test_factory_only_placeholder_is_cleaned() {
        let cache = echo_cache(Expires::never());
        cache.add_with_factory("key".to_string(), |_: &String| Ok("own".to_string()));

        assert_eq!(cache.len(), 1);
        assert!(cache.clean());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_missing_key_without_factory_errors() {
        let cache: OnDemandRefreshCache<String, String> =
            OnDemandRefreshCache::new(Expires::never());

        assert!(matches!(cache.get(&"key".to_string()), Err(CacheError::NoFactory)));
        assert!(!cache.contains(&"key".to_string()));
    }

    /// A failing regeneration is reported and the stale entry stays.
    #[test]
    fn test_factory_error_keeps_stale_entry() {
        let cache: OnDemandRefreshCache<String, String> =
            OnDemandRefreshCache::with_factory(Expires::always(), |_: &String| {
                Err("backend down".into())
            });
        cache.add("key".to_string(), "stored".to_string());

        assert!(matches!(cache.get(&"key".to_string()), Err(CacheError::Factory(_))));
        assert!(cache.contains(&"key".to_string()));
    }

    #[test]
    fn test_refresh_expired_rebuilds_in_place() {
        let cache = echo_cache(Expires::hits(1));
        cache.add("a".to_string(), "stored".to_string());
        cache.add("b".to_string(), "stored".to_string());
        cache.get(&"a".to_string()).unwrap();

        let outcome = cache.refresh_expired();

        assert_eq!((outcome.refreshed, outcome.failed), (1, 0));
        let (_, entry) = cache.entries().find(|(key, _)| key == "a").unwrap();
        assert_eq!(entry.peek(), "a-generated");
        assert_eq!(entry.hits(), 0);
    }

    #[test]
    fn test_refresh_expired_isolates_failures() {
        let cache = echo_cache(Expires::always());
        cache.add_value_with_factory("bad".to_string(), "stale".to_string(), |_: &String| {
            Err("backend down".into())
        });
        cache.add("good".to_string(), "stale".to_string());

        let outcome = cache.refresh_expired();

        assert_eq!(outcome.refreshed, 1);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.is_success());
        let (_, bad) = cache.entries().find(|(key, _)| key == "bad").unwrap();
        assert_eq!(bad.peek(), "stale");
    }

    #[test]
    fn test_refresh_expired_survives_panicking_factory() {
        let cache = echo_cache(Expires::always());
        cache.add_value_with_factory(
            "bad".to_string(),
            "stale".to_string(),
            |_: &String| -> Result<String, _> { panic!("factory failure") },
        );
        cache.add("good".to_string(), "stale".to_string());

        let outcome = cache.refresh_expired();

        assert_eq!((outcome.refreshed, outcome.failed), (1, 1));
        assert_eq!(peek(&cache, "bad").as_deref(), Some("stale"));
        assert_eq!(peek(&cache, "good").as_deref(), Some("good-generated"));
    }

    /// A strategy that panics on one entry does not stop the pass over the others.
    #[test]
    fn test_refresh_expired_survives_panicking_strategy() {
        let cache = echo_cache(Expires::matching(|entry: &CachedEntry<String>| {
            match entry.peek().as_str() {
                "boom" => panic!("strategy failure"),
                value => value == "stale",
            }
        }));
        cache.add("bad".to_string(), "boom".to_string());
        cache.add("good".to_string(), "stale".to_string());

        let outcome = cache.refresh_expired();

        assert_eq!((outcome.refreshed, outcome.failed), (1, 1));
        assert_eq!(peek(&cache, "bad").as_deref(), Some("boom"));
        assert_eq!(cache.statistics().updates(), 3);
    }

    /// An entry replaced while its expired predecessor was being regenerated is kept.
    #[test]
    fn test_regeneration_keeps_concurrent_replacement() {
        let cache = Arc::new(echo_cache(Expires::always()));
        let target = Arc::downgrade(&cache);
        cache.add_value_with_factory("key".to_string(), "stale".to_string(), move |key: &String| {
            if let Some(cache) = target.upgrade() {
                cache.remove(key);
                cache.add(key.clone(), "concurrent".to_string());
            }
            Ok("regenerated".to_string())
        });

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "regenerated");
        assert_eq!(peek(&cache, "key").as_deref(), Some("concurrent"));
    }

    /// A key removed while its expired value was being regenerated stays removed.
    #[test]
    fn test_regeneration_does_not_resurrect_removed_key() {
        let cache = Arc::new(echo_cache(Expires::always()));
        let target = Arc::downgrade(&cache);
        cache.add_value_with_factory("key".to_string(), "stale".to_string(), move |key: &String| {
            if let Some(cache) = target.upgrade() {
                cache.remove(key);
            }
            Ok("regenerated".to_string())
        });

        assert_eq!(cache.get(&"key".to_string()).unwrap(), "regenerated");
        assert!(!cache.contains(&"key".to_string()));
    }

    /// A missing key is produced by the caller's factory, which then sticks to the key.
    #[test]
    fn test_get_or_add_uses_and_remembers_factory() {
        let cache = echo_cache(Expires::hits(1));

        let first = cache.get_or_add(&"key".to_string(), |_: &String| Ok("own".to_string()));
        let second = cache.get(&"key".to_string());

        assert_eq!(first.unwrap(), "own");
        assert_eq!(second.unwrap(), "own");
        assert_eq!(cache.statistics().misses(), 1);
        assert_eq!(cache.statistics().hits(), 1);
    }

    /// A present key ignores the factory given to get_or_add.
    #[test]
    fn test_get_or_add_ignores_factory_for_present_key() {
        let cache = echo_cache(Expires::never());
        cache.add("key".to_string(), "stored".to_string());

        let value = cache.get_or_add(&"key".to_string(), |_: &String| Ok("unused".to_string()));

        assert_eq!(value.unwrap(), "stored");
    }

    #[test]
    fn test_get_or_add_without_default_factory() {
        let cache: OnDemandRefreshCache<String, String> =
            OnDemandRefreshCache::new(Expires::never());

        let value = cache.get_or_add(&"key".to_string(), |key: &String| Ok(key.to_uppercase()));

        assert_eq!(value.unwrap(), "KEY");
        assert!(cache.contains(&"key".to_string()));
    }

    #[test]
    fn test_concurrent_gets_of_missing_key() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let cache: Arc<OnDemandRefreshCache<u32, u32>> =
            Arc::new(OnDemandRefreshCache::with_factory(Expires::never(), move |key: &u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(key * 10)
            }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get(&7).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 70);
        }
        assert_eq!(cache.len(), 1);
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
