//! Batch eviction policies.
//!
//! A cleanup strategy is bound to one cache and decides which keys to remove in a single sweep.
//! The built-in policies are all [`GenericCleanupStrategy`] with a different ranking function,
//! built through the [`Cleanup`] constructors. Strategies hold their cache weakly, so registering
//! one with a [`Janitor`](crate::janitor::Janitor) never keeps a cache alive.

use std::cmp::Reverse;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::store::on_demand::OnDemandRefreshCache;
use crate::store::{CacheStore, EntryIterator};

/// How often the janitor runs a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupOptions {
    pub frequency: Duration,
}

impl CleanupOptions {
    pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new() -> Self {
        Self {
            frequency: Self::DEFAULT_FREQUENCY,
        }
    }

    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A sweep over one cache, run by the janitor at the strategy's frequency.
pub trait CleanupStrategy: Send + Sync {
    fn options(&self) -> &CleanupOptions;

    /// Runs one sweep. Returns whether every removal it attempted succeeded.
    fn perform_cleanup(&self) -> bool;

    /// True once the cache this strategy was built for has been dropped. The janitor prunes
    /// detached strategies.
    fn is_detached(&self) -> bool {
        false
    }
}

/// Picks the keys to evict from a snapshot of the cache's entries.
pub type Transform<Key, Value> =
    Box<dyn Fn(EntryIterator<'_, Key, Value>) -> Vec<Key> + Send + Sync>;

/// A cleanup strategy defined by a transform from the cache's entries to the keys to evict.
pub struct GenericCleanupStrategy<Key, Value> {
    cache: Weak<dyn CacheStore<Key, Value>>,
    transform: Transform<Key, Value>,
    options: CleanupOptions,
}

impl<Key, Value> GenericCleanupStrategy<Key, Value>
where
    Key: 'static,
    Value: 'static,
{
    pub fn new<C, F>(cache: &Arc<C>, transform: F) -> Self
    where
        C: CacheStore<Key, Value> + 'static,
        F: Fn(EntryIterator<'_, Key, Value>) -> Vec<Key> + Send + Sync + 'static,
    {
        let cache: Weak<C> = Arc::downgrade(cache);

        Self {
            cache,
            transform: Box::new(transform),
            options: CleanupOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CleanupOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.options.frequency = frequency;
        self
    }
}

impl<Key, Value> CleanupStrategy for GenericCleanupStrategy<Key, Value> {
    fn options(&self) -> &CleanupOptions {
        &self.options
    }

    fn perform_cleanup(&self) -> bool {
        let Some(cache) = self.cache.upgrade() else {
            return false;
        };
        cache.statistics().record_cleaning();

        let keys = (self.transform)(cache.entries());
        let attempted = keys.len();
        let all_removed = keys.iter().fold(true, |all_removed, key| {
            let removed = cache.remove(key);
            all_removed && removed
        });

        tracing::debug!(cache = %cache.id(), attempted, all_removed, "cleanup pass complete");
        all_removed
    }

    fn is_detached(&self) -> bool {
        self.cache.strong_count() == 0
    }
}

/// Regenerates the expired entries of an on-demand refresh cache instead of evicting them.
pub struct RefreshExpiredStrategy<Key, Value> {
    cache: Weak<OnDemandRefreshCache<Key, Value>>,
    options: CleanupOptions,
}

impl<Key, Value> RefreshExpiredStrategy<Key, Value> {
    pub fn with_options(mut self, options: CleanupOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.options.frequency = frequency;
        self
    }
}

impl<Key, Value> CleanupStrategy for RefreshExpiredStrategy<Key, Value>
where
    Key: Eq + Hash + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    fn options(&self) -> &CleanupOptions {
        &self.options
    }

    fn perform_cleanup(&self) -> bool {
        let Some(cache) = self.cache.upgrade() else {
            return false;
        };
        cache.statistics().record_cleaning();

        cache.refresh_expired().is_success()
    }

    fn is_detached(&self) -> bool {
        self.cache.strong_count() == 0
    }
}

/// Constructors for the built-in cleanup strategies.
///
/// Ranking ties keep the order the cache enumerates its entries in.
pub struct Cleanup;

impl Cleanup {
    /// Never removes anything.
    pub fn nothing<Key, Value, C>(cache: &Arc<C>) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, |_| Vec::new())
    }

    /// Removes the `count` entries with the fewest hits.
    pub fn least_popular<Key, Value, C>(
        cache: &Arc<C>,
        count: usize,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            let mut entries: Vec<_> = entries.collect();
            entries.sort_by_key(|(_, entry)| entry.hits());
            entries
                .into_iter()
                .take(count)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Keeps the `count` entries with the most hits and removes the rest.
    pub fn all_but_most_popular<Key, Value, C>(
        cache: &Arc<C>,
        count: usize,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            let mut entries: Vec<_> = entries.collect();
            entries.sort_by_key(|(_, entry)| Reverse(entry.hits()));
            entries
                .into_iter()
                .skip(count)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Removes the `count` entries that were read longest ago.
    pub fn least_recently_used<Key, Value, C>(
        cache: &Arc<C>,
        count: usize,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            let mut entries: Vec<_> = entries.collect();
            entries.sort_by_key(|(_, entry)| entry.last_touched());
            entries
                .into_iter()
                .take(count)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Keeps the `count` most recently read entries and removes the rest.
    pub fn all_but_most_recently_used<Key, Value, C>(
        cache: &Arc<C>,
        count: usize,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            let mut entries: Vec<_> = entries.collect();
            entries.sort_by_key(|(_, entry)| Reverse(entry.last_touched()));
            entries
                .into_iter()
                .skip(count)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Bounds the cache at `count` entries by removing the oldest ones.
    pub fn bounded_fifo<Key, Value, C>(
        cache: &Arc<C>,
        count: usize,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            let mut entries: Vec<_> = entries.collect();
            let excess = entries.len().saturating_sub(count);
            entries.sort_by_key(|(_, entry)| entry.created());
            entries
                .into_iter()
                .take(excess)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Bounds the cache at `count` entries by removing the newest ones.
    pub fn bounded_lifo<Key, Value, C>(
        cache: &Arc<C>,
        count: usize,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            let mut entries: Vec<_> = entries.collect();
            let excess = entries.len().saturating_sub(count);
            entries.sort_by_key(|(_, entry)| Reverse(entry.created()));
            entries
                .into_iter()
                .take(excess)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Removes every expired entry.
    pub fn expired<Key, Value, C>(cache: &Arc<C>) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, |entries| {
            entries
                .filter(|(_, entry)| entry.is_expired())
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Removes entries created more than `span` ago.
    pub fn older_than<Key, Value, C>(
        cache: &Arc<C>,
        span: Duration,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            entries
                .filter(|(_, entry)| entry.age() > span)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Removes entries created less than `span` ago.
    pub fn younger_than<Key, Value, C>(
        cache: &Arc<C>,
        span: Duration,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            entries
                .filter(|(_, entry)| entry.age() < span)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Removes entries that have not been read for more than `span`.
    pub fn not_used_in<Key, Value, C>(
        cache: &Arc<C>,
        span: Duration,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        GenericCleanupStrategy::new(cache, move |entries| {
            entries
                .filter(|(_, entry)| entry.idle() > span)
                .map(|(key, _)| key)
                .collect()
        })
    }

    /// Regenerates the expired entries of an on-demand refresh cache with their own factories.
    pub fn refresh_expired<Key, Value>(
        cache: &Arc<OnDemandRefreshCache<Key, Value>>,
    ) -> RefreshExpiredStrategy<Key, Value>
    where
        Key: Eq + Hash + Clone + Send + Sync + 'static,
        Value: Send + Sync + 'static,
    {
        RefreshExpiredStrategy {
            cache: Arc::downgrade(cache),
            options: CleanupOptions::default(),
        }
    }
}
