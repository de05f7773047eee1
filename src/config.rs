//! Strategy selection from configuration documents.
//!
//! Expiration and cleanup strategies are described by tagged JSON objects such as
//! `{"kind": "time_span", "seconds": 30}` or `{"kind": "lru", "count": 100}`. Only the
//! check-and-set cache can be built from settings: the refresh caches need factories, which
//! cannot be expressed in a document.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cleanup::{Cleanup, CleanupOptions, GenericCleanupStrategy};
use crate::error::CacheResult;
use crate::expiration::{Expires, SharedExpiration};
use crate::janitor::Janitor;
use crate::store::check_and_set::CheckAndSetCache;
use crate::store::CacheStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpirationConfig {
    Always,
    #[default]
    Never,
    TimeSpan {
        seconds: u64,
    },
    Hits {
        count: u64,
    },
    NextDay,
    At {
        time: DateTime<Utc>,
    },
    NotUsedIn {
        seconds: u64,
    },
}

impl ExpirationConfig {
    pub fn build<Value: 'static>(&self) -> SharedExpiration<Value> {
        match *self {
            Self::Always => Expires::always(),
            Self::Never => Expires::never(),
            Self::TimeSpan { seconds } => Expires::time_span(Duration::from_secs(seconds)),
            Self::Hits { count } => Expires::hits(count),
            Self::NextDay => Expires::next_day(),
            Self::At { time } => Expires::at(time),
            Self::NotUsedIn { seconds } => Expires::not_used_in(Duration::from_secs(seconds)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CleanupConfig {
    Nothing,
    Lru {
        count: usize,
    },
    /// Keeps the `count` most recently used entries.
    Mru {
        count: usize,
    },
    LeastPopular {
        count: usize,
    },
    AllButMostPopular {
        count: usize,
    },
    BoundedFifo {
        count: usize,
    },
    BoundedLifo {
        count: usize,
    },
    #[default]
    Expired,
    OlderThan {
        seconds: u64,
    },
    YoungerThan {
        seconds: u64,
    },
    NotUsedIn {
        seconds: u64,
    },
}

impl CleanupConfig {
    pub fn build<Key, Value, C>(
        &self,
        cache: &Arc<C>,
        options: CleanupOptions,
    ) -> GenericCleanupStrategy<Key, Value>
    where
        Key: 'static,
        Value: 'static,
        C: CacheStore<Key, Value> + 'static,
    {
        let strategy = match *self {
            Self::Nothing => Cleanup::nothing(cache),
            Self::Lru { count } => Cleanup::least_recently_used(cache, count),
            Self::Mru { count } => Cleanup::all_but_most_recently_used(cache, count),
            Self::LeastPopular { count } => Cleanup::least_popular(cache, count),
            Self::AllButMostPopular { count } => Cleanup::all_but_most_popular(cache, count),
            Self::BoundedFifo { count } => Cleanup::bounded_fifo(cache, count),
            Self::BoundedLifo { count } => Cleanup::bounded_lifo(cache, count),
            Self::Expired => Cleanup::expired(cache),
            Self::OlderThan { seconds } => Cleanup::older_than(cache, Duration::from_secs(seconds)),
            Self::YoungerThan { seconds } => {
                Cleanup::younger_than(cache, Duration::from_secs(seconds))
            }
            Self::NotUsedIn { seconds } => {
                Cleanup::not_used_in(cache, Duration::from_secs(seconds))
            }
        };

        strategy.with_options(options)
    }
}

/// Settings for a check-and-set cache and the cleanup the janitor runs on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub expiration: ExpirationConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Cleanup frequency in milliseconds. Defaults to once a day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_ms: Option<u64>,
}

impl CacheSettings {
    pub fn from_json(json: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn options(&self) -> CleanupOptions {
        match self.frequency_ms {
            Some(millis) => CleanupOptions::new().with_frequency(Duration::from_millis(millis)),
            None => CleanupOptions::new(),
        }
    }

    /// Builds the cache and registers its cleanup strategy with `janitor`.
    pub fn build<Key, Value>(
        &self,
        janitor: &Janitor,
    ) -> CacheResult<Arc<CheckAndSetCache<Key, Value>>>
    where
        Key: Eq + Hash + Clone + Send + Sync + 'static,
        Value: Send + Sync + 'static,
    {
        let cache = Arc::new(CheckAndSetCache::new(self.expiration.build()));
        let strategy = self.cleanup.build(&cache, self.options());
        janitor.register(&*cache, strategy)?;

        tracing::debug!(
            cache = %cache.id(),
            expiration = ?self.expiration,
            cleanup = ?self.cleanup,
            "cache built from settings"
        );
        Ok(cache)
    }
}
