//! A thread-safe in-process cache with pluggable expiration and eviction.
//!
//! Three cache variants share the same entry bookkeeping and statistics:
//!
//! * [`CheckAndSetCache`]: callers add values and add them again once they expire.
//! * [`OnDemandRefreshCache`]: missing and expired values are produced by a factory when read.
//! * [`BackgroundRefreshCache`]: expired values are produced by a factory on a timer while reads
//!   keep serving the previous value.
//!
//! Whether an entry is stale is decided by an [`ExpirationStrategy`], usually one of the
//! [`Expires`] constructors. Which entries are physically removed is decided by a
//! [`CleanupStrategy`], usually one of the [`Cleanup`] constructors, run periodically by a
//! [`Janitor`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cache_janitor::{CheckAndSetCache, Cleanup, Expires, Janitor};
//!
//! # fn main() -> cache_janitor::CacheResult<()> {
//! let janitor = Janitor::new();
//! let expiry = Expires::time_span(Duration::from_secs(60));
//! let cache = Arc::new(CheckAndSetCache::<String, i32>::new(expiry));
//! janitor.register(&*cache, Cleanup::expired(&cache).with_frequency(Duration::from_secs(10)))?;
//!
//! cache.add("answer".to_string(), 42);
//! assert_eq!(cache.get(&"answer".to_string()), Some(42));
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod config;
pub mod entry;
pub mod error;
pub mod expiration;
pub mod janitor;
pub mod statistics;
pub mod store;

pub use cleanup::{
    Cleanup, CleanupOptions, CleanupStrategy, GenericCleanupStrategy, RefreshExpiredStrategy,
};
pub use config::{CacheSettings, CleanupConfig, ExpirationConfig};
pub use entry::{CachedEntry, ExpirationState};
pub use error::{CacheError, CacheResult, FactoryError};
pub use expiration::{ExpirationStrategy, Expires, SharedExpiration};
pub use janitor::Janitor;
pub use statistics::{CacheStatistics, StatisticsSnapshot};
pub use store::background_refresh::BackgroundRefreshCache;
pub use store::check_and_set::CheckAndSetCache;
pub use store::on_demand::OnDemandRefreshCache;
pub use store::{CacheId, CacheStore, Factory, RefreshOutcome};
