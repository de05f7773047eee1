use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, Utc};

use crate::entry::CachedEntry;

/// Decides whether a cached entry is stale.
///
/// One strategy instance is shared by every entry of a cache. Any
/// `Fn(&CachedEntry<Value>) -> bool` closure is a strategy.
pub trait ExpirationStrategy<Value>: Send + Sync {
    fn is_expired(&self, entry: &CachedEntry<Value>) -> bool;
}

impl<Value, F> ExpirationStrategy<Value> for F
where
    F: Fn(&CachedEntry<Value>) -> bool + Send + Sync,
{
    fn is_expired(&self, entry: &CachedEntry<Value>) -> bool {
        self(entry)
    }
}

pub type SharedExpiration<Value> = Arc<dyn ExpirationStrategy<Value>>;

/// Constructors for the built-in expiration strategies.
pub struct Expires;

impl Expires {
    /// Builds a strategy from an arbitrary predicate over the entry.
    pub fn matching<Value, F>(predicate: F) -> SharedExpiration<Value>
    where
        Value: 'static,
        F: Fn(&CachedEntry<Value>) -> bool + Send + Sync + 'static,
    {
        Arc::new(predicate)
    }

    /// Every entry is expired as soon as it is checked.
    pub fn always<Value: 'static>() -> SharedExpiration<Value> {
        Self::matching(|_| true)
    }

    pub fn never<Value: 'static>() -> SharedExpiration<Value> {
        Self::matching(|_| false)
    }

    /// Expires once `span` has elapsed since the entry was created.
    pub fn time_span<Value: 'static>(span: Duration) -> SharedExpiration<Value> {
        Self::matching(move |entry| entry.age() >= span)
    }

    /// Expires once the entry has been read `count` times.
    pub fn hits<Value: 'static>(count: u64) -> SharedExpiration<Value> {
        Self::matching(move |entry| entry.hits() >= count)
    }

    /// Expires once the entry has gone unread for `span`.
    pub fn not_used_in<Value: 'static>(span: Duration) -> SharedExpiration<Value> {
        Self::matching(move |entry| entry.idle() >= span)
    }

    /// Expires whenever an external condition holds, independently of the entry.
    pub fn when<Value, F>(condition: F) -> SharedExpiration<Value>
    where
        Value: 'static,
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::matching(move |_| condition())
    }

    /// Expires once the local calendar day the entry was created on is over.
    pub fn next_day<Value: 'static>() -> SharedExpiration<Value> {
        Self::matching(|entry| {
            let now = Local::now();
            let age = chrono::Duration::from_std(entry.age())
                .unwrap_or_else(|_| chrono::Duration::zero());

            now.date_naive() > (now - age).date_naive()
        })
    }

    /// Expires from a fixed point in time onwards.
    pub fn at<Value: 'static>(deadline: DateTime<Utc>) -> SharedExpiration<Value> {
        Self::matching(move |_| Utc::now() >= deadline)
    }

    /// Expires every day once the local wall clock reaches `time`, until midnight.
    pub fn daily_at<Value: 'static>(time: NaiveTime) -> SharedExpiration<Value> {
        Self::matching(move |_| Local::now().time() >= time)
    }
}
