use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::expiration::{Expires, SharedExpiration};

// Ordered so that `fetch_max` can only move an entry towards `EXPIRED`.
const UNCHECKED: u8 = 0;
const FRESH: u8 = 1;
const EXPIRED: u8 = 2;

/// Last known verdict of an entry's expiration strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationState {
    /// The strategy has not been consulted yet.
    Unchecked,
    /// The last evaluation reported the entry as live. It is evaluated again on the next check.
    Fresh,
    /// The entry was observed expired. This state is terminal.
    Expired,
}

/// A cached value plus the bookkeeping used by expiration and cleanup strategies.
///
/// The value itself is immutable; updating a key replaces the whole entry. Reads go through
/// [`CachedEntry::read`], which bumps the hit counter and the last-touched timestamp. Both are
/// atomics so that a shared `Arc<CachedEntry>` can be read from any thread while a cleanup pass
/// ranks the same entry.
pub struct CachedEntry<Value> {
    value: Value,
    created: Instant,
    /// Nanoseconds between `created` and the last read. Never decreases.
    touched: AtomicU64,
    hits: AtomicU64,
    state: AtomicU8,
    strategy: SharedExpiration<Value>,
}

impl<Value> CachedEntry<Value> {
    pub fn new(value: Value, strategy: SharedExpiration<Value>) -> Self {
        Self::with_state(value, strategy, UNCHECKED)
    }

    /// Wraps a value that is already considered expired, regardless of what the strategy says.
    pub fn new_expired(value: Value, strategy: SharedExpiration<Value>) -> Self {
        Self::with_state(value, strategy, EXPIRED)
    }

    /// Wraps a value that never expires.
    pub fn never_expiring(value: Value) -> Self
    where
        Value: 'static,
    {
        Self::new(value, Expires::never())
    }

    fn with_state(value: Value, strategy: SharedExpiration<Value>, state: u8) -> Self {
        Self {
            value,
            created: Instant::now(),
            touched: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            state: AtomicU8::new(state),
            strategy,
        }
    }

    /// Returns the value and records the access.
    pub fn read(&self) -> &Value {
        self.hits.fetch_add(1, Ordering::Relaxed);
        let offset = u64::try_from(self.created.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.touched.fetch_max(offset, Ordering::Relaxed);

        &self.value
    }

    /// Returns the value without touching the bookkeeping. Strategies use this so that
    /// inspecting an entry does not skew the recency and popularity rankings.
    pub fn peek(&self) -> &Value {
        &self.value
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn last_touched(&self) -> Instant {
        self.created + Duration::from_nanos(self.touched.load(Ordering::Relaxed))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Time elapsed since the entry was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Time elapsed since the entry was last read (or created, if never read).
    pub fn idle(&self) -> Duration {
        self.last_touched().elapsed()
    }

    /// Evaluates the expiration strategy.
    ///
    /// Only the expired verdict is latched: once an entry has been observed expired it stays
    /// expired, while a live verdict is recomputed on every call.
    pub fn is_expired(&self) -> bool {
        if self.state.load(Ordering::Acquire) == EXPIRED {
            return true;
        }

        let expired = self.strategy.is_expired(self);
        let verdict = if expired { EXPIRED } else { FRESH };
        let previous = self.state.fetch_max(verdict, Ordering::AcqRel);

        expired || previous == EXPIRED
    }

    /// Forces the entry into the expired state.
    pub fn expire(&self) {
        self.state.store(EXPIRED, Ordering::Release);
    }

    pub fn expiration_state(&self) -> ExpirationState {
        match self.state.load(Ordering::Acquire) {
            UNCHECKED => ExpirationState::Unchecked,
            FRESH => ExpirationState::Fresh,
            _ => ExpirationState::Expired,
        }
    }
}

impl<Value: Default + 'static> CachedEntry<Value> {
    /// The placeholder used when a key is known but its value has not been produced yet:
    /// a default value that is expired from the start.
    pub fn expired_default() -> Self {
        Self::new_expired(Value::default(), Expires::always())
    }
}

impl<Value: fmt::Debug> fmt::Debug for CachedEntry<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedEntry")
            .field("value", &self.value)
            .field("created", &self.created)
            .field("last_touched", &self.last_touched())
            .field("hits", &self.hits())
            .field("state", &self.expiration_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    /// A fresh entry starts with no hits and an untouched timestamp equal to its creation.
    #[test]
    fn test_new_entry_bookkeeping() {
        let entry = CachedEntry::never_expiring("value");

        assert_eq!(entry.hits(), 0);
        assert_eq!(entry.created(), entry.last_touched());
        assert_eq!(entry.expiration_state(), ExpirationState::Unchecked);
    }

    /// Reading bumps hits and moves the last-touched timestamp forward.
    #[test]
    fn test_read_updates_hits_and_touch() {
        let entry = CachedEntry::never_expiring(7);

        thread::sleep(Duration::from_millis(5));
        assert_eq!(*entry.read(), 7);
        assert_eq!(*entry.read(), 7);

        assert_eq!(entry.hits(), 2);
        assert!(entry.last_touched() > entry.created());
    }

    #[test]
    fn test_peek_leaves_bookkeeping_alone() {
        let entry = CachedEntry::never_expiring(7);

        assert_eq!(*entry.peek(), 7);
        assert_eq!(entry.hits(), 0);
        assert_eq!(entry.last_touched(), entry.created());
    }

    /// Once observed expired, an entry stays expired even if the strategy flips back.
    #[test]
    fn test_expired_state_is_sticky() {
        let flag = Arc::new(AtomicBool::new(true));
        let condition = Arc::clone(&flag);
        let strategy = Expires::when(move || condition.load(Ordering::SeqCst));
        let entry = CachedEntry::new("value", strategy);

        assert!(entry.is_expired());
        flag.store(false, Ordering::SeqCst);
        assert!(entry.is_expired());
        assert_eq!(entry.expiration_state(), ExpirationState::Expired);
    }

    /// A live verdict is not latched and gets recomputed.
    #[test]
    fn test_fresh_state_is_reevaluated() {
        let flag = Arc::new(AtomicBool::new(false));
        let condition = Arc::clone(&flag);
        let strategy = Expires::when(move || condition.load(Ordering::SeqCst));
        let entry = CachedEntry::new("value", strategy);

        assert!(!entry.is_expired());
        assert_eq!(entry.expiration_state(), ExpirationState::Fresh);

        flag.store(true, Ordering::SeqCst);
        assert!(entry.is_expired());
    }

    #[test]
    fn test_forced_expiration() {
        let entry = CachedEntry::new_expired(1, Expires::never());
        assert!(entry.is_expired());

        let entry = CachedEntry::never_expiring(1);
        entry.expire();
        assert!(entry.is_expired());
    }

    #[test]
    fn test_expired_default_sentinel() {
        let entry: CachedEntry<String> = CachedEntry::expired_default();

        assert!(entry.is_expired());
        assert_eq!(entry.peek(), "");
    }

    /// Concurrent reads never lose hits.
    #[test]
    fn test_concurrent_reads_count_every_hit() {
        let entry = Arc::new(CachedEntry::never_expiring(1u32));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let entry = Arc::clone(&entry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        entry.read();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(entry.hits(), 800);
        assert!(entry.created() <= entry.last_touched());
    }
}
