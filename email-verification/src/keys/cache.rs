//! Read-through cache with time-based expiry and a size cap.
//!
//! Values are stored as immutable [`Arc`] snapshots and replaced wholesale
//! on refresh; readers clone the `Arc` and never hold the lock while they
//! use the value. An entry past its expiry is never returned.
//!
//! Keys are URLs that a requester can influence, so the cache is bounded:
//! every insert drops expired entries, and once `capacity` live entries are
//! stored the least recently used one is evicted.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use lru::LruCache;

/// Default maximum number of cached documents.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Expiry used when `now + ttl` does not fit in an [`Instant`].
const SATURATED_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    expires: Instant,
}

/// Cache keyed by URL (or any string) with a fixed time-to-live.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use email_verification::keys::TtlCache;
///
/// let cache = TtlCache::new(Duration::from_secs(300));
/// cache.insert("https://issuer.example/jwks.json", 42);
///
/// assert_eq!(cache.get("https://issuer.example/jwks.json").as_deref(), Some(&42));
/// assert!(cache.get("https://other.example/jwks.json").is_none());
/// ```
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
}

impl<V> TtlCache<V> {
    /// Creates an empty cache holding up to [`DEFAULT_CACHE_CAPACITY`]
    /// entries that live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates an empty cache holding up to `capacity` entries (at least
    /// one) that live for `ttl`.
    #[must_use]
    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)), ttl }
    }

    /// Returns the time-to-live applied to new entries.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the maximum number of stored entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Returns the cached value for `key` if it has not expired.
    ///
    /// An expired entry is removed on lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires {
            return Some(Arc::clone(&entry.value));
        }
        entries.pop(key);
        None
    }

    /// Stores `value` under `key`, replacing any previous snapshot, and
    /// returns the shared snapshot.
    ///
    /// Expired entries are dropped first; if the cache is still full the
    /// least recently used entry is evicted.
    pub fn insert(&self, key: &str, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let now = Instant::now();
        let expires = now
            .checked_add(self.ttl)
            .or_else(|| now.checked_add(SATURATED_TTL))
            .unwrap_or(now);

        let mut entries = self.lock();
        purge(&mut entries, now);
        entries.put(key.to_owned(), Entry { value: Arc::clone(&value), expires });
        value
    }

    /// Drops `key` from the cache.
    pub fn invalidate(&self, key: &str) {
        self.lock().pop(key);
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        purge(&mut self.lock(), Instant::now())
    }

    /// Returns the number of stored entries, expired ones not yet purged
    /// included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry<V>>> {
        // Entries are immutable, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn purge<V>(entries: &mut LruCache<String, Entry<V>>, now: Instant) -> usize {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| entry.expires <= now)
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        entries.pop(key);
    }
    expired.len()
}
