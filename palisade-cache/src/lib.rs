use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A thread-safe TTL cache backed by `DashMap`.
///
/// Each entry carries its own expiry instant; expired entries are evicted
/// lazily on access and in bulk via [`TtlCache::evict_expired`]. Values are
/// cloned out, so keep them cheap to clone (small structs or `Arc`s).
#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<DashMap<K, Entry<V>>>,
    default_ttl: Duration,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache whose entries live for `default_ttl` after insertion.
    pub fn new(default_ttl: Duration) -> Self {
        TtlCache {
            inner: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    /// Get a cached value if it exists and hasn't expired.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.inner.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
            // Expired — drop the read guard before removing
            drop(entry);
            self.inner.remove(key);
        }
        None
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Insert with an explicit TTL, overriding the default.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.inner.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Get the cached value, or compute and cache it with the default TTL.
    pub fn get_or_insert_with(&self, key: K, f: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = f();
        self.insert(key, value.clone());
        value
    }

    pub fn remove(&self, key: &K) {
        self.inner.remove(key);
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Drop every expired entry. Intended for a periodic sweep task.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn hit_and_miss() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("key", 1u32);
        assert_eq!(cache.get(&"key"), Some(1));
        assert_eq!(cache.get(&"other"), None);
    }

    #[test]
    fn entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(40));
        cache.insert("key", 1u32);
        assert_eq!(cache.get(&"key"), Some(1));
        sleep(Duration::from_millis(50));
        assert_eq!(cache.get(&"key"), None);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert_with_ttl("key", 1u32, Duration::from_secs(60));
        sleep(Duration::from_millis(20));
        assert_eq!(cache.get(&"key"), Some(1));
    }

    #[test]
    fn get_or_insert_with_computes_once() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let first = cache.get_or_insert_with("key", || 1u32);
        let second = cache.get_or_insert_with("key", || 2u32);
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert("a", 1u32);
        cache.insert_with_ttl("b", 2u32, Duration::from_secs(60));
        sleep(Duration::from_millis(20));
        cache.evict_expired();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
