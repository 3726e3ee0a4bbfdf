//! In-process cache backend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::{CacheBackend, CacheError, CachedStatus};

struct Entry {
    value: CachedStatus,
    /// `None` when the TTL is too large to represent; such entries never expire.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// TTL map guarded by a read-write lock. Expired entries are invisible to
/// reads and removed by [`CacheBackend::purge_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires, if it is present and fresh.
    pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        match entry.expires_at {
            Some(at) => at.checked_duration_since(Instant::now()),
            None => Some(Duration::MAX),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("memory cache lock poisoned".to_string())
}

impl CacheBackend for MemoryCache {
    fn set(&self, key: &str, value: CachedStatus, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if ttl.is_zero() {
            entries.remove(key);
            return Ok(());
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );
        Ok(())
    }

    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CachedStatus>>, CacheError> {
        let entries = self.entries.read().map_err(poisoned)?;
        let now = Instant::now();

        Ok(keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|entry| entry.is_fresh(now))
                    .map(|entry| entry.value.clone())
            })
            .collect())
    }

    fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CheckStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn value() -> CachedStatus {
        CachedStatus {
            site_id: Uuid::new_v4(),
            status: CheckStatus::Up,
            status_code: Some(200),
            response_time_ms: Some(10),
            ssl_valid: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("a", value(), Duration::from_millis(30)).unwrap();
        cache.set("b", value(), Duration::from_secs(60)).unwrap();

        std::thread::sleep(Duration::from_millis(60));

        let values = cache.get_many(&["a".to_string(), "b".to_string()]).unwrap();
        assert!(values[0].is_none());
        assert!(values[1].is_some());
        assert!(cache.ttl_remaining("a").is_none());

        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_clears_entry() {
        let cache = MemoryCache::new();
        cache.set("a", value(), Duration::from_secs(60)).unwrap();
        cache.set("a", value(), Duration::ZERO).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_remaining_bounded_by_ttl() {
        let cache = MemoryCache::new();
        cache.set("a", value(), Duration::from_secs(120)).unwrap();
        let ttl = cache.ttl_remaining("a").unwrap();
        assert!(ttl <= Duration::from_secs(120));
        assert!(ttl > Duration::from_secs(110));
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let cache = MemoryCache::new();
        cache.set("a", value(), Duration::from_secs(u64::MAX)).unwrap();

        assert!(cache.get_many(&["a".to_string()]).unwrap()[0].is_some());
        assert_eq!(cache.ttl_remaining("a"), Some(Duration::MAX));
        assert_eq!(cache.purge_expired().unwrap(), 0);
    }
}
