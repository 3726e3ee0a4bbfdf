//! Status cache: the most recent known status per site, with a TTL.
//!
//! The cache is advisory. Backend failures are logged and read as misses,
//! and every miss path in the service has a durable-storage fallback, so
//! losing the cache only costs latency.

mod memory;

pub use memory::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{CheckResult, CheckStatus};

/// Cache error types. These never escape [`StatusCache`].
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// The cached view of a site's latest check.
///
/// Only built from a [`CheckResult`] that was actually recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStatus {
    pub site_id: Uuid,
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub ssl_valid: Option<bool>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl From<&CheckResult> for CachedStatus {
    fn from(result: &CheckResult) -> Self {
        Self {
            site_id: result.site_id,
            status: result.status,
            status_code: result.status_code,
            response_time_ms: result.response_time_ms,
            ssl_valid: result.ssl_valid,
            error: result.error.clone(),
            checked_at: result.checked_at,
        }
    }
}

/// Storage behind the status cache.
pub trait CacheBackend: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: CachedStatus, ttl: Duration) -> Result<(), CacheError>;

    /// One lookup per key, aligned with `keys`; `None` for a miss.
    fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CachedStatus>>, CacheError>;

    /// Drop expired entries. Backends that expire on their own can ignore this.
    fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

/// Cache key for a site.
pub fn cache_key(site_id: Uuid) -> String {
    format!("status:{}", site_id)
}

/// Shared, last-writer-wins status cache.
#[derive(Clone)]
pub struct StatusCache {
    backend: Arc<dyn CacheBackend>,
}

impl StatusCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }

    /// Store a site's status for `ttl`. Failures are logged, never returned.
    pub fn put(&self, site_id: Uuid, status: CachedStatus, ttl: Duration) {
        if let Err(e) = self.backend.set(&cache_key(site_id), status, ttl) {
            tracing::warn!("Status cache write failed for {}: {}", site_id, e);
        }
    }

    pub fn get(&self, site_id: Uuid) -> Option<CachedStatus> {
        self.get_many(&[site_id]).into_iter().next().flatten()
    }

    /// Batched lookup. The result always has one slot per input id, in order.
    pub fn get_many(&self, site_ids: &[Uuid]) -> Vec<Option<CachedStatus>> {
        if site_ids.is_empty() {
            return Vec::new();
        }

        let keys: Vec<String> = site_ids.iter().map(|id| cache_key(*id)).collect();
        match self.backend.get_many(&keys) {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                tracing::warn!(
                    "Status cache returned {} values for {} keys, treating as misses",
                    values.len(),
                    keys.len()
                );
                vec![None; keys.len()]
            }
            Err(e) => {
                tracing::warn!("Status cache read failed, treating as misses: {}", e);
                vec![None; keys.len()]
            }
        }
    }

    /// Serve from cache; on a miss, pull from durable storage and repopulate
    /// with the short `fallback_ttl`.
    ///
    /// Concurrent misses for the same site may each call `pull_from_db`; the
    /// short TTL only bounds how long that window lasts after an expiry.
    pub async fn get_with_fallback<F, Fut, E>(
        &self,
        site_id: Uuid,
        pull_from_db: F,
        fallback_ttl: Duration,
    ) -> Result<Option<CachedStatus>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<CachedStatus>, E>>,
    {
        if let Some(hit) = self.get(site_id) {
            return Ok(Some(hit));
        }

        let pulled = pull_from_db().await?;
        if let Some(status) = &pulled {
            tracing::debug!("Status cache miss for {}, repopulated from storage", site_id);
            self.put(site_id, status.clone(), fallback_ttl);
        }
        Ok(pulled)
    }

    pub fn purge_expired(&self) -> usize {
        match self.backend.purge_expired() {
            Ok(purged) => purged,
            Err(e) => {
                tracing::warn!("Status cache purge failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn status_for(site_id: Uuid, status: CheckStatus) -> CachedStatus {
        CachedStatus {
            site_id,
            status,
            status_code: Some(200),
            response_time_ms: Some(120),
            ssl_valid: Some(true),
            error: None,
            checked_at: Utc::now(),
        }
    }

    /// A backend whose server is gone.
    struct DownBackend;

    impl CacheBackend for DownBackend {
        fn set(&self, _key: &str, _value: CachedStatus, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        fn get_many(&self, _keys: &[String]) -> Result<Vec<Option<CachedStatus>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn test_put_overwrites() {
        let cache = StatusCache::in_memory();
        let site = Uuid::new_v4();

        cache.put(site, status_for(site, CheckStatus::Up), Duration::from_secs(60));
        cache.put(site, status_for(site, CheckStatus::Down), Duration::from_secs(60));

        assert_eq!(cache.get(site).unwrap().status, CheckStatus::Down);
    }

    #[test]
    fn test_get_many_is_aligned() {
        let cache = StatusCache::in_memory();
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        cache.put(ids[1], status_for(ids[1], CheckStatus::Up), Duration::from_secs(60));
        cache.put(ids[3], status_for(ids[3], CheckStatus::Down), Duration::from_secs(60));

        let values = cache.get_many(&ids);
        assert_eq!(values.len(), 4);
        assert!(values[0].is_none());
        assert_eq!(values[1].as_ref().unwrap().site_id, ids[1]);
        assert!(values[2].is_none());
        assert_eq!(values[3].as_ref().unwrap().status, CheckStatus::Down);

        assert!(cache.get_many(&[]).is_empty());
    }

    #[test]
    fn test_unavailable_backend_reads_as_miss() {
        let cache = StatusCache::new(Arc::new(DownBackend));
        let site = Uuid::new_v4();

        cache.put(site, status_for(site, CheckStatus::Up), Duration::from_secs(60));
        assert_eq!(cache.get_many(&[site, Uuid::new_v4()]), vec![None, None]);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_fallback_hit_skips_storage() {
        let cache = StatusCache::in_memory();
        let site = Uuid::new_v4();
        cache.put(site, status_for(site, CheckStatus::Up), Duration::from_secs(60));

        let pulls = AtomicUsize::new(0);
        let value = cache
            .get_with_fallback(
                site,
                || async {
                    pulls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(None)
                },
                Duration::from_secs(120),
            )
            .await
            .unwrap();

        assert!(value.is_some());
        assert_eq!(pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_repopulates_with_short_ttl() {
        let backend = Arc::new(MemoryCache::new());
        let cache = StatusCache::new(backend.clone());
        let site = Uuid::new_v4();
        let stored = status_for(site, CheckStatus::Down);
        let fallback_ttl = Duration::from_secs(120);

        let value = cache
            .get_with_fallback(site, || async { Ok::<_, CacheError>(Some(stored.clone())) }, fallback_ttl)
            .await
            .unwrap();
        assert_eq!(value, Some(stored.clone()));

        let ttl = backend.ttl_remaining(&cache_key(site)).unwrap();
        assert!(ttl <= fallback_ttl);
        assert_eq!(cache.get(site), Some(stored));
    }

    #[tokio::test]
    async fn test_fallback_miss_everywhere() {
        let cache = StatusCache::in_memory();
        let site = Uuid::new_v4();

        let value = cache
            .get_with_fallback(site, || async { Ok::<_, CacheError>(None) }, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(value.is_none());
        assert!(cache.get(site).is_none());
    }

    #[tokio::test]
    async fn test_fallback_storage_error_propagates() {
        let cache = StatusCache::new(Arc::new(DownBackend));
        let result = cache
            .get_with_fallback(
                Uuid::new_v4(),
                || async { Err::<Option<CachedStatus>, _>(CacheError::Unavailable("db down".to_string())) },
                Duration::from_secs(120),
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_cached_status_from_check_result() {
        let result = CheckResult {
            site_id: Uuid::new_v4(),
            status: CheckStatus::Down,
            status_code: Some(503),
            response_time_ms: Some(120),
            error: Some("HTTP 503 Service Unavailable".to_string()),
            ssl_valid: Some(true),
            checked_at: Utc::now(),
        };
        let cached = CachedStatus::from(&result);
        assert_eq!(cached.site_id, result.site_id);
        assert_eq!(cached.response_time_ms, Some(120));
        assert_eq!(cached.error.as_deref(), Some("HTTP 503 Service Unavailable"));
        assert_eq!(cached.checked_at, result.checked_at);

        let json = serde_json::to_value(&cached).unwrap();
        assert_eq!(json["error"], "HTTP 503 Service Unavailable");
    }
}
