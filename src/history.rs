use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::{error::NotifyError, model::NotificationEntry, registry::NotificationRegistry};

struct CachedPage {
    entries: Vec<NotificationEntry>,
    fetched_at: Instant,
}

/// Foreground read model of the backend's notification log.
///
/// Served from memory while fresh; `invalidate` marks it stale so the next
/// read refetches. Staleness only delays visibility of new entries, it
/// never shows wrong ones. Process-lifetime only, nothing persisted.
pub struct HistoryCache {
    ttl: Duration,
    cached: Mutex<Option<CachedPage>>,
}

impl HistoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Must run after every successful register/unregister. Safe to call
    /// redundantly.
    pub fn invalidate(&self) {
        let mut guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::debug!("notification history invalidated");
        }
    }

    /// Returns the history newest-first, from cache while fresh. Two
    /// concurrent misses may both fetch; the second write wins and both see
    /// consistent data, so no cross-await locking is needed.
    pub async fn fetch(
        &self,
        registry: &dyn NotificationRegistry,
    ) -> Result<Vec<NotificationEntry>, NotifyError> {
        {
            let guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(page) = guard.as_ref() {
                if page.fetched_at.elapsed() < self.ttl {
                    return Ok(page.entries.clone());
                }
            }
        }

        let entries = registry.fetch_history().await?;
        let mut guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(CachedPage {
            entries: entries.clone(),
            fetched_at: Instant::now(),
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryToken, DeviceType};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRegistry {
        fetches: AtomicUsize,
    }

    impl CountingRegistry {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationRegistry for CountingRegistry {
        async fn register(
            &self,
            _token: &DeliveryToken,
            _device_type: DeviceType,
        ) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn unregister(&self, _token: &DeliveryToken) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn fetch_history(&self) -> Result<Vec<NotificationEntry>, NotifyError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![NotificationEntry {
                id: "n1".to_string(),
                title: "t".to_string(),
                body: "b".to_string(),
                payload: HashMap::new(),
                received_at: Utc.timestamp_opt(100, 0).unwrap(),
            }])
        }
    }

    #[tokio::test]
    async fn fresh_cache_serves_without_refetch() {
        let cache = HistoryCache::new(Duration::from_secs(60));
        let registry = CountingRegistry::new();

        let first = cache.fetch(&registry).await.unwrap();
        let second = cache.fetch(&registry).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.fetch_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = HistoryCache::new(Duration::from_secs(60));
        let registry = CountingRegistry::new();

        cache.fetch(&registry).await.unwrap();
        cache.invalidate();
        cache.invalidate(); // redundant call is fine
        cache.fetch(&registry).await.unwrap();
        assert_eq!(registry.fetch_count(), 2);
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let cache = HistoryCache::new(Duration::from_secs(0));
        let registry = CountingRegistry::new();

        cache.fetch(&registry).await.unwrap();
        cache.fetch(&registry).await.unwrap();
        assert_eq!(registry.fetch_count(), 2);
    }
}
