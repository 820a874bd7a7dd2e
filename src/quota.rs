use crate::clock::Clock;
use crate::models::{ProviderConfig, RateLimitKey};
use crate::rate_limit_store::RateLimitStore;
use serde::Serialize;
use std::sync::Arc;

/// Binds providers to their rate-limit keys in the shared store.
///
/// Both the selection preview and the executor's authoritative consumption go
/// through here so they always agree on the current bucket and window.
#[derive(Clone)]
pub struct ProviderQuota {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    window_seconds: u64,
}

/// Snapshot of a provider's consumption in its current bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    pub provider: String,
    pub bucket: String,
    pub count: u64,
    pub limit: Option<u32>,
}

impl ProviderQuota {
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>, window_seconds: u64) -> Self {
        Self {
            store,
            clock,
            window_seconds,
        }
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Key for `provider` in the current UTC hour bucket.
    pub fn current_key(&self, provider: &str) -> RateLimitKey {
        RateLimitKey::for_time(provider, self.clock.now())
    }

    /// Non-consuming eligibility preview.
    ///
    /// Unlimited providers always have capacity and never touch the store.
    pub async fn has_capacity(&self, provider: &ProviderConfig) -> bool {
        match provider.hourly_limit() {
            None => true,
            Some(limit) => {
                let count = self.store.get_count(&self.current_key(&provider.name)).await;
                count < u64::from(limit)
            }
        }
    }

    /// Authoritative, atomic consumption of one slot.
    pub async fn try_acquire(&self, provider: &ProviderConfig) -> bool {
        match provider.hourly_limit() {
            None => true,
            Some(limit) => {
                self.store
                    .try_consume(&self.current_key(&provider.name), limit, self.window_seconds)
                    .await
            }
        }
    }

    pub async fn usage(&self, provider: &ProviderConfig) -> ProviderUsage {
        let key = self.current_key(&provider.name);
        let count = self.store.get_count(&key).await;
        ProviderUsage {
            provider: provider.name.clone(),
            bucket: key.bucket().to_string(),
            count,
            limit: provider.hourly_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local_store::LocalRateLimitStore;
    use chrono::{Duration, TimeZone, Utc};

    fn quota() -> (ProviderQuota, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap());
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(LocalRateLimitStore::new(3600, clock_arc.clone()));
        (ProviderQuota::new(store, clock_arc, 3600), clock)
    }

    #[tokio::test]
    async fn test_preview_does_not_consume() {
        let (quota, _clock) = quota();
        let provider = ProviderConfig::new("apollo", 10).with_hourly_limit(1);

        for _ in 0..3 {
            assert!(quota.has_capacity(&provider).await);
        }
        assert_eq!(quota.usage(&provider).await.count, 0);

        assert!(quota.try_acquire(&provider).await);
        assert!(!quota.has_capacity(&provider).await);
        assert!(!quota.try_acquire(&provider).await);
    }

    #[tokio::test]
    async fn test_unlimited_provider_never_touches_store() {
        let (quota, _clock) = quota();
        let provider = ProviderConfig::new("hunter", 1);

        for _ in 0..100 {
            assert!(quota.try_acquire(&provider).await);
        }
        let usage = quota.usage(&provider).await;
        assert_eq!(usage.count, 0);
        assert_eq!(usage.limit, None);
    }

    #[tokio::test]
    async fn test_new_hour_starts_new_bucket() {
        let (quota, clock) = quota();
        let provider = ProviderConfig::new("apollo", 10).with_hourly_limit(1);

        assert!(quota.try_acquire(&provider).await);
        assert_eq!(quota.usage(&provider).await.bucket, "2024-05-01T10");

        clock.advance(Duration::minutes(50));
        assert_eq!(quota.usage(&provider).await.bucket, "2024-05-01T11");
        assert!(quota.try_acquire(&provider).await);
    }
}
