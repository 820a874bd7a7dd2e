use crate::filters::EligibilityFilter;
use crate::models::{ProviderConfig, SelectionContext};
use crate::quota::ProviderQuota;

/// Ordered chain of eligibility filters followed by a priority sort.
///
/// Filters run in registration order, so register cheap in-memory checks
/// before the store-backed rate-limit preview.
#[derive(Clone, Default)]
pub struct SelectionPipeline {
    filters: Vec<EligibilityFilter>,
}

impl SelectionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled → Tier → RateLimit.
    pub fn standard(quota: ProviderQuota) -> Self {
        Self::new()
            .add_filter(EligibilityFilter::Enabled)
            .add_filter(EligibilityFilter::Tier)
            .add_filter(EligibilityFilter::RateLimit(quota))
    }

    pub fn add_filter(mut self, filter: EligibilityFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(EligibilityFilter::name).collect()
    }

    /// Returns the eligible providers, highest priority first.
    ///
    /// `providers` is treated as a fixed snapshot for the whole call.
    pub async fn execute(
        &self,
        providers: &[ProviderConfig],
        context: &SelectionContext,
    ) -> Vec<ProviderConfig> {
        let mut eligible = providers.to_vec();
        for filter in &self.filters {
            if eligible.is_empty() {
                break;
            }
            let before = eligible.len();
            eligible = filter.apply(&eligible, context).await;
            tracing::debug!(
                filter = filter.name(),
                before,
                after = eligible.len(),
                "Applied eligibility filter"
            );
        }

        sort_by_priority(&mut eligible);
        eligible
    }
}

/// Stable descending sort by priority; ties keep their input order.
pub fn sort_by_priority(providers: &mut [ProviderConfig]) {
    providers.sort_by(|a, b| b.priority.cmp(&a.priority));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::local_store::LocalRateLimitStore;
    use crate::models::UserTier;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn names(providers: &[ProviderConfig]) -> Vec<&str> {
        providers.iter().map(|p| p.name.as_str()).collect()
    }

    fn standard_pipeline() -> (SelectionPipeline, ProviderQuota) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(LocalRateLimitStore::new(3600, clock.clone()));
        let quota = ProviderQuota::new(store, clock, 3600);
        (SelectionPipeline::standard(quota.clone()), quota)
    }

    #[test]
    fn test_sort_is_descending_and_stable() {
        let mut providers = vec![
            ProviderConfig::new("low", 1),
            ProviderConfig::new("tie-first", 5),
            ProviderConfig::new("high", 9),
            ProviderConfig::new("tie-second", 5),
        ];
        sort_by_priority(&mut providers);
        assert_eq!(
            names(&providers),
            vec!["high", "tie-first", "tie-second", "low"]
        );
    }

    #[test]
    fn test_standard_pipeline_filter_order() {
        let (pipeline, _) = standard_pipeline();
        assert_eq!(pipeline.filter_names(), vec!["enabled", "tier", "rate_limit"]);
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_output() {
        let (pipeline, _) = standard_pipeline();
        let out = pipeline.execute(&[], &SelectionContext::default()).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_filters_then_sorts() {
        let (pipeline, quota) = standard_pipeline();
        let exhausted = ProviderConfig::new("exhausted", 100).with_hourly_limit(1);
        let providers = vec![
            ProviderConfig::new("b", 5),
            ProviderConfig::new("disabled", 50).disabled(),
            ProviderConfig::new("premium", 40).with_min_tier(UserTier::Premium),
            exhausted.clone(),
            ProviderConfig::new("a", 10),
        ];
        assert!(quota.try_acquire(&exhausted).await);

        let out = pipeline
            .execute(&providers, &SelectionContext::default())
            .await;
        assert_eq!(names(&out), vec!["a", "b"]);

        let out = pipeline
            .execute(&providers, &SelectionContext::for_tier(UserTier::Enterprise))
            .await;
        assert_eq!(names(&out), vec!["premium", "a", "b"]);
    }

    #[tokio::test]
    async fn test_pipeline_without_filters_only_sorts() {
        let pipeline = SelectionPipeline::new();
        let providers = vec![
            ProviderConfig::new("x", 1).disabled(),
            ProviderConfig::new("y", 2),
        ];
        let out = pipeline
            .execute(&providers, &SelectionContext::default())
            .await;
        assert_eq!(names(&out), vec!["y", "x"]);
    }
}
