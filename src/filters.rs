use crate::models::{ProviderConfig, SelectionContext};
use crate::quota::ProviderQuota;

/// Eligibility predicates applied by the selection pipeline.
///
/// Every variant returns a new subset and leaves its input untouched.
/// Filtering decisions are never errors.
#[derive(Clone)]
pub enum EligibilityFilter {
    /// Keeps enabled providers.
    Enabled,
    /// Keeps providers open to the caller's tier.
    Tier,
    /// Keeps providers whose current bucket is below its limit.
    /// Reads the store but never consumes from it.
    RateLimit(ProviderQuota),
}

impl EligibilityFilter {
    pub fn name(&self) -> &'static str {
        match self {
            EligibilityFilter::Enabled => "enabled",
            EligibilityFilter::Tier => "tier",
            EligibilityFilter::RateLimit(_) => "rate_limit",
        }
    }

    pub async fn apply(
        &self,
        providers: &[ProviderConfig],
        context: &SelectionContext,
    ) -> Vec<ProviderConfig> {
        match self {
            EligibilityFilter::Enabled => filter_enabled(providers),
            EligibilityFilter::Tier => filter_by_tier(providers, context),
            EligibilityFilter::RateLimit(quota) => {
                let mut eligible = Vec::with_capacity(providers.len());
                for provider in providers {
                    if quota.has_capacity(provider).await {
                        eligible.push(provider.clone());
                    } else {
                        tracing::debug!(
                            provider = %provider.name,
                            "Provider at hourly limit, excluded from selection"
                        );
                    }
                }
                eligible
            }
        }
    }
}

pub fn filter_enabled(providers: &[ProviderConfig]) -> Vec<ProviderConfig> {
    providers.iter().filter(|p| p.enabled).cloned().collect()
}

pub fn filter_by_tier(providers: &[ProviderConfig], context: &SelectionContext) -> Vec<ProviderConfig> {
    let tier = context.effective_tier();
    providers
        .iter()
        .filter(|p| p.min_user_tier.map_or(true, |min| tier >= min))
        .cloned()
        .collect()
}
