//! Waterfall execution over the selected providers.
//!
//! 1. Ask the selection pipeline for the ordered eligible list (non-consuming).
//! 2. For each provider in that order:
//!    - skip it if no adapter is registered (configuration error, no quota spent),
//!    - atomically consume one slot; on denial skip without calling the adapter,
//!    - invoke the adapter; a match ends the run, no match or an error moves on.
//! 3. An exhausted list yields `None`.
//!
//! Denial at consumption time only skips that provider. The remaining order is
//! never recomputed. A failed call keeps its consumed slot, and every retry
//! consumes one more, so a provider never sees more calls than its quota.

use crate::adapters::{AdapterMap, ProviderAdapter};
use crate::config::AttemptPolicy;
use crate::errors::ProviderError;
use crate::models::{
    AttemptOutcome, AttemptRecord, MatchResult, ProviderConfig, SearchParams, SelectionContext,
    WaterfallOutcome, WaterfallResult,
};
use crate::quota::ProviderQuota;
use crate::selection::SelectionPipeline;
use std::sync::Arc;
use tokio::time::{sleep, timeout};

pub struct WaterfallExecutor {
    pipeline: SelectionPipeline,
    quota: ProviderQuota,
    adapters: AdapterMap,
    policy: AttemptPolicy,
}

impl WaterfallExecutor {
    pub fn new(
        pipeline: SelectionPipeline,
        quota: ProviderQuota,
        adapters: AdapterMap,
        policy: AttemptPolicy,
    ) -> Self {
        Self {
            pipeline,
            quota,
            adapters,
            policy,
        }
    }

    pub fn pipeline(&self) -> &SelectionPipeline {
        &self.pipeline
    }

    pub fn quota(&self) -> &ProviderQuota {
        &self.quota
    }

    /// Runs the waterfall and returns the first match, if any.
    pub async fn execute(
        &self,
        providers: &[ProviderConfig],
        context: &SelectionContext,
        params: &SearchParams,
    ) -> Option<WaterfallResult> {
        self.execute_with_trace(providers, context, params)
            .await
            .result
    }

    /// Runs the waterfall and also reports what happened at each provider reached.
    pub async fn execute_with_trace(
        &self,
        providers: &[ProviderConfig],
        context: &SelectionContext,
        params: &SearchParams,
    ) -> WaterfallOutcome {
        let eligible = self.pipeline.execute(providers, context).await;
        let mut outcome = WaterfallOutcome::default();

        if eligible.is_empty() {
            tracing::info!(
                tier = %context.effective_tier(),
                "No eligible providers for request"
            );
            return outcome;
        }

        tracing::debug!(
            "Waterfall order: {:?}",
            eligible.iter().map(|p| p.name.as_str()).collect::<Vec<_>>()
        );

        for provider in &eligible {
            let name = provider.name.as_str();

            let adapter = match self.adapters.get(name) {
                Some(adapter) => adapter.clone(),
                None => {
                    tracing::error!(provider = %name, "No adapter registered, skipping provider");
                    outcome.attempts.push(record(name, AttemptOutcome::NotConfigured));
                    continue;
                }
            };

            if !self.quota.try_acquire(provider).await {
                tracing::info!(provider = %name, "Rate limit reached at consumption, skipping");
                outcome.attempts.push(record(name, AttemptOutcome::RateLimited));
                continue;
            }

            match self.invoke_with_policy(provider, &adapter, params).await {
                Ok(Some(found)) => {
                    tracing::info!(provider = %name, "✓ Provider returned a match");
                    outcome.attempts.push(record(name, AttemptOutcome::Matched));
                    outcome.result = Some(WaterfallResult {
                        matched_value: found.value,
                        provider: name.to_string(),
                        secondary_field: found.secondary,
                    });
                    return outcome;
                }
                Ok(None) => {
                    tracing::info!(provider = %name, "Provider returned no match, trying next");
                    outcome.attempts.push(record(name, AttemptOutcome::NoMatch));
                }
                Err(e) => {
                    tracing::warn!(provider = %name, "Provider failed, trying next: {}", e);
                    outcome
                        .attempts
                        .push(record(name, AttemptOutcome::Failed(e.to_string())));
                }
            }
        }

        tracing::info!(
            attempted = outcome.attempts.len(),
            "Waterfall exhausted without a match"
        );
        outcome
    }

    /// One provider attempt: bounded by the per-try deadline and retried on
    /// retryable errors. The first slot is already held; each retry acquires
    /// another and gives up with the last error once the quota is spent.
    async fn invoke_with_policy(
        &self,
        provider: &ProviderConfig,
        adapter: &Arc<dyn ProviderAdapter>,
        params: &SearchParams,
    ) -> Result<Option<MatchResult>, ProviderError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut tries = 0;

        loop {
            tries += 1;
            let result = match timeout(self.policy.timeout, adapter.invoke(params)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.policy.timeout)),
            };

            match result {
                Err(e) if e.is_retryable() && tries < max_attempts => {
                    if !self.quota.try_acquire(provider).await {
                        tracing::info!(
                            provider = %provider.name,
                            tries,
                            "Rate limit reached before retry, giving up"
                        );
                        return Err(e);
                    }
                    let delay = self.policy.backoff_for(tries);
                    tracing::debug!(
                        provider = %adapter.name(),
                        tries,
                        "Retrying provider in {}ms: {}",
                        delay.as_millis(),
                        e
                    );
                    sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn record(provider: &str, outcome: AttemptOutcome) -> AttemptRecord {
    AttemptRecord {
        provider: provider.to_string(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::local_store::LocalRateLimitStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails with a transport error until `failures` calls have been made.
    struct FlakyAdapter {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProviderAdapter for FlakyAdapter {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, _: &SearchParams) -> Result<Option<MatchResult>, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(ProviderError::Transport("connection reset".to_string()))
            } else {
                Ok(Some(MatchResult::new("+15550001111")))
            }
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl ProviderAdapter for SlowAdapter {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _: &SearchParams) -> Result<Option<MatchResult>, ProviderError> {
            sleep(Duration::from_secs(5)).await;
            Ok(Some(MatchResult::new("too late")))
        }
    }

    fn executor(adapters: AdapterMap, policy: AttemptPolicy) -> WaterfallExecutor {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        ));
        let store = Arc::new(LocalRateLimitStore::new(3600, clock.clone()));
        let quota = ProviderQuota::new(store, clock, 3600);
        WaterfallExecutor::new(
            SelectionPipeline::standard(quota.clone()),
            quota,
            adapters,
            policy,
        )
    }

    #[tokio::test]
    async fn test_each_retry_consumes_a_slot() {
        let flaky = Arc::new(FlakyAdapter {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let mut adapters = AdapterMap::new();
        adapters.insert("flaky".to_string(), flaky.clone());
        let policy = AttemptPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
        };
        let exec = executor(adapters, policy);
        let provider = ProviderConfig::new("flaky", 1).with_hourly_limit(10);

        let result = exec
            .execute(
                std::slice::from_ref(&provider),
                &SelectionContext::default(),
                &SearchParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.provider, "flaky");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert_eq!(exec.quota().usage(&provider).await.count, 3);
    }

    #[tokio::test]
    async fn test_retries_stop_when_quota_is_spent() {
        let flaky = Arc::new(FlakyAdapter {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let mut adapters = AdapterMap::new();
        adapters.insert("flaky".to_string(), flaky.clone());
        let policy = AttemptPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 5,
            retry_backoff: Duration::from_millis(1),
        };
        let exec = executor(adapters, policy);
        let provider = ProviderConfig::new("flaky", 1).with_hourly_limit(2);

        for _ in 0..4 {
            let outcome = exec
                .execute_with_trace(
                    std::slice::from_ref(&provider),
                    &SelectionContext::default(),
                    &SearchParams::default(),
                )
                .await;
            assert!(outcome.result.is_none());
        }

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(exec.quota().usage(&provider).await.count, 2);
    }

    #[tokio::test]
    async fn test_unlimited_provider_retries_up_to_max_attempts() {
        let flaky = Arc::new(FlakyAdapter {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let mut adapters = AdapterMap::new();
        adapters.insert("flaky".to_string(), flaky.clone());
        let policy = AttemptPolicy {
            timeout: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
        };
        let exec = executor(adapters, policy);
        let provider = ProviderConfig::new("flaky", 1);

        let outcome = exec
            .execute_with_trace(
                std::slice::from_ref(&provider),
                &SelectionContext::default(),
                &SearchParams::default(),
            )
            .await;

        assert!(matches!(outcome.attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let mut adapters = AdapterMap::new();
        adapters.insert("slow".to_string(), Arc::new(SlowAdapter) as Arc<dyn ProviderAdapter>);
        let policy = AttemptPolicy {
            timeout: Duration::from_millis(20),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1),
        };
        let exec = executor(adapters, policy);
        let provider = ProviderConfig::new("slow", 1).with_hourly_limit(5);

        let outcome = exec
            .execute_with_trace(
                std::slice::from_ref(&provider),
                &SelectionContext::default(),
                &SearchParams::default(),
            )
            .await;

        assert!(outcome.result.is_none());
        assert!(matches!(
            outcome.attempts[0].outcome,
            AttemptOutcome::Failed(ref msg) if msg.contains("timed out")
        ));
        assert_eq!(exec.quota().usage(&provider).await.count, 1);
    }

    #[tokio::test]
    async fn test_missing_adapter_is_skipped_without_consuming() {
        let exec = executor(AdapterMap::new(), AttemptPolicy::default());
        let provider = ProviderConfig::new("ghost", 1).with_hourly_limit(5);

        let outcome = exec
            .execute_with_trace(
                std::slice::from_ref(&provider),
                &SelectionContext::default(),
                &SearchParams::default(),
            )
            .await;

        assert!(outcome.result.is_none());
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::NotConfigured);
        assert_eq!(exec.quota().usage(&provider).await.count, 0);
    }
}
