use crate::clock::Clock;
use crate::errors::AppError;
use crate::models::RateLimitKey;
use crate::rate_limit_store::RateLimitStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Sliding window data: key -> consumption timestamps (ms), oldest first.
type SlidingWindowData = DashMap<RateLimitKey, VecDeque<i64>>;

/// In-process sliding-window store.
///
/// Per-key atomicity comes from the DashMap entry lock: pruning, counting and
/// recording happen while the shard is held. Counts are only shared between
/// tasks of this process.
///
/// Keys from past hour buckets are never written again, so the first
/// consumption in a new bucket sweeps every window that has fully expired.
pub struct LocalRateLimitStore {
    windows: SlidingWindowData,
    window_seconds: u64,
    clock: Arc<dyn Clock>,
    swept_bucket: Mutex<String>,
}

impl LocalRateLimitStore {
    pub fn new(window_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            window_seconds,
            clock,
            swept_bucket: Mutex::new(String::new()),
        }
    }

    fn sweep_on_bucket_change(&self, bucket: &str, cutoff: i64) {
        {
            let mut swept = self.swept_bucket.lock().unwrap_or_else(|e| e.into_inner());
            if swept.as_str() == bucket {
                return;
            }
            *swept = bucket.to_string();
        }

        let before = self.windows.len();
        self.windows.retain(|_, window| {
            prune(window, cutoff);
            !window.is_empty()
        });
        tracing::debug!(
            bucket,
            dropped = before.saturating_sub(self.windows.len()),
            "Swept expired rate-limit windows"
        );
    }

    fn cutoff(&self, window_seconds: u64) -> i64 {
        let window_ms = i64::try_from(window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.clock.now_millis().saturating_sub(window_ms)
    }

    /// Number of keys currently tracked (expired keys are dropped lazily).
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn prune(window: &mut VecDeque<i64>, cutoff: i64) {
    while let Some(&timestamp) = window.front() {
        if timestamp <= cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[async_trait]
impl RateLimitStore for LocalRateLimitStore {
    async fn try_consume(&self, key: &RateLimitKey, limit: u32, window_seconds: u64) -> bool {
        let cutoff = self.cutoff(window_seconds);
        let now = self.clock.now_millis();

        // Must run before the entry lock below is taken
        let sweep_cutoff = self.cutoff(window_seconds.max(self.window_seconds));
        self.sweep_on_bucket_change(key.bucket(), sweep_cutoff);

        let mut entry = self.windows.entry(key.clone()).or_default();
        let window = entry.value_mut();
        prune(window, cutoff);

        if window.len() < limit as usize {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    async fn get_count(&self, key: &RateLimitKey) -> u64 {
        let cutoff = self.cutoff(self.window_seconds);

        let count = match self.windows.get_mut(key) {
            Some(mut entry) => {
                prune(entry.value_mut(), cutoff);
                entry.len() as u64
            }
            None => return 0,
        };

        if count == 0 {
            self.windows.remove_if(key, |_, window| window.is_empty());
        }
        count
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), AppError> {
        self.windows.remove(key);
        Ok(())
    }

    async fn disconnect(&self) {
        self.windows.clear();
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
