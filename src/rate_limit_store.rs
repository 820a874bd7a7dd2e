//! Sliding-window rate-limit storage.
//!
//! Every consumption records a timestamp under a [`RateLimitKey`]. Reads and
//! writes first discard timestamps older than `now - window_seconds` and only
//! then evaluate the live count, so a quota can never be doubled by
//! straddling a window edge.
//!
//! Two backends share this contract:
//!
//! - [`LocalRateLimitStore`]: in-process, for single-worker deployments and tests.
//! - [`RedisRateLimitStore`]: sorted sets in Redis, shared by every worker.
//!
//! [`create_rate_limit_store`] picks Redis when it is configured and reachable
//! and silently falls back to the local store otherwise.

use crate::clock::Clock;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::RateLimitKey;
use async_trait::async_trait;
use std::sync::Arc;

pub use crate::local_store::LocalRateLimitStore;
pub use crate::redis_store::RedisRateLimitStore;

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically checks the live count against `limit` and, only when under
    /// it, records one consumption. Returns whether the slot was granted.
    async fn try_consume(&self, key: &RateLimitKey, limit: u32, window_seconds: u64) -> bool;

    /// Live (window-pruned) consumption count. Never records anything.
    async fn get_count(&self, key: &RateLimitKey) -> u64;

    /// Clears every consumption recorded for `key`.
    async fn reset(&self, key: &RateLimitKey) -> Result<(), AppError>;

    /// Releases backend resources. Later calls behave as if the backend were down.
    async fn disconnect(&self);

    /// Short backend identifier used in health output.
    fn backend_name(&self) -> &'static str;
}

/// Builds the rate-limit store for this process.
///
/// Uses Redis when `REDIS_URL` is set and the server answers within the
/// connect timeout; any failure is logged and the local store is used instead
/// so startup never blocks on the shared backend.
pub async fn create_rate_limit_store(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Arc<dyn RateLimitStore> {
    if let Some(ref url) = config.redis_url {
        match RedisRateLimitStore::connect(
            url,
            config.rate_limit_window_seconds,
            config.rate_limit_fail_open,
            clock.clone(),
            config.redis_connect_timeout(),
            config.redis_op_timeout(),
        )
        .await
        {
            Ok(store) => {
                tracing::info!("✓ Shared rate-limit store connected (redis)");
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Shared rate-limit store unreachable, falling back to in-process store: {}",
                    e
                );
            }
        }
    } else {
        tracing::info!("REDIS_URL not set, using in-process rate-limit store");
    }

    Arc::new(LocalRateLimitStore::new(
        config.rate_limit_window_seconds,
        clock,
    ))
}
