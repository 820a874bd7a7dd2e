//! Redis-backed sliding-window store shared by every worker process.
//!
//! Each key is a sorted set whose members are consumptions scored by their
//! timestamp in milliseconds. Consumption runs as a single Lua script so the
//! prune, count and record steps are atomic on the server.

use crate::circuit_breaker::{create_store_circuit_breaker, StoreCircuitBreaker};
use crate::clock::Clock;
use crate::errors::{AppError, ResultExt};
use crate::models::RateLimitKey;
use crate::rate_limit_store::RateLimitStore;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

/// KEYS[1] = key, ARGV = now_ms, window_ms, limit, member
const CONSUME_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  return 1
end
return 0
"#;

pub struct RedisRateLimitStore {
    connection: Mutex<Option<ConnectionManager>>,
    consume: Script,
    breaker: StoreCircuitBreaker,
    window_seconds: u64,
    fail_open: bool,
    op_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimitStore {
    /// Connects to Redis and verifies the server answers `PING`.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g. `redis://localhost:6379`).
    /// * `window_seconds` - Window used by `get_count`.
    /// * `fail_open` - Whether backend errors grant (`true`) or deny consumption.
    /// * `clock` - Time source for window arithmetic.
    /// * `connect_timeout` - Upper bound on connect + `PING`.
    /// * `op_timeout` - Upper bound on every later round-trip.
    pub async fn connect(
        url: &str,
        window_seconds: u64,
        fail_open: bool,
        clock: Arc<dyn Clock>,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::open(url).context("Invalid REDIS_URL")?;

        let mut manager = timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                AppError::StoreUnavailable(format!(
                    "Redis connection timeout after {}ms",
                    connect_timeout.as_millis()
                ))
            })?
            .context("Failed to connect to Redis")?;

        let pong: String = timeout(connect_timeout, redis::cmd("PING").query_async(&mut manager))
            .await
            .map_err(|_| AppError::StoreUnavailable("Redis PING timed out".to_string()))?
            .context("Redis PING failed")?;
        tracing::debug!("Redis answered {}", pong);

        Ok(Self {
            connection: Mutex::new(Some(manager)),
            consume: Script::new(CONSUME_SCRIPT),
            breaker: create_store_circuit_breaker(),
            window_seconds,
            fail_open,
            op_timeout,
            clock,
        })
    }

    fn connection(&self) -> Result<ConnectionManager, AppError> {
        self.connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AppError::StoreUnavailable("Redis store disconnected".to_string()))
    }

    /// Runs a backend operation through the circuit breaker.
    ///
    /// A round-trip slower than `op_timeout` counts as a backend failure.
    async fn guarded<T, F>(&self, op: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let op_timeout = self.op_timeout;
        let bounded = async move {
            timeout(op_timeout, op).await.unwrap_or_else(|_| {
                Err(AppError::StoreUnavailable(format!(
                    "Redis did not answer within {}ms",
                    op_timeout.as_millis()
                )))
            })
        };

        match self.breaker.call(bounded).await {
            Ok(value) => Ok(value),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::StoreUnavailable(
                "circuit open, skipping Redis".to_string(),
            )),
        }
    }

    async fn consume_atomically(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window_seconds: u64,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection()?;
        let now = self.clock.now_millis();
        let member = format!("{}-{}", now, Uuid::new_v4());

        let granted: i64 = self
            .consume
            .key(key.to_string())
            .arg(now)
            .arg(window_millis(window_seconds))
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Consuming slot for {}", key))?;

        Ok(granted == 1)
    }

    async fn live_count(&self, key: &RateLimitKey) -> Result<u64, AppError> {
        let mut conn = self.connection()?;
        let cutoff = self.clock.now_millis() - window_millis(self.window_seconds);
        let redis_key = key.to_string();

        let (_removed, count): (i64, u64) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&redis_key)
            .arg("-inf")
            .arg(cutoff)
            .cmd("ZCARD")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Counting {}", key))?;

        Ok(count)
    }
}

fn window_millis(window_seconds: u64) -> i64 {
    i64::try_from(window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn try_consume(&self, key: &RateLimitKey, limit: u32, window_seconds: u64) -> bool {
        match self
            .guarded(self.consume_atomically(key, limit, window_seconds))
            .await
        {
            Ok(granted) => granted,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    fail_open = self.fail_open,
                    "Rate-limit consume failed, applying fallback policy: {}",
                    e
                );
                self.fail_open
            }
        }
    }

    async fn get_count(&self, key: &RateLimitKey) -> u64 {
        match self.guarded(self.live_count(key)).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    fail_open = self.fail_open,
                    "Rate-limit count failed, applying fallback policy: {}",
                    e
                );
                // Fail open reports an idle key, fail closed a saturated one
                if self.fail_open {
                    0
                } else {
                    u64::MAX
                }
            }
        }
    }

    async fn reset(&self, key: &RateLimitKey) -> Result<(), AppError> {
        let mut conn = self.connection()?;
        let deleted: RedisResult<()> = timeout(
            self.op_timeout,
            redis::cmd("DEL").arg(key.to_string()).query_async(&mut conn),
        )
        .await
        .map_err(|_| AppError::StoreUnavailable(format!("Resetting {} timed out", key)))?;
        deleted.with_context(|| format!("Resetting {}", key))
    }

    async fn disconnect(&self) {
        let previous = self
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            tracing::info!("Redis rate-limit store disconnected");
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
