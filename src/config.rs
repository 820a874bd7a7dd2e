use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub providers_config_path: String,
    pub redis_url: Option<String>, // Optional: falls back to the in-process store
    pub redis_connect_timeout_ms: u64,
    pub redis_op_timeout_ms: u64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_fail_open: bool,
    pub attempt: AttemptPolicy,
}

/// Per-attempt execution parameters for provider calls.
///
/// These belong to the execution substrate; the executor only applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AttemptPolicy {
    /// Deadline for a single adapter invocation.
    pub timeout: Duration,
    /// Total tries per provider, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub retry_backoff: Duration,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl AttemptPolicy {
    /// Backoff to wait before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            providers_config_path: "providers.json".to_string(),
            redis_url: None,
            redis_connect_timeout_ms: 2000,
            redis_op_timeout_ms: 500,
            rate_limit_window_seconds: 3600,
            rate_limit_fail_open: true,
            attempt: AttemptPolicy::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

fn parse_port(raw: &str) -> anyhow::Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => anyhow::bail!("PORT must be a valid number between 1-65535"),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            port: parse_port(
                &std::env::var("PORT").unwrap_or_else(|_| defaults.port.to_string()),
            )?,
            providers_config_path: std::env::var("PROVIDERS_CONFIG_PATH")
                .unwrap_or(defaults.providers_config_path)
                .trim()
                .to_string(),
            redis_url: std::env::var("REDIS_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                        anyhow::bail!("REDIS_URL must start with redis:// or rediss://");
                    }
                    Ok(url)
                })
                .transpose()?,
            redis_connect_timeout_ms: parse_env(
                "REDIS_CONNECT_TIMEOUT_MS",
                defaults.redis_connect_timeout_ms,
            )?,
            redis_op_timeout_ms: parse_env("REDIS_OP_TIMEOUT_MS", defaults.redis_op_timeout_ms)
                .and_then(|ms: u64| {
                    if ms == 0 {
                        anyhow::bail!("REDIS_OP_TIMEOUT_MS must be greater than zero");
                    }
                    Ok(ms)
                })?,
            rate_limit_window_seconds: parse_env(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            )
            .and_then(|secs: u64| {
                if secs == 0 {
                    anyhow::bail!("RATE_LIMIT_WINDOW_SECONDS must be greater than zero");
                }
                Ok(secs)
            })?,
            rate_limit_fail_open: parse_env("RATE_LIMIT_FAIL_OPEN", defaults.rate_limit_fail_open)?,
            attempt: AttemptPolicy {
                timeout: Duration::from_millis(parse_env(
                    "PROVIDER_ATTEMPT_TIMEOUT_MS",
                    defaults.attempt.timeout.as_millis() as u64,
                )?),
                max_attempts: parse_env("PROVIDER_MAX_ATTEMPTS", defaults.attempt.max_attempts)
                    .and_then(|n: u32| {
                        if n == 0 {
                            anyhow::bail!("PROVIDER_MAX_ATTEMPTS must be at least 1");
                        }
                        Ok(n)
                    })?,
                retry_backoff: Duration::from_millis(parse_env(
                    "PROVIDER_RETRY_BACKOFF_MS",
                    defaults.attempt.retry_backoff.as_millis() as u64,
                )?),
            },
        };

        if config.providers_config_path.is_empty() {
            anyhow::bail!("PROVIDERS_CONFIG_PATH cannot be empty");
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Providers config: {}", config.providers_config_path);
        if config.redis_url.is_some() {
            tracing::info!("Shared rate-limit store configured (REDIS_URL set)");
        }
        tracing::debug!(
            "Rate-limit window: {}s, fail open: {}",
            config.rate_limit_window_seconds,
            config.rate_limit_fail_open
        );
        tracing::debug!("Attempt policy: {:?}", config.attempt);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn redis_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_connect_timeout_ms)
    }

    /// Upper bound on a single store round-trip once connected.
    pub fn redis_op_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_op_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_retry() {
        let policy = AttemptPolicy {
            retry_backoff: Duration::from_millis(100),
            ..AttemptPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_defaults_use_an_hour_window_and_fail_open() {
        let config = Config::default();
        assert_eq!(config.rate_limit_window_seconds, 3600);
        assert!(config.rate_limit_fail_open);
        assert!(config.redis_url.is_none());
        assert_eq!(config.attempt.max_attempts, 1);
    }

    #[test]
    fn test_port_zero_is_rejected() {
        assert!(parse_port("0").is_err());
        assert!(parse_port("65536").is_err());
        assert!(parse_port("http").is_err());
        assert_eq!(parse_port("8080").unwrap(), 8080);
        assert_eq!(parse_port(" 3000 ").unwrap(), 3000);
    }
}
