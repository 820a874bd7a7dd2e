use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============ Provider Configuration ============

/// Static configuration of a single external data provider.
///
/// Loaded once at startup by the `ProviderRegistry` and shared read-only
/// across every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Stable provider identifier (also the adapter lookup key).
    pub name: String,
    /// Disabled providers are never selected.
    pub enabled: bool,
    /// Higher priority providers are tried first.
    pub priority: i32,
    /// Hourly request ceiling. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<ProviderRateLimit>,
    /// Minimum caller tier. `None` means open to every tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_user_tier: Option<UserTier>,
    /// How to reach the data source over HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterSettings>,
}

impl ProviderConfig {
    /// Convenience constructor for an enabled, unrestricted provider.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority,
            rate_limit: None,
            min_user_tier: None,
            adapter: None,
        }
    }

    /// Caps consumption at `max_requests_per_hour` per window.
    pub fn with_hourly_limit(mut self, max_requests_per_hour: u32) -> Self {
        self.rate_limit = Some(ProviderRateLimit {
            max_requests_per_hour,
        });
        self
    }

    /// Restricts the provider to callers at or above `tier`.
    pub fn with_min_tier(mut self, tier: UserTier) -> Self {
        self.min_user_tier = Some(tier);
        self
    }

    /// Marks the provider as switched off.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The configured hourly ceiling, if any.
    pub fn hourly_limit(&self) -> Option<u32> {
        self.rate_limit.map(|r| r.max_requests_per_hour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRateLimit {
    pub max_requests_per_hour: u32,
}

/// Connection settings for the generic HTTP JSON adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterSettings {
    /// Base URL of the vendor API (e.g. `https://api.vendor.com`).
    pub base_url: String,
    /// Lookup path appended to `base_url`.
    #[serde(default = "default_adapter_path")]
    pub path: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// JSON field carrying the matched value.
    #[serde(default = "default_value_field")]
    pub value_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_field: Option<String>,
}

fn default_adapter_path() -> String {
    "/lookup".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

// ============ Caller Entitlements ============

/// Caller entitlement tier. Ordering follows the ordinal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserTier {
    #[default]
    Free = 0,
    Basic = 1,
    Premium = 2,
    Enterprise = 3,
}

impl UserTier {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for UserTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserTier::Free => "FREE",
            UserTier::Basic => "BASIC",
            UserTier::Premium => "PREMIUM",
            UserTier::Enterprise => "ENTERPRISE",
        };
        f.write_str(name)
    }
}

impl FromStr for UserTier {
    type Err = String;

    /// Accepts the tier name (any case) or its ordinal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" | "0" => Ok(UserTier::Free),
            "BASIC" | "1" => Ok(UserTier::Basic),
            "PREMIUM" | "2" => Ok(UserTier::Premium),
            "ENTERPRISE" | "3" => Ok(UserTier::Enterprise),
            other => Err(format!("Unknown user tier: {}", other)),
        }
    }
}

/// Per-request inputs to provider selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionContext {
    #[serde(default)]
    pub user_tier: Option<UserTier>,
    /// Open extension point for future filter criteria.
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl SelectionContext {
    pub fn for_tier(tier: UserTier) -> Self {
        Self {
            user_tier: Some(tier),
            extensions: HashMap::new(),
        }
    }

    /// The caller tier, defaulting to `FREE` when absent.
    pub fn effective_tier(&self) -> UserTier {
        self.user_tier.unwrap_or_default()
    }
}

// ============ Rate Limiting ============

/// Composite rate-limit key: provider identity × UTC hour bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    provider: String,
    bucket: String,
}

impl RateLimitKey {
    /// Key for `provider` in the hour bucket containing `at`.
    pub fn for_time(provider: &str, at: DateTime<Utc>) -> Self {
        Self {
            provider: provider.to_string(),
            bucket: at.format("%Y-%m-%dT%H").to_string(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ratelimit:{}:{}", self.provider, self.bucket)
    }
}

// ============ Enrichment Request / Response ============

/// Contact attributes handed to every provider adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    /// Provider-specific extras passed through untouched.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, Value>,
}

impl SearchParams {
    /// True when no identifying attribute is present.
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.full_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.company.is_none()
            && self.domain.is_none()
            && self.linkedin_url.is_none()
            && self.extra.is_empty()
    }
}

/// A single provider's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl MatchResult {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secondary: None,
            confidence: None,
            raw: None,
        }
    }
}

/// Outcome of a waterfall run that found a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallResult {
    pub matched_value: String,
    /// Identity of the winning provider.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_field: Option<String>,
}

/// What happened when the waterfall reached a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum AttemptOutcome {
    Matched,
    NoMatch,
    Failed(String),
    RateLimited,
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub outcome: AttemptOutcome,
}

/// Result of a waterfall run plus the per-provider trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaterfallOutcome {
    pub result: Option<WaterfallResult>,
    pub attempts: Vec<AttemptRecord>,
}

impl WaterfallOutcome {
    /// Providers whose quota was consumed during the run, in order.
    pub fn consumed_providers(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| {
                matches!(
                    a.outcome,
                    AttemptOutcome::Matched | AttemptOutcome::NoMatch | AttemptOutcome::Failed(_)
                )
            })
            .map(|a| a.provider.as_str())
            .collect()
    }
}
