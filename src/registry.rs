use crate::adapters::{AdapterMap, HttpJsonAdapter, ProviderAdapter};
use crate::models::ProviderConfig;
use reqwest::Client;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Immutable, process-wide provider list.
///
/// Cloning is cheap; every clone shares the same snapshot.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Arc<[ProviderConfig]>,
}

impl ProviderRegistry {
    /// Validates and wraps a provider list. Malformed lists are fatal.
    pub fn new(providers: Vec<ProviderConfig>) -> anyhow::Result<Self> {
        validate(&providers)?;
        Ok(Self {
            providers: providers.into(),
        })
    }

    /// Parses a JSON array of provider configurations.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let providers: Vec<ProviderConfig> = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Invalid provider configuration JSON: {}", e))?;
        Self::new(providers)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read provider config {}: {}", path.display(), e)
        })?;
        let registry = Self::from_json_str(&raw)?;
        tracing::info!(
            "Loaded {} providers from {} ({} enabled)",
            registry.len(),
            path.display(),
            registry.providers.iter().filter(|p| p.enabled).count()
        );
        Ok(registry)
    }

    /// The shared snapshot handed to each selection call.
    pub fn snapshot(&self) -> Arc<[ProviderConfig]> {
        self.providers.clone()
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Builds an HTTP adapter for every provider with an `adapter` block.
    ///
    /// Providers without one are left out; the executor treats them as a
    /// configuration error at call time.
    pub fn build_http_adapters(&self, client: &Client) -> AdapterMap {
        let mut adapters = AdapterMap::new();
        for provider in self.providers.iter() {
            match provider.adapter {
                Some(ref settings) => {
                    let adapter: Arc<dyn ProviderAdapter> = Arc::new(HttpJsonAdapter::new(
                        provider.name.clone(),
                        client.clone(),
                        settings.clone(),
                    ));
                    adapters.insert(provider.name.clone(), adapter);
                }
                None => {
                    tracing::warn!(provider = %provider.name, "No adapter configured for provider");
                }
            }
        }
        adapters
    }
}

fn validate(providers: &[ProviderConfig]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for provider in providers {
        if provider.name.trim().is_empty() {
            anyhow::bail!("Provider name cannot be empty");
        }
        if !seen.insert(provider.name.as_str()) {
            anyhow::bail!("Duplicate provider name: {}", provider.name);
        }
        if provider.hourly_limit() == Some(0) {
            anyhow::bail!(
                "Provider {} has maxRequestsPerHour = 0; disable it instead",
                provider.name
            );
        }
        if let Some(ref settings) = provider.adapter {
            if !settings.base_url.starts_with("http://") && !settings.base_url.starts_with("https://")
            {
                anyhow::bail!(
                    "Provider {} adapter baseUrl must start with http:// or https://",
                    provider.name
                );
            }
            if settings.value_field.trim().is_empty() {
                anyhow::bail!("Provider {} adapter valueField cannot be empty", provider.name);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDERS: &str = r#"[
        {"name": "apollo", "enabled": true, "priority": 10,
         "rateLimit": {"maxRequestsPerHour": 100},
         "adapter": {"baseUrl": "https://api.apollo.test", "valueField": "phone"}},
        {"name": "hunter", "enabled": false, "priority": 5, "minUserTier": "BASIC"}
    ]"#;

    #[test]
    fn test_loads_valid_config() {
        let registry = ProviderRegistry::from_json_str(PROVIDERS).unwrap();
        assert_eq!(registry.len(), 2);
        let apollo = registry.get("apollo").unwrap();
        assert_eq!(apollo.hourly_limit(), Some(100));
        assert_eq!(apollo.adapter.as_ref().unwrap().path, "/lookup");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_snapshots_share_storage() {
        let registry = ProviderRegistry::from_json_str(PROVIDERS).unwrap();
        let a = registry.snapshot();
        let b = registry.clone().snapshot();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = ProviderRegistry::new(vec![
            ProviderConfig::new("apollo", 1),
            ProviderConfig::new("apollo", 2),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate provider name"));
    }

    #[test]
    fn test_rejects_empty_name_and_zero_limit() {
        assert!(ProviderRegistry::new(vec![ProviderConfig::new(" ", 1)]).is_err());
        assert!(
            ProviderRegistry::new(vec![ProviderConfig::new("a", 1).with_hourly_limit(0)]).is_err()
        );
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(ProviderRegistry::from_json_str(r#"[{"name": "a"}]"#).is_err());
        assert!(ProviderRegistry::from_json_str("not json").is_err());
    }

    #[test]
    fn test_builds_adapters_only_for_configured_providers() {
        let registry = ProviderRegistry::from_json_str(PROVIDERS).unwrap();
        let adapters = registry.build_http_adapters(&Client::new());
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters["apollo"].name(), "apollo");
    }
}
