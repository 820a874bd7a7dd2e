use crate::errors::ProviderError;
use crate::models::{AdapterSettings, MatchResult, SearchParams};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Uniform contract for one external data source.
///
/// `Ok(None)` means the vendor had no match. Errors are reserved for
/// transport or protocol failures.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, params: &SearchParams) -> Result<Option<MatchResult>, ProviderError>;
}

/// Adapters keyed by provider name.
pub type AdapterMap = HashMap<String, Arc<dyn ProviderAdapter>>;

/// Client for vendors exposing a JSON lookup endpoint.
///
/// POSTs the search parameters and reads the match from configurable fields
/// of the response body.
#[derive(Clone)]
pub struct HttpJsonAdapter {
    name: String,
    client: Client,
    url: String,
    api_key: Option<String>,
    settings: AdapterSettings,
}

impl HttpJsonAdapter {
    /// Creates a new `HttpJsonAdapter`.
    ///
    /// # Arguments
    ///
    /// * `name` - Provider identity the adapter answers for.
    /// * `client` - Shared HTTP client (timeouts are applied per attempt by the executor).
    /// * `settings` - Endpoint and field mapping from the provider configuration.
    pub fn new(name: impl Into<String>, client: Client, settings: AdapterSettings) -> Self {
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        let name = name.into();
        if settings.api_key_env.is_some() && api_key.is_none() {
            tracing::warn!(provider = %name, "API key environment variable is not set");
        }

        Self {
            url: format!(
                "{}{}",
                settings.base_url.trim_end_matches('/'),
                settings.path
            ),
            name,
            client,
            api_key,
            settings,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn extract(&self, body: Value) -> Result<Option<MatchResult>, ProviderError> {
        if !body.is_object() {
            return Err(ProviderError::Protocol(format!(
                "{} returned a non-object body",
                self.name
            )));
        }

        let value = match field_as_string(&body, &self.settings.value_field) {
            Some(v) if !v.trim().is_empty() => v,
            _ => return Ok(None),
        };

        let secondary = self
            .settings
            .secondary_field
            .as_deref()
            .and_then(|field| field_as_string(&body, field));
        let confidence = self
            .settings
            .confidence_field
            .as_deref()
            .and_then(|field| body.get(field))
            .and_then(Value::as_f64);

        Ok(Some(MatchResult {
            value,
            secondary,
            confidence,
            raw: Some(body),
        }))
    }
}

fn field_as_string(body: &Value, field: &str) -> Option<String> {
    match body.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl ProviderAdapter for HttpJsonAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, params: &SearchParams) -> Result<Option<MatchResult>, ProviderError> {
        tracing::debug!(provider = %self.name, "POST {}", self.url);

        let mut request = self.client.post(&self.url).json(params);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = format!("{} returned status {}: {}", self.name, status, error_text);
            return Err(if status.is_server_error() {
                ProviderError::Transport(message)
            } else {
                ProviderError::Protocol(message)
            });
        }

        let body: Value = response.json().await?;

        self.extract(body)
    }
}
