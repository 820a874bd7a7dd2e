use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The shared rate-limit backend could not be reached.
    StoreUnavailable(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::StoreUnavailable(msg) => write!(f, "Rate-limit store unavailable: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Rate-limit store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Rate-limit store unavailable".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return (**source).clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<redis::RedisError> for AppError {
    /// Converts a `redis::RedisError` into an `AppError`.
    fn from(err: redis::RedisError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for redis errors so store calls can attach the key they touched.
impl<T> ResultExt<T> for Result<T, redis::RedisError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: f(),
        })
    }
}

/// Failure of a single provider adapter call.
///
/// Never escapes the waterfall: the executor logs it and moves on.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Network failure or 5xx from the vendor.
    Transport(String),
    /// The vendor answered with something we cannot interpret.
    Protocol(String),
    /// The attempt exceeded its deadline.
    Timeout(Duration),
}

impl ProviderError {
    /// Transport failures and timeouts are worth retrying; protocol errors are not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Protocol(_))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "Provider transport error: {}", msg),
            ProviderError::Protocol(msg) => write!(f, "Provider protocol error: {}", msg),
            ProviderError::Timeout(after) => {
                write!(f, "Provider call timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    /// Converts a `reqwest::Error` into a `ProviderError`.
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Protocol(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_wraps_source() {
        let result: Result<(), AppError> = Err(AppError::NotFound("apollo".to_string()));
        let err = result.context("Looking up provider usage").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Looking up provider usage: Not found: apollo"
        );
    }

    #[test]
    fn test_context_keeps_status_of_source() {
        let err = AppError::WithContext {
            source: Box::new(AppError::BadRequest("bad tier".to_string())),
            context: "Parsing query".to_string(),
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_store_unavailable_maps_to_503() {
        let err = AppError::from(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_protocol_errors_are_not_retryable() {
        assert!(!ProviderError::Protocol("bad json".into()).is_retryable());
        assert!(ProviderError::Transport("reset".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_millis(10)).is_retryable());
    }
}
