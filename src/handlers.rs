use crate::errors::AppError;
use crate::models::{ProviderConfig, SearchParams, SelectionContext, UserTier, WaterfallOutcome};
use crate::quota::ProviderUsage;
use crate::registry::ProviderRegistry;
use crate::waterfall::WaterfallExecutor;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Shared application state injected into handlers.
///
/// Built once at startup; replaces any process-global clients.
#[derive(Clone)]
pub struct AppState {
    /// Provider configuration snapshot.
    pub registry: ProviderRegistry,
    /// Selection pipeline, quota and adapters wired together.
    pub executor: Arc<WaterfallExecutor>,
}

impl AppState {
    pub fn new(registry: ProviderRegistry, executor: WaterfallExecutor) -> Self {
        Self {
            registry,
            executor: Arc::new(executor),
        }
    }
}

/// Builds the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/waterfall", post(run_waterfall))
        .route("/api/v1/providers/eligible", get(eligible_providers))
        .route("/api/v1/providers/:name/usage", get(provider_usage))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 1MB is far above any search payload
                .layer(RequestBodyLimitLayer::new(1024 * 1024)),
        );

    Router::new()
        .route("/health", get(health))
        .merge(api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint.
///
/// Returns the service status, version, and which rate-limit backend is active.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "provider-waterfall",
            "version": env!("CARGO_PKG_VERSION"),
            "rateLimitBackend": state.executor.quota().store().backend_name(),
            "providers": state.registry.len(),
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct WaterfallRequest {
    pub params: SearchParams,
    #[serde(default)]
    pub context: SelectionContext,
}

/// POST /api/v1/waterfall
///
/// Runs the provider waterfall for one enrichment request. A run that finds
/// nothing still answers 200 with `result: null`.
pub async fn run_waterfall(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WaterfallRequest>,
) -> Result<Json<WaterfallOutcome>, AppError> {
    if request.params.is_empty() {
        return Err(AppError::BadRequest(
            "At least one search parameter required".to_string(),
        ));
    }

    tracing::info!(
        tier = %request.context.effective_tier(),
        "POST /waterfall"
    );

    let providers = state.registry.snapshot();
    let outcome = state
        .executor
        .execute_with_trace(&providers, &request.context, &request.params)
        .await;

    match outcome.result {
        Some(ref result) => tracing::info!(provider = %result.provider, "Waterfall matched"),
        None => tracing::info!("Waterfall found no match"),
    }

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct EligibleQuery {
    pub tier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EligibleProvider {
    pub name: String,
    pub priority: i32,
}

/// GET /api/v1/providers/eligible
///
/// Non-consuming preview of the order the waterfall would try right now.
pub async fn eligible_providers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EligibleQuery>,
) -> Result<Json<Vec<EligibleProvider>>, AppError> {
    let tier = query
        .tier
        .as_deref()
        .map(str::parse::<UserTier>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let context = SelectionContext {
        user_tier: tier,
        ..SelectionContext::default()
    };
    let providers = state.registry.snapshot();
    let eligible = state.executor.pipeline().execute(&providers, &context).await;

    Ok(Json(
        eligible
            .into_iter()
            .map(|ProviderConfig { name, priority, .. }| EligibleProvider { name, priority })
            .collect(),
    ))
}

/// GET /api/v1/providers/:name/usage
pub async fn provider_usage(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ProviderUsage>, AppError> {
    let provider = state
        .registry
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown provider: {}", name)))?;

    Ok(Json(state.executor.quota().usage(provider).await))
}
