use provider_waterfall::clock::{Clock, SystemClock};
use provider_waterfall::config::Config;
use provider_waterfall::handlers::{self, AppState};
use provider_waterfall::quota::ProviderQuota;
use provider_waterfall::rate_limit_store::create_rate_limit_store;
use provider_waterfall::registry::ProviderRegistry;
use provider_waterfall::selection::SelectionPipeline;
use provider_waterfall::waterfall::WaterfallExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Provider registry.
/// - Rate-limit store (Redis when reachable, in-process otherwise).
/// - Provider adapters, selection pipeline and waterfall executor.
/// - HTTP routes and middleware.
///
/// It then starts the Axum server and releases the store on shutdown.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the server runs successfully, or an error if initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "provider_waterfall=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // A malformed provider list is the one fatal startup error
    let registry = ProviderRegistry::load_from_file(&config.providers_config_path)?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = create_rate_limit_store(&config, clock.clone()).await;
    tracing::info!("Rate-limit store ready: {}", store.backend_name());

    let quota = ProviderQuota::new(store.clone(), clock, config.rate_limit_window_seconds);

    // Per-attempt deadlines are enforced by the executor
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let adapters = registry.build_http_adapters(&http_client);
    tracing::info!("{} provider adapters initialized", adapters.len());

    let executor = WaterfallExecutor::new(
        SelectionPipeline::standard(quota.clone()),
        quota,
        adapters,
        config.attempt,
    );

    // Build application state
    let app_state = Arc::new(AppState::new(registry, executor));
    let app = handlers::router(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    store.disconnect().await;

    Ok(())
}
