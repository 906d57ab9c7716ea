use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use prometheus::TextEncoder;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_ratelimiter::{
    config::LimiterConfig,
    http::RateLimitLayer,
    metrics::Metrics,
    redis::RedisStore,
    service::{metrics_hooks, RateLimitService},
};

#[derive(Clone)]
struct AppState {
    service: Arc<RateLimitService>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_ratelimiter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rust Rate Limiter");

    let config_path = std::env::var("CONFIG_PATH").ok();
    if let Some(path) = &config_path {
        info!("Loading configuration from: {}", path);
    }
    let config = LimiterConfig::load(config_path.as_deref())?;

    let metrics = Arc::new(Metrics::new()?);
    let service = create_service(&config, metrics.clone()).await?;
    let state = AppState { service, metrics };

    let addr = config.server.listen_addr.parse::<SocketAddr>()?;
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Service stopped");
    Ok(())
}

async fn create_service(
    config: &LimiterConfig,
    metrics: Arc<Metrics>,
) -> Result<Arc<RateLimitService>> {
    let store = RedisStore::connect(config.redis.to_redis_config()).await?;
    let limiter = config.build_limiter(Arc::new(store), metrics_hooks(metrics.clone()))?;
    metrics.set_configured_limits(config.limits.len());

    info!(
        limits = ?config.limits,
        whitelist_entries = config.whitelist.len(),
        limit_on_error = config.limit_on_error,
        "Limiter configured"
    );

    Ok(Arc::new(RateLimitService::new(limiter, metrics)))
}

fn app(state: AppState) -> Router {
    let limited = Router::new()
        .route("/", get(root))
        .route_layer(RateLimitLayer::new(state.service.clone()));

    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(limited)
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

async fn root() -> &'static str {
    "OK"
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.service.health_check().await {
        Ok(()) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics) => Ok(metrics),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
