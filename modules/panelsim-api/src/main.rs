use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use panelsim_common::Config;
use panelsim_core::Orchestrator;

mod auth;
mod routes;

pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub auth: auth::AuthState,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("panelsim=info".parse()?))
        .init();

    let config = Config::from_env();
    let auth = auth::AuthState::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port).parse()?;

    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(config.clone()),
        auth,
        config,
    });

    let cors = if state.config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .route("/test-concept", post(routes::test_concept))
        .route("/health", get(routes::health))
        .route("/models", get(routes::list_models))
        .route("/info", get(routes::api_info))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(%addr, "Starting panelsim API");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
