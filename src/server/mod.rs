pub mod handlers;
pub mod headers;
pub mod state;

use crate::config::Config;
use axum::{Router, routing::get};
use state::AppState;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the router for the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::render_metrics))
        .route(
            "/proxy/{*target}",
            get(handlers::proxy::serve_proxy).options(handlers::proxy::preflight),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the router with a `reqwest`-backed upstream transport.
pub fn build_router(config: Config) -> Result<Router, reqwest::Error> {
    Ok(router(AppState::new(config)?))
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let app = build_router(config)?;

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Server listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
