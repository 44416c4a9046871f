//! Read-only statistics API

mod routes;

use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::pipeline::shutdown_signal;

pub struct AppState {
    pub db: Database,
}

/// Build the API router around an injected database handle
pub fn router(db: Database) -> Router {
    let state = Arc::new(AppState { db });

    Router::new()
        .route("/health", get(routes::health))
        .route("/customers/:customer_id/stats", get(routes::customer_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: &Config, db: Database) -> Result<()> {
    let app = router(db);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("API server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("API server shutting down");
        })
        .await?;

    Ok(())
}
