//! HTTP layer: a thin axum router over the pipeline.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use querent_pipeline::Orchestrator;
use querent_store::SchemaCache;
use querent_types::Result;

/// Shared handles for every request: the orchestrator and the schema cache.
/// Both are safe for concurrent independent use.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub schema: SchemaCache,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn run(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "querent API listening");
    axum::serve(listener, app).await?;
    Ok(())
}
