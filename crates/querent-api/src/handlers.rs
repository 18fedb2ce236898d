use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Querent analytics agent API" }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Natural-language question in, answer + SQL + rows out.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let question = req.question.trim();
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "question must not be empty" })),
        )
            .into_response();
    }

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, question, "chat request");

    let schema = match state.schema.current().await {
        Ok(schema) => schema,
        Err(e) => {
            tracing::error!(%request_id, error = %e, "schema unavailable");
            let status = e
                .http_status()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let report = state.orchestrator.ask(question, schema).await;
    tracing::info!(
        %request_id,
        rows = report.rows.len(),
        error = report.error.as_deref().unwrap_or("none"),
        "chat response"
    );
    (StatusCode::OK, Json(report)).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
