//! Axum handlers for `/api/*` routes.
//!
//! Each handler receives the shared [`Pipeline`] via
//! [`axum::extract::State`] and returns an axum [`Response`]. The pipeline
//! never fails a turn, so the timeout wrappers only fire on pathological
//! stalls.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::pipeline::{ChatRequest, Pipeline};

/// Ceiling above the pipeline's own upstream budgets.
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

/// POST /api/chat
pub(super) async fn chat(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            json_error("empty_message", "no message provided"),
        )
            .into_response();
    }

    match tokio::time::timeout(CHAT_TIMEOUT, pipeline.handle(request)).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(_) => {
            warn!("chat turn timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                json_error("timeout", "chat turn timed out"),
            )
                .into_response()
        }
    }
}

/// GET /api/health
pub(super) async fn health(State(pipeline): State<Arc<Pipeline>>) -> Response {
    match tokio::time::timeout(HEALTH_TIMEOUT, pipeline.health()).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(_) => {
            warn!("health check timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                json_error("timeout", "health check timed out"),
            )
                .into_response()
        }
    }
}
