//! Axum HTTP channel — serves the chat API.
//!
//! ```text
//! POST /api/chat    — one chat turn, reply envelope
//! GET  /api/health  — aggregate service health
//! ```
//!
//! `serve()` drives the axum event loop; the shared [`CancellationToken`]
//! is wired to axum's graceful shutdown.

mod api;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::Pipeline;

pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/api/chat", post(api::chat))
        .route("/api/health", get(api::health))
        .with_state(pipeline)
}

pub async fn serve(
    bind: &str,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let router = build_router(pipeline);

    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| AppError::Server(format!("bind failed on {bind}: {e}")))?;

    info!(%bind, "api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Server(format!("server error: {e}")))?;

    info!("api shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn router() -> Router {
        let pipeline = Pipeline::from_config(&Config::test_default()).unwrap();
        build_router(Arc::new(pipeline))
    }

    fn chat_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_turn_returns_ok() {
        let response = router()
            .oneshot(chat_request(r#"{"message": "what is the Jal Jeevan Mission"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_message_is_bad_request() {
        let response = router()
            .oneshot(chat_request(r#"{"message": "   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
