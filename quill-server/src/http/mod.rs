//! Quill HTTP REST API
//!
//! Axum-based server exposing chats and articles as JSON routes.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function. The inner functions take plain arguments and return
//! `(StatusCode, Value)`, so they are testable without axum dispatch.
//!
//! Endpoints:
//! - GET    /                          redirect to the article index
//! - GET    /health                    health check with DB status
//! - GET    /version                   server version info
//! - GET    /chat/get_chats            chats with their latest message
//! - POST   /chat/create_chat          open a chat
//! - POST   /chat/send_message         send a user message, return the reply
//! - GET    /chat/get_chat_history     ordered messages of one chat
//! - DELETE /chat/delete_chat          delete a chat and its messages
//! - GET    /article/                  article index
//! - POST   /article/create_article
//! - GET    /article/get_article
//! - PUT    /article/update_article
//! - DELETE /article/delete_article

pub mod article;
pub mod chat;
mod error;

use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use quill_core::provider::ChatProvider;
use quill_core::{DataService, QuillConfig};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use error::{ApiError, ErrorResponse};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub data: DataService,
    pub provider: Arc<dyn ChatProvider>,
    pub config: QuillConfig,
}

/// Outcome of an inner function: status and JSON body on success.
pub type ApiResult = Result<(StatusCode, Value), ApiError>;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/chat/get_chats", get(chat::get_chats_handler))
        .route("/chat/create_chat", post(chat::create_chat_handler))
        .route("/chat/send_message", post(chat::send_message_handler))
        .route("/chat/get_chat_history", get(chat::get_chat_history_handler))
        .route("/chat/delete_chat", delete(chat::delete_chat_handler))
        .route("/article/", get(article::list_articles_handler))
        .route("/article/create_article", post(article::create_article_handler))
        .route("/article/get_article", get(article::get_article_handler))
        .route("/article/update_article", put(article::update_article_handler))
        .route("/article/delete_article", delete(article::delete_article_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    data: DataService,
    provider: Arc<dyn ChatProvider>,
    config: QuillConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = config.http_addr();
    let state = Arc::new(HttpState {
        data,
        provider,
        config,
    });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Quill HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Helpers shared by the route modules
// ============================================================================

/// Turn an inner result into the `(status, body)` pair handlers return.
pub fn into_http(result: ApiResult) -> (StatusCode, Value) {
    match result {
        Ok(ok) => ok,
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::error!(kind = e.kind(), error = %e, "Request failed");
            }
            let body = serde_json::to_value(e.to_response_body()).unwrap_or_else(|_| {
                serde_json::json!({ "error": e.to_string(), "status": "error" })
            });
            (status, body)
        }
    }
}

/// Required, non-blank string field.
pub fn require_field(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!("Missing {field}"))),
    }
}

/// Parse an identifier. Anything that is not a UUID cannot name a stored row,
/// so it is reported as not found.
pub fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::NotFound(format!("{what} not found")))
}

// ============================================================================
// Service routes
// ============================================================================

/// Inner health check: queries DB and returns (status_code, json_body).
pub async fn health_inner(data: &DataService, model: &str) -> (StatusCode, Value) {
    match quill_core::db::health_check(data.pool()).await {
        Ok(pg_ver) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": pg_ver,
                "model": model,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "quill/1",
    })
}

pub async fn index_handler() -> Redirect {
    Redirect::to("/article/")
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.data, &state.config.provider.model).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "quill/1");
    }

    #[test]
    fn test_into_http_passes_success_through() {
        let (status, body) = into_http(Ok((StatusCode::CREATED, serde_json::json!({"id": 1}))));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], 1);
    }

    #[test]
    fn test_into_http_renders_error_body() {
        let (status, body) = into_http(Err(ApiError::NotFound("Chat not found".into())));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Chat not found");
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "not_found");
    }

    #[test]
    fn test_require_field() {
        assert_eq!(require_field(Some("x".into()), "chat_id").unwrap(), "x");
        assert!(matches!(
            require_field(None, "chat_id"),
            Err(ApiError::Validation(ref m)) if m == "Missing chat_id"
        ));
        assert!(require_field(Some("   ".into()), "message").is_err());
    }

    #[test]
    fn test_parse_id_rejects_garbage_as_not_found() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "Chat").unwrap(), id);
        assert!(matches!(
            parse_id("not-a-uuid", "Chat"),
            Err(ApiError::NotFound(ref m)) if m == "Chat not found"
        ));
    }
}
