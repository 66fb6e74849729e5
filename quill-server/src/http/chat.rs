//! `/chat` routes.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use quill_core::models::{ChatSummary, Message, DEFAULT_CATEGORY};
use quill_core::provider::ChatProvider;
use quill_core::DataService;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{into_http, parse_id, require_field, ApiError, ApiResult, HttpState};
use crate::subsystems::conversation::handle_chat;

/// Shown in the chat list for chats that have no messages.
pub const NO_MESSAGES_PLACEHOLDER: &str = "No messages yet";

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct CreateChatRequest {
    pub external_id: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SendMessageRequest {
    pub chat_id: Option<String>,
    pub message: Option<String>,
    /// Overrides the configured provider key for this request only.
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatIdParams {
    pub chat_id: Option<String>,
}

// ============================================================================
// Inner functions
// ============================================================================

fn summary_json(summary: &ChatSummary) -> Value {
    let last_message = match &summary.last_message {
        Some(content) => json!(content),
        None => json!(NO_MESSAGES_PLACEHOLDER),
    };
    json!({ "id": summary.id, "last_message": last_message })
}

fn history_json(message: &Message) -> Value {
    json!({
        "content": message.content,
        "role": message.role,
        "tool_name": message.tool_name,
    })
}

pub async fn get_chats_inner(data: &DataService) -> ApiResult {
    let summaries = data.get_chat_summaries().await?;
    let body: Vec<Value> = summaries.iter().map(summary_json).collect();
    Ok((StatusCode::OK, Value::Array(body)))
}

pub async fn create_chat_inner(data: &DataService, req: CreateChatRequest) -> ApiResult {
    let external_id = req.external_id.filter(|id| !id.trim().is_empty());
    let category = req
        .category
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let chat = data.create_chat(external_id.as_deref(), &category).await?;
    Ok((StatusCode::CREATED, json!({ "chat_id": chat.id })))
}

pub async fn send_message_inner(
    data: &DataService,
    provider: &dyn ChatProvider,
    req: SendMessageRequest,
) -> ApiResult {
    let chat_id = require_field(req.chat_id, "chat_id")?;
    let message = require_field(req.message, "message")?;
    let chat_id = parse_id(&chat_id, "Chat")?;

    let reply = handle_chat(data, provider, chat_id, &message, req.auth_token.as_deref()).await?;
    Ok((StatusCode::OK, json!({ "content": reply.content })))
}

pub async fn get_chat_history_inner(data: &DataService, params: ChatIdParams) -> ApiResult {
    let chat_id = require_field(params.chat_id, "chat_id")?;
    let chat_id = parse_id(&chat_id, "Chat")?;

    if data.get_chat_by_id(chat_id).await?.is_none() {
        return Err(ApiError::NotFound("Chat not found".to_string()));
    }

    let messages = data.get_chat_messages(chat_id).await?;
    let body: Vec<Value> = messages.iter().map(history_json).collect();
    Ok((StatusCode::OK, Value::Array(body)))
}

/// Idempotent: an unknown (or unparseable) id is confirmed the same way.
pub async fn delete_chat_inner(data: &DataService, req: ChatIdParams) -> ApiResult {
    let chat_id = require_field(req.chat_id, "chat_id")?;

    if let Ok(id) = parse_id(&chat_id, "Chat") {
        let found = data.delete_chat(id).await?;
        tracing::debug!(chat_id = %id, found, "Chat delete requested");
    }

    Ok((StatusCode::OK, json!({ "message": "Chat deleted" })))
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn get_chats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = into_http(get_chats_inner(&state.data).await);
    (status, Json(body))
}

pub async fn create_chat_handler(
    State(state): State<Arc<HttpState>>,
    req: Option<Json<CreateChatRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = into_http(create_chat_inner(&state.data, req).await);
    (status, Json(body))
}

pub async fn send_message_handler(
    State(state): State<Arc<HttpState>>,
    req: Option<Json<SendMessageRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let result = send_message_inner(&state.data, state.provider.as_ref(), req).await;
    let (status, body) = into_http(result);
    (status, Json(body))
}

pub async fn get_chat_history_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ChatIdParams>,
) -> impl IntoResponse {
    let (status, body) = into_http(get_chat_history_inner(&state.data, params).await);
    (status, Json(body))
}

pub async fn delete_chat_handler(
    State(state): State<Arc<HttpState>>,
    req: Option<Json<ChatIdParams>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = into_http(delete_chat_inner(&state.data, req).await);
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::models::{ContentBlock, MessageContent, Role};
    use uuid::Uuid;

    #[test]
    fn test_summary_placeholder_when_no_messages() {
        let summary = ChatSummary {
            id: Uuid::nil(),
            last_message: None,
        };
        let v = summary_json(&summary);
        assert_eq!(v["last_message"], NO_MESSAGES_PLACEHOLDER);
        assert_eq!(v["id"], Uuid::nil().to_string());
    }

    #[test]
    fn test_summary_keeps_structured_content() {
        let summary = ChatSummary {
            id: Uuid::nil(),
            last_message: Some(MessageContent::Blocks(vec![ContentBlock::Text {
                text: "hi".to_string(),
            }])),
        };
        let v = summary_json(&summary);
        assert_eq!(v["last_message"][0]["type"], "text");
        assert_eq!(v["last_message"][0]["text"], "hi");
    }

    #[test]
    fn test_history_entry_shape() {
        let message = Message {
            id: 7,
            chat_id: Uuid::nil(),
            role: Role::Assistant,
            content: "hello".into(),
            tool_name: Some("search".to_string()),
            tool_use_id: None,
            tool_input: None,
            tool_result: None,
            created_at: chrono::Utc::now(),
        };
        let v = history_json(&message);
        assert_eq!(v["content"], "hello");
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["tool_name"], "search");
        assert_eq!(v.as_object().map(|o| o.len()), Some(3));
    }
}
