//! `/article` routes.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use quill_core::DataService;
use serde::Deserialize;
use serde_json::json;

use super::{into_http, parse_id, require_field, ApiError, ApiResult, HttpState};

#[derive(Debug, Deserialize, Default)]
pub struct CreateArticleRequest {
    pub article_name: Option<String>,
    pub article_content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateArticleRequest {
    pub article_id: Option<String>,
    pub article_name: Option<String>,
    pub article_content: Option<String>,
}

/// Used both as the `get_article` query and the `delete_article` body.
#[derive(Debug, Deserialize, Default)]
pub struct ArticleIdParams {
    pub article_id: Option<String>,
}

fn article_not_found() -> ApiError {
    ApiError::NotFound("Article not found".to_string())
}

// ============================================================================
// Inner functions
// ============================================================================

pub async fn list_articles_inner(data: &DataService) -> ApiResult {
    let articles = data.get_all_articles_list().await?;
    Ok((StatusCode::OK, json!(articles)))
}

/// Missing content is stored as an empty document.
pub async fn create_article_inner(data: &DataService, req: CreateArticleRequest) -> ApiResult {
    let name = require_field(req.article_name, "article_name")?;
    let content = req.article_content.unwrap_or_default();

    let created = data.create_article(&name, &content).await?;
    tracing::debug!(article_id = %created.id, article_name = %name, "Article created");
    Ok((StatusCode::CREATED, json!(created)))
}

pub async fn get_article_inner(data: &DataService, params: ArticleIdParams) -> ApiResult {
    let raw = require_field(params.article_id, "article_id")?;
    let id = parse_id(&raw, "Article")?;

    match data.get_article_by_id(id).await? {
        Some(article) => Ok((StatusCode::OK, json!(article))),
        None => Err(article_not_found()),
    }
}

/// Name and content are both overwritten, so both must be sent. An empty
/// content string is allowed; a missing one is rejected.
pub async fn update_article_inner(data: &DataService, req: UpdateArticleRequest) -> ApiResult {
    let raw = require_field(req.article_id, "article_id")?;
    let name = require_field(req.article_name, "article_name")?;
    let content = req
        .article_content
        .ok_or_else(|| ApiError::Validation("Missing article_content".to_string()))?;
    let id = parse_id(&raw, "Article")?;

    match data.update_article(id, &name, &content).await? {
        Some(summary) => Ok((StatusCode::OK, json!(summary))),
        None => Err(article_not_found()),
    }
}

pub async fn delete_article_inner(data: &DataService, req: ArticleIdParams) -> ApiResult {
    let raw = require_field(req.article_id, "article_id")?;
    let id = parse_id(&raw, "Article")?;

    if !data.delete_article(id).await? {
        return Err(article_not_found());
    }
    Ok((StatusCode::OK, json!({ "message": "Article deleted" })))
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn list_articles_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = into_http(list_articles_inner(&state.data).await);
    (status, Json(body))
}

pub async fn create_article_handler(
    State(state): State<Arc<HttpState>>,
    req: Option<Json<CreateArticleRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = into_http(create_article_inner(&state.data, req).await);
    (status, Json(body))
}

pub async fn get_article_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ArticleIdParams>,
) -> impl IntoResponse {
    let (status, body) = into_http(get_article_inner(&state.data, params).await);
    (status, Json(body))
}

pub async fn update_article_handler(
    State(state): State<Arc<HttpState>>,
    req: Option<Json<UpdateArticleRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = into_http(update_article_inner(&state.data, req).await);
    (status, Json(body))
}

pub async fn delete_article_handler(
    State(state): State<Arc<HttpState>>,
    req: Option<Json<ArticleIdParams>>,
) -> impl IntoResponse {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let (status, body) = into_http(delete_article_inner(&state.data, req).await);
    (status, Json(body))
}
