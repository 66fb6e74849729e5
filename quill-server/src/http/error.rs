//! HTTP error type: maps each failure class to a status code and the shared
//! `{error, status, kind}` body.

use axum::http::StatusCode;
use quill_core::DataError;
use serde::Serialize;
use thiserror::Error;

use crate::subsystems::conversation::ConversationError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The external chat provider failed. Still a 500; `kind` tells it apart.
    #[error("{0}")]
    Provider(String),

    /// The database failed.
    #[error("{0}")]
    Storage(String),

    #[error("{0}")]
    Internal(String),
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
    pub kind: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Provider(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Provider(_) => "provider",
            ApiError::Storage(_) => "storage",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            status: "error".to_string(),
            kind: self.kind().to_string(),
        }
    }
}

impl From<DataError> for ApiError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::Conflict(msg) => ApiError::Conflict(msg),
            DataError::Database(e) => ApiError::Storage(e.to_string()),
            DataError::Corrupt(msg) => ApiError::Storage(msg),
            DataError::Serialization(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::ChatNotFound(_) => ApiError::NotFound("Chat not found".to_string()),
            ConversationError::Provider(e) => ApiError::Provider(e.to_string()),
            ConversationError::Data(e) => e.into(),
        }
    }
}
