use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::MessageContent;

/// Category assigned when the caller does not name one.
pub const DEFAULT_CATEGORY: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chat {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// A chat together with the content of its most recent message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSummary {
    pub id: Uuid,
    pub last_message: Option<MessageContent>,
}
