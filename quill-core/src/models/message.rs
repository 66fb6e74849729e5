use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// One typed block of structured message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Any other block type (`thinking`, `image`, ...), kept verbatim.
    #[serde(untagged)]
    Other(serde_json::Value),
}

/// Message content: either plain text or a sequence of typed blocks.
///
/// Serializes untagged, so JSON sees a string or an array of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// How `messages.content` is encoded in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Text,
    Blocks,
}

impl ContentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Text => "text",
            ContentFormat::Blocks => "blocks",
        }
    }
}

impl FromStr for ContentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentFormat::Text),
            "blocks" => Ok(ContentFormat::Blocks),
            other => Err(format!("unknown content format: {other}")),
        }
    }
}

impl MessageContent {
    pub fn format(&self) -> ContentFormat {
        match self {
            MessageContent::Text(_) => ContentFormat::Text,
            MessageContent::Blocks(_) => ContentFormat::Blocks,
        }
    }

    /// Text is stored verbatim; blocks are stored as their JSON encoding.
    pub fn to_storage(&self) -> Result<(ContentFormat, String), serde_json::Error> {
        match self {
            MessageContent::Text(text) => Ok((ContentFormat::Text, text.clone())),
            MessageContent::Blocks(blocks) => {
                Ok((ContentFormat::Blocks, serde_json::to_string(blocks)?))
            }
        }
    }

    pub fn from_storage(format: ContentFormat, raw: String) -> Result<Self, serde_json::Error> {
        match format {
            ContentFormat::Text => Ok(MessageContent::Text(raw)),
            ContentFormat::Blocks => Ok(MessageContent::Blocks(serde_json::from_str(&raw)?)),
        }
    }

    /// The first piece of plain text: the string itself, or the first text block.
    pub fn first_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Text shown to a caller: the first text, or the JSON rendering when there is none.
    pub fn reply_text(&self) -> String {
        match self.first_text() {
            Some(text) => text.to_string(),
            None => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    /// First `tool_use` block as `(id, name, input)`.
    pub fn tool_use(&self) -> Option<(&str, &str, &serde_json::Value)> {
        match self {
            MessageContent::Text(_) => None,
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            }),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        MessageContent::Blocks(blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: Uuid,
    pub role: Role,
    pub content: MessageContent,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: MessageContent,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_result: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            tool_use_id: None,
            tool_input: None,
            tool_result: None,
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_tool_use(
        mut self,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        self.tool_use_id = Some(tool_use_id.into());
        self.tool_name = Some(tool_name.into());
        self.tool_input = Some(input);
        self
    }

    pub fn with_tool_result(mut self, tool_use_id: impl Into<String>, result: serde_json::Value) -> Self {
        self.tool_use_id = Some(tool_use_id.into());
        self.tool_result = Some(result);
        self
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    id: i64,
    chat_id: Uuid,
    role: String,
    content: String,
    content_format: String,
    tool_name: Option<String>,
    tool_use_id: Option<String>,
    tool_input: Option<serde_json::Value>,
    tool_result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = DataError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(DataError::Corrupt)?;
        let format: ContentFormat = row.content_format.parse().map_err(DataError::Corrupt)?;
        let content = MessageContent::from_storage(format, row.content)?;

        Ok(Message {
            id: row.id,
            chat_id: row.chat_id,
            role,
            content,
            tool_name: row.tool_name,
            tool_use_id: row.tool_use_id,
            tool_input: row.tool_input,
            tool_result: row.tool_result,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_blocks() -> Vec<ContentBlock> {
        vec![
            ContentBlock::Text {
                text: "Looking that up".to_string(),
            },
            ContentBlock::ToolUse {
                id: "toolu_01".to_string(),
                name: "search".to_string(),
                input: json!({"query": "rust"}),
            },
        ]
    }

    #[test]
    fn test_unknown_blocks_survive_storage_and_are_skipped_for_text() {
        let raw = r#"[{"type":"thinking","thinking":"hmm","signature":"x"},{"type":"text","text":"answer"}]"#;
        let content = MessageContent::from_storage(ContentFormat::Blocks, raw.to_string()).unwrap();

        match &content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(
                    blocks[0],
                    ContentBlock::Other(json!({"type": "thinking", "thinking": "hmm", "signature": "x"}))
                );
                assert_eq!(blocks[1], ContentBlock::Text { text: "answer".to_string() });
            }
            other => panic!("expected blocks, got {:?}", other),
        }
        assert_eq!(content.first_text(), Some("answer"));
        assert!(content.tool_use().is_none());

        let (format, stored) = content.to_storage().unwrap();
        assert_eq!(format, ContentFormat::Blocks);
        let stored: serde_json::Value = serde_json::from_str(&stored).unwrap();
        let expected: serde_json::Value = serde_json::from_str(raw).unwrap();
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_role_parse_and_display() {
        for role in [Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
            assert_eq!(role.to_string(), role.as_str());
        }
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_text_is_stored_verbatim() {
        let content = MessageContent::from("[not json, just text]");
        let (format, raw) = content.to_storage().unwrap();
        assert_eq!(format, ContentFormat::Text);
        assert_eq!(raw, "[not json, just text]");
        assert_eq!(MessageContent::from_storage(format, raw).unwrap(), content);
    }

    #[test]
    fn test_blocks_are_stored_as_json() {
        let content = MessageContent::Blocks(tool_blocks());
        let (format, raw) = content.to_storage().unwrap();
        assert_eq!(format, ContentFormat::Blocks);

        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["type"], "text");
        assert_eq!(value[1]["type"], "tool_use");
        assert_eq!(value[1]["input"]["query"], "rust");

        assert_eq!(MessageContent::from_storage(format, raw).unwrap(), content);
    }

    #[test]
    fn test_untagged_json_shape() {
        let text: MessageContent = serde_json::from_value(json!("hi")).unwrap();
        assert_eq!(text, MessageContent::Text("hi".to_string()));

        let blocks: MessageContent =
            serde_json::from_value(json!([{"type": "text", "text": "hi"}])).unwrap();
        assert_eq!(
            blocks,
            MessageContent::Blocks(vec![ContentBlock::Text {
                text: "hi".to_string()
            }])
        );

        let result = ContentBlock::ToolResult {
            tool_use_id: "toolu_01".to_string(),
            content: json!("42"),
            is_error: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("is_error").is_none());
    }

    #[test]
    fn test_reply_text_prefers_first_text_block() {
        let content = MessageContent::Blocks(tool_blocks());
        assert_eq!(content.reply_text(), "Looking that up");
        assert_eq!(MessageContent::from("plain").reply_text(), "plain");
    }

    #[test]
    fn test_reply_text_without_text_block_renders_json() {
        let content = MessageContent::Blocks(vec![ContentBlock::ToolUse {
            id: "toolu_02".to_string(),
            name: "calc".to_string(),
            input: json!({}),
        }]);
        let rendered = content.reply_text();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value[0]["name"], "calc");

        assert_eq!(MessageContent::Blocks(vec![]).reply_text(), "[]");
    }

    #[test]
    fn test_tool_use_lookup() {
        let content = MessageContent::Blocks(tool_blocks());
        let (id, name, input) = content.tool_use().unwrap();
        assert_eq!(id, "toolu_01");
        assert_eq!(name, "search");
        assert_eq!(input["query"], "rust");
        assert!(MessageContent::from("x").tool_use().is_none());
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let row = MessageRow {
            id: 1,
            chat_id: Uuid::new_v4(),
            role: "narrator".to_string(),
            content: "x".to_string(),
            content_format: "text".to_string(),
            tool_name: None,
            tool_use_id: None,
            tool_input: None,
            tool_result: None,
            created_at: Utc::now(),
        };
        match Message::try_from(row) {
            Err(DataError::Corrupt(msg)) => assert!(msg.contains("narrator")),
            other => panic!("Expected Corrupt error, got {:?}", other),
        }
    }
}
