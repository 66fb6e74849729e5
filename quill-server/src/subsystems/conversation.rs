//! Chat orchestration: forward a user message to the provider and record the exchange.
//!
//! The provider is called before anything is written. Only a successful reply
//! leads to persistence, and then the user turn and the assistant turn are
//! stored together in one transaction. A failed send therefore leaves the chat
//! untouched and can simply be retried.

use quill_core::models::{ContentBlock, Message, MessageContent, NewMessage, Role};
use quill_core::provider::{ChatProvider, ChatTurn, ProviderError};
use quill_core::{DataError, DataService};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Chat not found: {0}")]
    ChatNotFound(Uuid),

    #[error("Chat provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Data(#[from] DataError),
}

/// Outcome of one successful send.
#[derive(Debug, Clone)]
pub struct ChatReply {
    /// Text extracted from the assistant reply.
    pub content: String,
    pub user_message: Message,
    pub assistant_message: Message,
}

/// Convert stored history into provider turns.
///
/// Tool messages that carry plain text and a tool-use id are re-wrapped as a
/// `tool_result` block so the provider can correlate them.
pub fn history_to_turns(history: &[Message]) -> Vec<ChatTurn> {
    history
        .iter()
        .map(|m| {
            let content = match (m.role, &m.content, &m.tool_use_id) {
                (Role::Tool, MessageContent::Text(text), Some(tool_use_id)) => {
                    MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: serde_json::Value::String(text.clone()),
                        is_error: None,
                    }])
                }
                (_, content, _) => content.clone(),
            };
            ChatTurn::new(m.role, content)
        })
        .collect()
}

/// Build the assistant message to store for a provider reply, lifting the
/// first tool call (if any) into the tool columns.
pub fn reply_message(content: MessageContent) -> NewMessage {
    let tool_use = content
        .tool_use()
        .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()));

    let message = NewMessage::assistant(content);
    match tool_use {
        Some((id, name, input)) => message.with_tool_use(id, name, input),
        None => message,
    }
}

pub async fn handle_chat(
    data: &DataService,
    provider: &dyn ChatProvider,
    chat_id: Uuid,
    message: &str,
    auth_token: Option<&str>,
) -> Result<ChatReply, ConversationError> {
    if data.get_chat_by_id(chat_id).await?.is_none() {
        return Err(ConversationError::ChatNotFound(chat_id));
    }

    let history = data.get_chat_messages(chat_id).await?;
    let mut turns = history_to_turns(&history);
    turns.push(ChatTurn::new(Role::User, message));

    tracing::debug!(
        chat_id = %chat_id,
        provider = provider.name(),
        turns = turns.len(),
        "Sending chat to provider"
    );

    let response = provider.complete(&turns, auth_token).await?;
    let content = response.reply_text();

    let (user_message, assistant_message) = data
        .record_exchange(chat_id, NewMessage::user(message), reply_message(response.content))
        .await?;

    tracing::debug!(
        chat_id = %chat_id,
        reply_message_id = assistant_message.id,
        "Recorded chat exchange"
    );

    Ok(ChatReply {
        content,
        user_message,
        assistant_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quill_core::provider::TurnRole;
    use serde_json::json;

    fn stored(id: i64, role: Role, content: MessageContent) -> Message {
        Message {
            id,
            chat_id: Uuid::nil(),
            role,
            content,
            tool_name: None,
            tool_use_id: None,
            tool_input: None,
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_history_keeps_order_and_roles() {
        let history = vec![
            stored(1, Role::User, "hi".into()),
            stored(2, Role::Assistant, "hello".into()),
        ];
        let turns = history_to_turns(&history);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].content, MessageContent::from("hi"));
        assert_eq!(turns[1].role, TurnRole::Assistant);
    }

    #[test]
    fn test_tool_text_becomes_tool_result_block() {
        let mut tool = stored(3, Role::Tool, "42".into());
        tool.tool_use_id = Some("toolu_01".to_string());

        let turns = history_to_turns(&[tool]);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(
            turns[0].content,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "toolu_01".to_string(),
                content: json!("42"),
                is_error: None,
            }])
        );
    }

    #[test]
    fn test_tool_message_without_id_is_sent_as_is() {
        let tool = stored(4, Role::Tool, "orphan output".into());
        let turns = history_to_turns(&[tool]);
        assert_eq!(turns[0].content, MessageContent::from("orphan output"));
    }

    #[test]
    fn test_reply_message_lifts_tool_call() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text {
                text: "Checking".to_string(),
            },
            ContentBlock::ToolUse {
                id: "toolu_09".to_string(),
                name: "weather".to_string(),
                input: json!({"city": "Oslo"}),
            },
        ]);
        let message = reply_message(content.clone());
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, content);
        assert_eq!(message.tool_name.as_deref(), Some("weather"));
        assert_eq!(message.tool_use_id.as_deref(), Some("toolu_09"));
        assert_eq!(message.tool_input, Some(json!({"city": "Oslo"})));
    }

    #[test]
    fn test_reply_message_plain_text() {
        let message = reply_message("just text".into());
        assert!(message.tool_name.is_none());
        assert!(message.tool_use_id.is_none());
    }
}
