//! Chat provider client for Quill
//!
//! Provides a `ChatProvider` trait and `AnthropicChatClient`, which talks to
//! the Anthropic Messages API (`POST /v1/messages`). Only the slice of that
//! API Quill relies on is modelled: a model name, a token budget, an optional
//! system prompt and the conversation turns in; a `content` value (plain text
//! or typed blocks) out.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::ProviderConfig;
use crate::models::{MessageContent, Role};

/// Value of the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

// ============================================================================
// ChatProvider trait
// ============================================================================

/// Abstraction over chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generate the next assistant turn for `turns`.
    ///
    /// `auth_token`, when present, is used instead of the configured API key.
    async fn complete(
        &self,
        turns: &[ChatTurn],
        auth_token: Option<&str>,
    ) -> Result<ChatResponse, ProviderError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Speaker slot on the provider wire. Tool output travels in the user slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl From<Role> for TurnRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Assistant => TurnRole::Assistant,
            Role::User | Role::Tool => TurnRole::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: MessageContent,
}

impl ChatTurn {
    pub fn new(role: impl Into<TurnRole>, content: impl Into<MessageContent>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatResponse {
    pub content: MessageContent,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl ChatResponse {
    pub fn reply_text(&self) -> String {
        self.content.reply_text()
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Provider returned an empty reply")]
    EmptyResponse,

    /// `attempts` counts every request made, the first one included.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl ProviderError {
    /// Transport failures, rate limiting and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => !e.is_decode() && !e.is_builder(),
            ProviderError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl From<&ProviderConfig> for AnthropicConfig {
    fn from(config: &ProviderConfig) -> Self {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

// ============================================================================
// Anthropic API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatTurn],
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// ============================================================================
// AnthropicChatClient
// ============================================================================

/// Anthropic Messages API client.
///
/// Does not derive `Debug`, so the API key never reaches logs.
#[derive(Clone)]
pub struct AnthropicChatClient {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicChatClient {
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete_once(&self, turns: &[ChatTurn], api_key: &str) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.config.base_url);

        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: self.config.system_prompt.as_deref(),
            messages: turns,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::warn!(code = status.as_u16(), message = %message, "Chat provider API error");

            return Err(ProviderError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let reply: ChatResponse = response.json().await?;

        if matches!(&reply.content, MessageContent::Text(t) if t.is_empty()) {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(reply)
    }
}

#[async_trait]
impl ChatProvider for AnthropicChatClient {
    async fn complete(
        &self,
        turns: &[ChatTurn],
        auth_token: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let api_key = match auth_token.filter(|t| !t.is_empty()) {
            Some(token) => token,
            None if !self.config.api_key.is_empty() => self.config.api_key.as_str(),
            None => return Err(ProviderError::MissingApiKey),
        };

        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.complete_once(turns, api_key),
            ProviderError::is_retryable,
        )
        .await;

        match result {
            Ok(reply) => {
                tracing::debug!(
                    model = ?reply.model,
                    stop_reason = ?reply.stop_reason,
                    "Chat provider replied"
                );
                Ok(reply)
            }
            Err(e) if e.is_retryable() && self.config.max_retries > 0 => {
                tracing::error!(
                    attempts = self.config.max_retries + 1,
                    error = %e,
                    "All chat provider retry attempts failed"
                );
                Err(ProviderError::RetryExhausted {
                    attempts: self.config.max_retries + 1,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentBlock;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str, api_key: &str) -> AnthropicConfig {
        AnthropicConfig {
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            model: "claude-test".to_string(),
            max_tokens: 256,
            system_prompt: None,
            timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn blocks_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-test",
            "content": [{ "type": "text", "text": text }],
            "stop_reason": "end_turn"
        })
    }

    fn hello() -> Vec<ChatTurn> {
        vec![ChatTurn::new(Role::User, "hello")]
    }

    #[tokio::test]
    async fn test_complete_sends_messages_request() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .and(body_json(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 256,
                "messages": [
                    { "role": "user", "content": "hello" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(blocks_response("Hi there")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.complete(&hello(), None).await.unwrap();
        assert_eq!(reply.reply_text(), "Hi there");
        assert_eq!(reply.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn test_unknown_blocks_in_reply_are_tolerated() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "claude-test",
                "content": [
                    { "type": "thinking", "thinking": "hmm", "signature": "x" },
                    { "type": "text", "text": "answer" }
                ],
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.complete(&hello(), None).await.unwrap();
        assert_eq!(reply.reply_text(), "answer");
        match &reply.content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(&blocks[0], ContentBlock::Other(v) if v["type"] == "thinking"));
            }
            other => panic!("Expected blocks, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_system_prompt_and_block_turns_are_serialized() {
        let mock_server = MockServer::start().await;
        let mut config = test_config(&mock_server.uri(), "test-key");
        config.system_prompt = Some("Be brief.".to_string());
        let client = AnthropicChatClient::new(config).unwrap();

        let turns = vec![
            ChatTurn::new(Role::User, "what is 2+2?"),
            ChatTurn::new(
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "toolu_01".to_string(),
                    name: "calc".to_string(),
                    input: serde_json::json!({"expr": "2+2"}),
                }],
            ),
            ChatTurn::new(
                Role::Tool,
                vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_01".to_string(),
                    content: serde_json::json!("4"),
                    is_error: None,
                }],
            ),
        ];

        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "model": "claude-test",
                "max_tokens": 256,
                "system": "Be brief.",
                "messages": [
                    { "role": "user", "content": "what is 2+2?" },
                    { "role": "assistant", "content": [
                        { "type": "tool_use", "id": "toolu_01", "name": "calc", "input": { "expr": "2+2" } }
                    ]},
                    { "role": "user", "content": [
                        { "type": "tool_result", "tool_use_id": "toolu_01", "content": "4" }
                    ]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(blocks_response("4")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.complete(&turns, None).await.unwrap();
        assert_eq!(reply.reply_text(), "4");
    }

    #[tokio::test]
    async fn test_plain_text_content_is_accepted() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "content": "plain reply" })),
            )
            .mount(&mock_server)
            .await;

        let reply = client.complete(&hello(), None).await.unwrap();
        assert_eq!(reply.content, MessageContent::Text("plain reply".to_string()));
        assert_eq!(reply.reply_text(), "plain reply");
    }

    #[tokio::test]
    async fn test_auth_token_overrides_api_key() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "configured-key")).unwrap();

        Mock::given(method("POST"))
            .and(header("x-api-key", "caller-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(blocks_response("ok")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.complete(&hello(), Some("caller-token")).await.unwrap();
        assert_eq!(reply.reply_text(), "ok");
    }

    #[tokio::test]
    async fn test_missing_api_key_without_token_fails_before_request() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(blocks_response("never")))
            .expect(0)
            .mount(&mock_server)
            .await;

        match client.complete(&hello(), None).await {
            Err(ProviderError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other.map(|r| r.content)),
        }
    }

    #[tokio::test]
    async fn test_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "type": "error",
                "error": { "type": "rate_limit_error", "message": "Rate limited" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(blocks_response("after retry")))
            .mount(&mock_server)
            .await;

        let reply = client.complete(&hello(), None).await.unwrap();
        assert_eq!(reply.reply_text(), "after retry");
    }

    #[tokio::test]
    async fn test_server_errors_exhaust_retries() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
                "type": "error",
                "error": { "type": "overloaded_error", "message": "Overloaded" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        match client.complete(&hello(), None).await {
            Err(ProviderError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("Overloaded"), "last error was: {last}");
            }
            other => panic!("Expected RetryExhausted, got {:?}", other.map(|r| r.content)),
        }
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let mock_server = MockServer::start().await;
        let client = AnthropicChatClient::new(test_config(&mock_server.uri(), "test-key")).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "type": "error",
                "error": { "type": "invalid_request_error", "message": "messages: field required" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&hello(), None).await {
            Err(ProviderError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "messages: field required");
            }
            other => panic!("Expected Api error, got {:?}", other.map(|r| r.content)),
        }
    }

    #[test]
    fn test_tool_role_travels_as_user() {
        assert_eq!(TurnRole::from(Role::Tool), TurnRole::User);
        assert_eq!(TurnRole::from(Role::User), TurnRole::User);
        assert_eq!(TurnRole::from(Role::Assistant), TurnRole::Assistant);
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let settings = ProviderConfig {
            base_url: "http://localhost:9999/".to_string(),
            api_key: Some("k".to_string()),
            ..ProviderConfig::default()
        };
        let config = AnthropicConfig::from(&settings);
        assert_eq!(config.base_url, "http://localhost:9999");
        assert_eq!(config.api_key, "k");
    }
}
