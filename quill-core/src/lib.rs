pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod models;
pub mod provider;

pub use config::QuillConfig;
pub use data::DataService;
pub use error::{DataError, QuillError};
pub use provider::{
    AnthropicChatClient, AnthropicConfig, ChatProvider, ChatResponse, ChatTurn, ProviderError,
    TurnRole,
};
