pub mod article;
pub mod chat;
pub mod message;

pub use article::{Article, ArticleId, ArticleSummary};
pub use chat::{Chat, ChatSummary, DEFAULT_CATEGORY};
pub use message::{ContentBlock, ContentFormat, Message, MessageContent, NewMessage, Role};
