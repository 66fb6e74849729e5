//! Data service: create/read/update/delete over chats, messages and articles.
//!
//! Two layers:
//! - statement functions (`find_chat`, `insert_message`, ...) that take an
//!   explicit `&mut PgConnection`, so callers decide the transaction scope;
//! - [`DataService`], which owns the pool and runs every mutating operation in
//!   its own transaction. A transaction that is not committed is rolled back
//!   when it is dropped, so any `?` exit between `begin` and `commit` undoes
//!   the partial work and hands the error back to the caller.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::DataError;
use crate::models::message::MessageRow;
use crate::models::{
    Article, ArticleId, ArticleSummary, Chat, ChatSummary, ContentFormat, Message, MessageContent,
    NewMessage,
};

const CHAT_COLUMNS: &str = "id, external_id, category, created_at";

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, content_format, tool_name, \
     tool_use_id, tool_input, tool_result, created_at";

// ============================================================================
// Statement functions
// ============================================================================

pub async fn find_chat(conn: &mut PgConnection, id: Uuid) -> Result<Option<Chat>, DataError> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1");
    let chat = sqlx::query_as::<_, Chat>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(chat)
}

pub async fn find_chat_by_external_id(
    conn: &mut PgConnection,
    external_id: &str,
) -> Result<Option<Chat>, DataError> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE external_id = $1");
    let chat = sqlx::query_as::<_, Chat>(&sql)
        .bind(external_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(chat)
}

pub async fn insert_chat(
    conn: &mut PgConnection,
    external_id: Option<&str>,
    category: &str,
) -> Result<Chat, DataError> {
    let sql = format!(
        "INSERT INTO chats (id, external_id, category) VALUES ($1, $2, $3) RETURNING {CHAT_COLUMNS}"
    );
    sqlx::query_as::<_, Chat>(&sql)
        .bind(Uuid::new_v4())
        .bind(external_id)
        .bind(category)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            DataError::from_insert(e, || {
                format!("external_id {:?} is already used by another chat", external_id.unwrap_or_default())
            })
        })
}

/// Insert a chat for `external_id` unless one exists; `None` when another
/// row already holds the key.
pub async fn insert_chat_if_absent(
    conn: &mut PgConnection,
    external_id: &str,
    category: &str,
) -> Result<Option<Chat>, DataError> {
    let sql = format!(
        "INSERT INTO chats (id, external_id, category) VALUES ($1, $2, $3) \
         ON CONFLICT (external_id) WHERE external_id IS NOT NULL DO NOTHING \
         RETURNING {CHAT_COLUMNS}"
    );
    let chat = sqlx::query_as::<_, Chat>(&sql)
        .bind(Uuid::new_v4())
        .bind(external_id)
        .bind(category)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(chat)
}

pub async fn list_chats(conn: &mut PgConnection) -> Result<Vec<Chat>, DataError> {
    let sql = format!("SELECT {CHAT_COLUMNS} FROM chats ORDER BY created_at, id");
    let chats = sqlx::query_as::<_, Chat>(&sql).fetch_all(&mut *conn).await?;
    Ok(chats)
}

pub async fn list_chat_summaries(conn: &mut PgConnection) -> Result<Vec<ChatSummary>, DataError> {
    let rows: Vec<(Uuid, Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT c.id, last.content, last.content_format
        FROM chats c
        LEFT JOIN LATERAL (
            SELECT m.content, m.content_format
            FROM messages m
            WHERE m.chat_id = c.id
            ORDER BY m.created_at DESC, m.id DESC
            LIMIT 1
        ) last ON TRUE
        ORDER BY c.created_at, c.id
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(id, content, format)| -> Result<ChatSummary, DataError> {
            let last_message = match (content, format) {
                (Some(content), Some(format)) => {
                    let format: ContentFormat = format.parse().map_err(DataError::Corrupt)?;
                    Some(MessageContent::from_storage(format, content)?)
                }
                _ => None,
            };
            Ok(ChatSummary { id, last_message })
        })
        .collect()
}

pub async fn delete_chat_row(conn: &mut PgConnection, id: Uuid) -> Result<bool, DataError> {
    let result = sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_message(
    conn: &mut PgConnection,
    chat_id: Uuid,
    message: &NewMessage,
) -> Result<Message, DataError> {
    let (format, content) = message.content.to_storage()?;
    let sql = format!(
        "INSERT INTO messages \
         (chat_id, role, content, content_format, tool_name, tool_use_id, tool_input, tool_result) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING {MESSAGE_COLUMNS}"
    );
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(chat_id)
        .bind(message.role.as_str())
        .bind(content)
        .bind(format.as_str())
        .bind(message.tool_name.as_deref())
        .bind(message.tool_use_id.as_deref())
        .bind(message.tool_input.as_ref())
        .bind(message.tool_result.as_ref())
        .fetch_one(&mut *conn)
        .await?;
    Message::try_from(row)
}

pub async fn list_messages(conn: &mut PgConnection, chat_id: Uuid) -> Result<Vec<Message>, DataError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = $1 ORDER BY created_at, id"
    );
    let rows = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(chat_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(Message::try_from).collect()
}

pub async fn insert_article(
    conn: &mut PgConnection,
    name: &str,
    content: &str,
) -> Result<ArticleId, DataError> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO articles (id, article_name, article_content) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(content)
        .execute(&mut *conn)
        .await?;
    Ok(ArticleId { id })
}

pub async fn find_article(conn: &mut PgConnection, id: Uuid) -> Result<Option<Article>, DataError> {
    let article = sqlx::query_as::<_, Article>(
        "SELECT id, article_name, article_content, created_at, updated_at FROM articles WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(article)
}

pub async fn list_article_summaries(conn: &mut PgConnection) -> Result<Vec<ArticleSummary>, DataError> {
    let articles = sqlx::query_as::<_, ArticleSummary>(
        "SELECT id, article_name FROM articles ORDER BY created_at, id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(articles)
}

pub async fn update_article_row(
    conn: &mut PgConnection,
    id: Uuid,
    name: &str,
    content: &str,
) -> Result<Option<ArticleSummary>, DataError> {
    let summary = sqlx::query_as::<_, ArticleSummary>(
        r#"
        UPDATE articles
        SET article_name = $2, article_content = $3, updated_at = clock_timestamp()
        WHERE id = $1
        RETURNING id, article_name
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(content)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(summary)
}

pub async fn delete_article_row(conn: &mut PgConnection, id: Uuid) -> Result<bool, DataError> {
    let result = sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// DataService
// ============================================================================

/// Stateless façade over the pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DataService {
    pool: PgPool,
}

impl DataService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- chats ---

    pub async fn get_chat_by_id(&self, id: Uuid) -> Result<Option<Chat>, DataError> {
        let mut conn = self.pool.acquire().await?;
        find_chat(&mut *conn, id).await
    }

    pub async fn get_all_chats(&self) -> Result<Vec<Chat>, DataError> {
        let mut conn = self.pool.acquire().await?;
        list_chats(&mut *conn).await
    }

    /// Every chat with the content of its latest message, oldest chat first.
    pub async fn get_chat_summaries(&self) -> Result<Vec<ChatSummary>, DataError> {
        let mut conn = self.pool.acquire().await?;
        list_chat_summaries(&mut *conn).await
    }

    pub async fn get_chat_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, DataError> {
        let mut conn = self.pool.acquire().await?;
        list_messages(&mut *conn, chat_id).await
    }

    pub async fn create_chat(
        &self,
        external_id: Option<&str>,
        category: &str,
    ) -> Result<Chat, DataError> {
        let mut tx = self.pool.begin().await?;
        let chat = insert_chat(&mut *tx, external_id, category).await?;
        tx.commit().await?;

        tracing::debug!(
            chat_id = %chat.id,
            external_id = ?chat.external_id,
            category = %chat.category,
            "New chat created"
        );
        Ok(chat)
    }

    /// Return the chat keyed by `external_id`, creating it on first use.
    /// Concurrent callers converge on a single row.
    pub async fn get_or_create_chat(&self, external_id: &str, category: &str) -> Result<Chat, DataError> {
        let mut tx = self.pool.begin().await?;

        if let Some(chat) = find_chat_by_external_id(&mut *tx, external_id).await? {
            return Ok(chat);
        }

        let chat = match insert_chat_if_absent(&mut *tx, external_id, category).await? {
            Some(chat) => {
                tracing::debug!(
                    chat_id = %chat.id,
                    external_id = %external_id,
                    category = %category,
                    "New chat created"
                );
                chat
            }
            None => find_chat_by_external_id(&mut *tx, external_id)
                .await?
                .ok_or_else(|| {
                    DataError::Corrupt(format!("chat for external_id {external_id:?} vanished"))
                })?,
        };

        tx.commit().await?;
        Ok(chat)
    }

    /// Delete a chat and, by cascade, its messages. `false` when it did not exist.
    pub async fn delete_chat(&self, id: Uuid) -> Result<bool, DataError> {
        let mut tx = self.pool.begin().await?;
        let found = delete_chat_row(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(found)
    }

    // --- messages ---

    pub async fn save_message(&self, chat_id: Uuid, message: NewMessage) -> Result<Message, DataError> {
        let mut tx = self.pool.begin().await?;
        let saved = insert_message(&mut *tx, chat_id, &message).await?;
        tx.commit().await?;
        Ok(saved)
    }

    /// Store a user turn and the reply to it atomically.
    pub async fn record_exchange(
        &self,
        chat_id: Uuid,
        user: NewMessage,
        reply: NewMessage,
    ) -> Result<(Message, Message), DataError> {
        let mut tx = self.pool.begin().await?;
        let user = insert_message(&mut *tx, chat_id, &user).await?;
        let reply = insert_message(&mut *tx, chat_id, &reply).await?;
        tx.commit().await?;
        Ok((user, reply))
    }

    // --- articles ---

    pub async fn create_article(&self, name: &str, content: &str) -> Result<ArticleId, DataError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_article(&mut *tx, name, content).await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn get_article_by_id(&self, id: Uuid) -> Result<Option<Article>, DataError> {
        let mut conn = self.pool.acquire().await?;
        find_article(&mut *conn, id).await
    }

    pub async fn get_all_articles_list(&self) -> Result<Vec<ArticleSummary>, DataError> {
        let mut conn = self.pool.acquire().await?;
        list_article_summaries(&mut *conn).await
    }

    /// Overwrite name and content. `None` when the article does not exist.
    pub async fn update_article(
        &self,
        id: Uuid,
        name: &str,
        content: &str,
    ) -> Result<Option<ArticleSummary>, DataError> {
        let mut tx = self.pool.begin().await?;
        let summary = update_article_row(&mut *tx, id, name, content).await?;
        tx.commit().await?;
        Ok(summary)
    }

    pub async fn delete_article(&self, id: Uuid) -> Result<bool, DataError> {
        let mut tx = self.pool.begin().await?;
        let found = delete_article_row(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(found)
    }
}
