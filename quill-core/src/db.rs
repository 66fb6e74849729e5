use crate::config::DatabaseConfig;
use crate::error::QuillError;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Idempotent DDL for the chats, messages and articles tables.
pub const SCHEMA: &str = include_str!("schema.sql");

/// Serializes concurrent schema bootstraps (several servers or test binaries
/// starting against the same database).
const SCHEMA_LOCK_KEY: i64 = 0x5155_494c_4c;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Connect and make sure the schema exists.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, QuillError> {
    let pool = create_pool(config).await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Create any missing tables and indexes.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    sqlx::raw_sql(SCHEMA).execute(&mut *tx).await?;

    tx.commit().await?;
    tracing::info!("Database schema ready");
    Ok(())
}
