use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuillError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

/// Errors raised by the data service and its statement functions.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl DataError {
    /// Turn a unique-constraint violation into `Conflict`, pass anything else through.
    pub(crate) fn from_insert(err: sqlx::Error, conflict: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => DataError::Conflict(conflict()),
            _ => DataError::Database(err),
        }
    }
}
