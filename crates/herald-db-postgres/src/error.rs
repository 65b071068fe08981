//! Error types for the PostgreSQL recipient directory.

use herald_notifications::NotificationError;

/// Errors specific to the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::error::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PostgresError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Every storage failure surfaces to the dispatcher as an unavailable directory.
impl From<PostgresError> for NotificationError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Config { message } => NotificationError::InvalidConfig(message),
            other => NotificationError::DirectoryUnavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PostgresError>;
