//! Error types for account-service

use cache_invalidation::InvalidationError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AccountError>;

#[derive(Error, Debug)]
pub enum AccountError {
    /// The directory has no such user (or profile); surfaced, never retried
    #[error("User not found: {0}")]
    NotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalidation error: {0}")]
    Invalidation(#[from] InvalidationError),
}

impl AccountError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AccountError::NotFound(_))
    }
}

impl From<sqlx::Error> for AccountError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                AccountError::Conflict(db.message().to_string())
            }
            _ => AccountError::Directory(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AccountError {
    fn from(err: redis::RedisError) -> Self {
        AccountError::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_classified() {
        let id = Uuid::new_v4();
        let err = AccountError::NotFound(id);
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), format!("User not found: {}", id));
        assert!(!AccountError::Cache("down".into()).is_not_found());
    }

    #[test]
    fn test_row_not_found_maps_to_directory_error() {
        let err: AccountError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AccountError::Directory(_)));
    }
}
