/// Error types for feed-service
///
/// Domain errors stay close to the component that raises them; `AppError` is
/// what handlers return and maps onto HTTP status codes.
use account_service::AccountError;
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;
use uuid::Uuid;

/// Result type for feed-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// A single feed store call failed
#[derive(Error, Debug, Clone)]
pub enum FeedStoreError {
    /// Timeout, lock contention, pool exhaustion; worth retrying
    #[error("transient feed write failure: {0}")]
    Transient(String),

    #[error("feed storage error: {0}")]
    Storage(String),
}

impl FeedStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedStoreError::Transient(_))
    }
}

impl From<sqlx::Error> for FeedStoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient_sqlx(&err) {
            FeedStoreError::Transient(err.to_string())
        } else {
            FeedStoreError::Storage(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum FollowGraphError {
    #[error("cannot follow yourself")]
    SelfFollow,

    #[error("follow graph unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for FollowGraphError {
    fn from(err: sqlx::Error) -> Self {
        FollowGraphError::Unavailable(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum FanoutError {
    /// The follower list could not be read; the job is retried in full
    #[error("follower snapshot unavailable: {0}")]
    SnapshotUnavailable(#[from] FollowGraphError),

    #[error("fan-out already running for tweet {0}")]
    AlreadyRunning(Uuid),

    /// The tweet was deleted (or never stored) before its fan-out ran
    #[error("tweet {0} is not persisted")]
    TweetNotPersisted(Uuid),

    #[error("tweet store unavailable: {0}")]
    TweetStore(String),

    #[error("fan-out dispatcher is shut down")]
    QueueClosed,
}

impl FanoutError {
    /// Whether running the same job again can succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FanoutError::SnapshotUnavailable(_) | FanoutError::TweetStore(_)
        )
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound(id) => AppError::NotFound(format!("user {}", id)),
            AccountError::Validation(msg) => AppError::Validation(msg),
            AccountError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<FollowGraphError> for AppError {
    fn from(err: FollowGraphError) -> Self {
        match err {
            FollowGraphError::SelfFollow => AppError::Validation(err.to_string()),
            FollowGraphError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
        }
    }
}

impl From<FeedStoreError> for AppError {
    fn from(err: FeedStoreError) -> Self {
        match err {
            FeedStoreError::Transient(msg) => AppError::ServiceUnavailable(msg),
            FeedStoreError::Storage(msg) => AppError::Database(msg),
        }
    }
}

impl From<FanoutError> for AppError {
    fn from(err: FanoutError) -> Self {
        match err {
            FanoutError::AlreadyRunning(_) => AppError::Conflict(err.to_string()),
            FanoutError::TweetNotPersisted(id) => AppError::NotFound(format!("tweet {}", id)),
            FanoutError::QueueClosed => AppError::ServiceUnavailable(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Serialization failures, deadlocks, lock timeouts, cancelled statements and
/// connection-level trouble are worth another attempt.
fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03") | Some("57014")
        ),
        _ => false,
    }
}
