/// Failure handling for calls into shared stores
///
/// - **Retry**: exponential backoff with jitter for transient failures, with an
///   optional predicate to stop early on permanent errors
/// - **Timeout**: bounds a single attempt so a stuck write surfaces as a
///   failure instead of holding a worker
///
/// # Example: bounded, retried write
///
/// ```rust,no_run
/// use resilience::{with_retry, with_timeout_result, RetryConfig};
/// use std::time::Duration;
///
/// # async fn write() -> Result<(), String> { Ok(()) }
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::default();
///     let result = with_retry(&config, || {
///         with_timeout_result(Duration::from_millis(500), write())
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutError};
