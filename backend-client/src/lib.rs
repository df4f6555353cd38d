//! REST client for the notification service.
//!
//! [`NotificationApi`] is the seam the store depends on; [`HttpNotificationApi`]
//! is the reqwest-backed implementation that talks to the Spring backend.

mod http;

pub use http::ClientConfig;
pub use http::HttpNotificationApi;

use async_trait::async_trait;
use beacon_protocol::NotificationRecord;
use beacon_protocol::Page;
use thiserror::Error;

/// Errors from notification API calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server rejected the bearer token.
    #[error("Not authenticated with the notification service")]
    NotAuthenticated,

    /// Network request failed.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error ({status}): {message}")]
    ApiResponse {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body, or the status reason.
        message: String,
    },

    /// Failed to parse a response body.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for API client operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Server operations the notification store relies on.
///
/// Every method is a single request; none of them retries.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// One page of the user's notifications, newest first.
    async fn fetch_page(
        &self,
        user_id: &str,
        page: u32,
        size: u32,
    ) -> ApiResult<Page<NotificationRecord>>;

    /// All of the user's unread notifications.
    async fn fetch_unread(&self, user_id: &str) -> ApiResult<Vec<NotificationRecord>>;

    async fn unread_count(&self, user_id: &str) -> ApiResult<u64>;

    async fn mark_as_read(&self, id: &str) -> ApiResult<()>;

    async fn mark_batch_read(&self, ids: &[String]) -> ApiResult<()>;

    async fn delete(&self, id: &str) -> ApiResult<()>;

    async fn delete_batch(&self, ids: &[String]) -> ApiResult<()>;
}
