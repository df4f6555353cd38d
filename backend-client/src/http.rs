use std::time::Duration;

use async_trait::async_trait;
use beacon_protocol::NotificationRecord;
use beacon_protocol::Page;
use beacon_protocol::parse_unread_count;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::ApiError;
use crate::ApiResult;
use crate::NotificationApi;

/// Default per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Connection settings for [`HttpNotificationApi`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `http://localhost:8080/api`.
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Unread lists come back either bare or wrapped in a page envelope
/// depending on the backend version.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrPage<T> {
    List(Vec<T>),
    Page(Page<T>),
}

impl<T> ListOrPage<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListOrPage::List(items) => items,
            ListOrPage::Page(page) => page.content,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// reqwest-backed [`NotificationApi`] authenticating with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpNotificationApi {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpNotificationApi {
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> ApiResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidConfig(format!("base url {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidConfig(format!(
                "base url {} cannot carry a path",
                config.base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("beacon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: token.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `base_url` plus percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidConfig(format!("base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::NotAuthenticated);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body, status);
        tracing::debug!("notification api returned {status}: {message}");
        Err(ApiError::ApiResponse {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body)
        && let Some(message) = parsed.message.or(parsed.error)
    {
        return message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn fetch_page(
        &self,
        user_id: &str,
        page: u32,
        size: u32,
    ) -> ApiResult<Page<NotificationRecord>> {
        let url = self.endpoint(&["notifications"])?;
        let request = self.client.get(url).query(&[
            ("page", page.to_string()),
            ("size", size.to_string()),
            ("userId", user_id.to_string()),
        ]);
        self.send_json(request).await
    }

    async fn fetch_unread(&self, user_id: &str) -> ApiResult<Vec<NotificationRecord>> {
        let url = self.endpoint(&["notifications", "unread"])?;
        let request = self.client.get(url).query(&[("userId", user_id)]);
        let body: ListOrPage<NotificationRecord> = self.send_json(request).await?;
        Ok(body.into_vec())
    }

    async fn unread_count(&self, user_id: &str) -> ApiResult<u64> {
        let url = self.endpoint(&["notifications", "unread", "count"])?;
        let request = self.client.get(url).query(&[("userId", user_id)]);
        let body: serde_json::Value = self.send_json(request).await?;
        parse_unread_count(&body)
            .ok_or_else(|| ApiError::Parse(format!("unexpected unread count body: {body}")))
    }

    async fn mark_as_read(&self, id: &str) -> ApiResult<()> {
        let url = self.endpoint(&["notifications", id, "read"])?;
        self.send(self.client.put(url)).await?;
        Ok(())
    }

    async fn mark_batch_read(&self, ids: &[String]) -> ApiResult<()> {
        let url = self.endpoint(&["notifications", "read"])?;
        self.send(self.client.put(url).json(ids)).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> ApiResult<()> {
        let url = self.endpoint(&["notifications", id])?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> ApiResult<()> {
        let url = self.endpoint(&["notifications", "batch"])?;
        self.send(self.client.delete(url).json(ids)).await?;
        Ok(())
    }
}
