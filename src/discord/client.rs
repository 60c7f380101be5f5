use super::ChatService;
use crate::config::Config;
use crate::error::ApiError;
use crate::model::{Channel, Message, SearchPage, Snowflake, User};
use crate::search::SearchQuery;
use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times a rate-limited request is re-issued before giving up.
const MAX_RATE_LIMIT_RETRIES: usize = 5;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
    /// Seconds; sent with 429s and with "index not ready" search responses.
    #[serde(default)]
    retry_after: Option<f64>,
}

/// REST client for a user account.
pub struct HttpClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.discord_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header(header::AUTHORIZATION, &self.token)
    }

    /// Sends a request, sleeping through rate limits and unready search
    /// indexes, and maps failures to [`ApiError`].
    async fn execute(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, ApiError> {
        let mut attempts = 0;
        loop {
            let response = build().send().await?;
            let status = response.status();

            let wait = match status {
                StatusCode::TOO_MANY_REQUESTS | StatusCode::ACCEPTED => {
                    retry_delay(&response.text().await.unwrap_or_default())
                }
                s if s.is_success() => return Ok(response),
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(decode_error(status.as_u16(), body));
                }
            };

            attempts += 1;
            if attempts > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited { retry_after: wait });
            }
            warn!(
                "Request throttled ({}), retrying in {}",
                status,
                humantime::format_duration(wait)
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Maps a failed response to an error, keeping the service's error code when
/// the body carries one.
fn decode_error(status: u16, body: String) -> ApiError {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) if err.code != 0 => ApiError::Discord {
            status,
            code: err.code,
            message: err.message,
        },
        _ => ApiError::Status { status, body },
    }
}

/// How long a throttled request should wait. One second when the body says nothing.
fn retry_delay(body: &str) -> Duration {
    let retry_after = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.retry_after)
        .unwrap_or(1.0);
    Duration::from_secs_f64(retry_after.max(0.0))
}

#[async_trait]
impl ChatService for HttpClient {
    async fn current_user(&self) -> Result<User, ApiError> {
        let response = self
            .execute(|| self.request(Method::GET, "/users/@me"))
            .await?;
        Self::json(response).await
    }

    async fn channel(&self, channel_id: Snowflake) -> Result<Channel, ApiError> {
        let path = format!("/channels/{}", channel_id);
        let response = self.execute(|| self.request(Method::GET, &path)).await?;
        Self::json(response).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, ApiError> {
        let path = query.endpoint().ok_or_else(|| ApiError::Status {
            status: 400,
            body: "search needs a guild or a channel".to_string(),
        })?;
        let params = query.params();
        debug!("Searching {} from id {}", path, query.min_id);
        let response = self
            .execute(|| self.request(Method::GET, &path).query(&params))
            .await?;
        Self::json(response).await
    }

    async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<(), ApiError> {
        let path = format!("/channels/{}/messages/{}", channel_id, message_id);
        self.execute(|| self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: Snowflake,
        content: &str,
    ) -> Result<Message, ApiError> {
        let path = format!("/channels/{}/messages", channel_id);
        let body = serde_json::json!({ "content": content });
        let response = self
            .execute(|| self.request(Method::POST, &path).json(&body))
            .await?;
        Self::json(response).await
    }
}
