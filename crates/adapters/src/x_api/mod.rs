//! X (Twitter) API v2 platform adapter

mod read;
mod stub;
mod write;

pub use stub::StubPlatform;

use async_trait::async_trait;
use herald_domain::{Mention, MentionQuery, Platform, PlatformError, Receipt};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::OnceCell;

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";

/// X API v2 client acting as the authenticated user
pub struct XPlatform {
    client: Client,
    user_token: SecretString,
    base_url: String,
    user_id: OnceCell<String>,
}

impl XPlatform {
    pub fn new(user_token: SecretString) -> Result<Self, PlatformError> {
        Self::with_base_url(user_token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(user_token: SecretString, base_url: String) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: OnceCell::new(),
        })
    }

    /// Use a known account ID instead of looking it up via `/2/users/me`
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = OnceCell::new_with(Some(user_id.into()));
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            "Authorization",
            format!("Bearer {}", self.user_token.expose_secret()),
        )
    }
}

#[async_trait]
impl Platform for XPlatform {
    async fn create_post(&self, text: &str) -> Result<Receipt, PlatformError> {
        self.create_tweet(text, None).await
    }

    async fn create_reply(
        &self,
        text: &str,
        in_reply_to_id: &str,
    ) -> Result<Receipt, PlatformError> {
        self.create_tweet(text, Some(in_reply_to_id)).await
    }

    async fn get_mentions(&self, query: &MentionQuery) -> Result<Vec<Mention>, PlatformError> {
        self.fetch_mentions(query).await
    }

    fn platform(&self) -> &'static str {
        "x"
    }
}

/// Map a non-success response to the platform error taxonomy
async fn check_status(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_reset(response.headers(), OffsetDateTime::now_utc());
        return Err(PlatformError::RateLimited { retry_after });
    }

    let code = status.as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Auth {
            status: code,
            message,
        },
        s if s.is_server_error() => PlatformError::Server {
            status: code,
            message,
        },
        _ => PlatformError::Rejected {
            status: code,
            message,
        },
    })
}

fn network_error(error: reqwest::Error) -> PlatformError {
    PlatformError::Network(error.to_string())
}

/// Wait implied by `x-rate-limit-reset`, falling back to `retry-after`
///
/// The reset header is an epoch timestamp; values at or before `now` are read
/// as a relative number of seconds.
fn parse_reset(headers: &HeaderMap, now: OffsetDateTime) -> Option<Duration> {
    let header_secs = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    };

    if let Some(reset) = header_secs("x-rate-limit-reset") {
        let now = u64::try_from(now.unix_timestamp()).unwrap_or_default();
        let wait = if reset > now { reset - now } else { reset };
        return Some(Duration::from_secs(wait));
    }

    header_secs("retry-after").map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use time::macros::datetime;

    #[test]
    fn test_parse_reset_epoch_timestamp() {
        let now = datetime!(2024-01-15 12:00 UTC);
        let mut headers = HeaderMap::new();
        let reset = (now.unix_timestamp() + 120).to_string();
        headers.insert("x-rate-limit-reset", HeaderValue::from_str(&reset).unwrap());

        assert_eq!(parse_reset(&headers, now), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_reset_relative_and_fallback() {
        let now = datetime!(2024-01-15 12:00 UTC);

        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("900"));
        assert_eq!(parse_reset(&headers, now), Some(Duration::from_secs(900)));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        assert_eq!(parse_reset(&headers, now), Some(Duration::from_secs(30)));

        assert_eq!(parse_reset(&HeaderMap::new(), now), None);
    }
}
