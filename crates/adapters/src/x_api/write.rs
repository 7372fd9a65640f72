//! X API write side: posts and replies

use herald_domain::{PlatformError, Receipt};
use serde::{Deserialize, Serialize};

use super::{XPlatform, check_status, network_error};

#[derive(Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ReplySettings<'a>>,
}

#[derive(Serialize)]
struct ReplySettings<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Deserialize)]
struct CreateTweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
    text: Option<String>,
}

impl XPlatform {
    pub(super) async fn create_tweet(
        &self,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> Result<Receipt, PlatformError> {
        let request = CreateTweetRequest {
            text,
            reply: in_reply_to.map(|id| ReplySettings {
                in_reply_to_tweet_id: id,
            }),
        };

        let url = format!("{}/2/tweets", self.base_url);
        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;

        let response = check_status(response).await?;
        let created: CreateTweetResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;

        tracing::debug!(post_id = %created.data.id, in_reply_to = ?in_reply_to, "Created post on X");

        Ok(Receipt {
            url: Some(format!("https://x.com/i/status/{}", created.data.id)),
            text: created.data.text.unwrap_or_else(|| text.to_string()),
            id: created.data.id,
            in_reply_to: in_reply_to.map(String::from),
        })
    }
}
