//! X API read side: account lookup and mentions timeline

use herald_domain::{Mention, MentionQuery, PlatformError, newer_id};
use serde::Deserialize;
use std::cmp::Ordering;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{XPlatform, check_status, network_error};

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Deserialize)]
struct MentionsResponse {
    data: Option<Vec<Tweet>>,
}

#[derive(Deserialize)]
struct Tweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
}

impl XPlatform {
    /// Account ID of the token owner, looked up once
    async fn user_id(&self) -> Result<&str, PlatformError> {
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let url = format!("{}/2/users/me", self.base_url);
                let response = self
                    .authorized(self.client.get(&url))
                    .send()
                    .await
                    .map_err(network_error)?;

                let user: UserResponse = check_status(response)
                    .await?
                    .json()
                    .await
                    .map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;

                tracing::info!(user_id = %user.data.id, "Resolved X account");
                Ok::<_, PlatformError>(user.data.id)
            })
            .await?;
        Ok(id.as_str())
    }

    pub(super) async fn fetch_mentions(
        &self,
        query: &MentionQuery,
    ) -> Result<Vec<Mention>, PlatformError> {
        let user_id = self.user_id().await?;
        let url = format!("{}/2/users/{}/mentions", self.base_url, user_id);

        let mut params = vec![
            ("max_results", "100".to_string()),
            ("tweet.fields", "created_at,author_id".to_string()),
        ];
        match query {
            MentionQuery::SinceId(since_id) => params.push(("since_id", since_id.clone())),
            MentionQuery::StartTime(start) => params.push(("start_time", format_start_time(*start)?)),
        }

        let response = self
            .authorized(self.client.get(&url))
            .query(&params)
            .send()
            .await
            .map_err(network_error)?;

        let body: MentionsResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;

        let mut mentions: Vec<Mention> = body
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|tweet| Mention {
                created_at: tweet
                    .created_at
                    .as_deref()
                    .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()),
                id: tweet.id,
                text: tweet.text,
                author_id: tweet.author_id,
            })
            .collect();

        // The API returns newest first
        mentions.sort_by(|a, b| compare_ids(&a.id, &b.id));

        tracing::debug!(user_id = %user_id, count = mentions.len(), "Fetched mentions from X");
        Ok(mentions)
    }
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if newer_id(a, b) == b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Whole-second RFC 3339, as the API rejects fractional seconds
fn format_start_time(start: OffsetDateTime) -> Result<String, PlatformError> {
    let start = start.to_offset(time::UtcOffset::UTC)
        - time::Duration::nanoseconds(i64::from(start.nanosecond()));
    start
        .format(&Rfc3339)
        .map_err(|e| PlatformError::InvalidResponse(format!("Invalid start time: {}", e)))
}
