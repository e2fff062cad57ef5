//! X/Twitter v2 timeline endpoint.

use serde::Deserialize;
use serde_json::Value;

use crate::error::FeedError;
use crate::rest::{JsonFetcher, JsonRequest};

pub const TWITTER_BASE: &str = "https://api.twitter.com";

/// One post, newest first as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Post {
    pub fn url(&self) -> String {
        format!("https://twitter.com/i/web/status/{}", self.id)
    }

    /// Numeric id for ordering; ids are snowflakes encoded as strings.
    pub fn numeric_id(&self) -> u64 {
        self.id.parse().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct Timeline {
    #[serde(default)]
    data: Vec<Post>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterApi {
    base: String,
}

impl Default for TwitterApi {
    fn default() -> Self {
        Self::new(TWITTER_BASE)
    }
}

impl TwitterApi {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Latest posts of `user_id`, newest first. `since_id` filters server-side.
    pub async fn recent_posts(
        &self,
        fetcher: &dyn JsonFetcher,
        bearer_token: &str,
        user_id: &str,
        max_results: u32,
        since_id: Option<&str>,
    ) -> Result<Vec<Post>, FeedError> {
        // The endpoint rejects max_results outside 5..=100
        let mut request = JsonRequest::get(format!("{}/2/users/{}/tweets", self.base, user_id))
            .query("max_results", max_results.clamp(5, 100))
            .query("tweet.fields", "created_at")
            .bearer(bearer_token);
        if let Some(since_id) = since_id {
            request = request.query("since_id", since_id);
        }

        let value: Value = fetcher.fetch(request).await?;
        let timeline: Timeline = serde_json::from_value(value)
            .map_err(|e| FeedError::ParseError(format!("timeline: {}", e)))?;
        Ok(timeline.data)
    }
}
