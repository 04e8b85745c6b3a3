// X v2 API client — bearer-authenticated JSON over HTTP.
//
// A thin reqwest wrapper with a generic GET helper; every public call
// goes through the shared rate limiter and the retry wrapper, so
// transient failures (429/5xx/network) are absorbed here and callers
// only see errors once the retry budget is spent.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::limits::{is_not_found_error, with_retry, RateLimiter, StatusError};
use super::traits::PostSource;
use super::types::{
    media_map, ApiUser, ListEnvelope, LookupEnvelope, PostLookup, PostPage, ReplySearch,
    UserEnvelope,
};

/// Default base URL for the X v2 API.
pub const DEFAULT_API_BASE_URL: &str = "https://api.x.com";

/// App-auth budget: 450 requests per 15-minute window.
const WINDOW_REQUESTS: u32 = 450;
const WINDOW: Duration = Duration::from_secs(15 * 60);
const MIN_REQUEST_GAP: Duration = Duration::from_millis(100);

/// The API refuses timeline/search queries older than 7 days.
const LOOKBACK_DAYS: i64 = 7;

const TWEET_FIELDS: &str =
    "author_id,created_at,public_metrics,conversation_id,in_reply_to_user_id,attachments";
const USER_FIELDS: &str = "name,username,profile_image_url";
const MEDIA_FIELDS: &str = "url,preview_image_url";

pub struct XApiClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
    limiter: RateLimiter,
}

impl XApiClient {
    pub fn new(base_url: &str, bearer_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("ratioscope/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
            limiter: RateLimiter::new(WINDOW_REQUESTS, WINDOW, MIN_REQUEST_GAP),
        })
    }

    /// Make one GET request and deserialize the response.
    ///
    /// Non-2xx responses become a typed `StatusError` so the retry layer
    /// can classify them. This is a single attempt — retry policy lives
    /// in the public methods.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        debug!(path = path, "X API GET");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(params)
            .send()
            .await
            .with_context(|| format!("X API request failed: {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(StatusError::new(status, path, body)));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {path} response"))
    }
}

#[async_trait]
impl PostSource for XApiClient {
    async fn post_by_id(&self, id: &str) -> Result<Option<PostLookup>> {
        let path = format!("/2/tweets/{id}");
        let params = [
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            ("expansions", "author_id,attachments.media_keys".to_string()),
        ];

        let result = with_retry(&self.limiter, || {
            self.get_json::<LookupEnvelope>(&path, &params)
        })
        .await;

        match result {
            Ok(envelope) => {
                let includes = envelope.includes.unwrap_or_default();
                // A 200 with no data means the post is gone or hidden —
                // the API reports that through an `errors` array.
                Ok(envelope.data.map(|post| PostLookup {
                    post,
                    users: includes.users,
                    media: media_map(includes.media),
                }))
            }
            Err(err) if is_not_found_error(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<ApiUser>> {
        let path = format!("/2/users/by/username/{username}");
        let params = [("user.fields", USER_FIELDS.to_string())];

        let result = with_retry(&self.limiter, || {
            self.get_json::<UserEnvelope>(&path, &params)
        })
        .await;

        match result {
            Ok(envelope) => Ok(envelope.data),
            Err(err) if is_not_found_error(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn user_recent_posts(
        &self,
        user_id: &str,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<PostPage> {
        let path = format!("/2/users/{user_id}/tweets");
        let start_time = (Utc::now() - ChronoDuration::days(LOOKBACK_DAYS))
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut params = vec![
            ("max_results", page_size.to_string()),
            ("start_time", start_time),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            (
                "expansions",
                "author_id,referenced_tweets.id,referenced_tweets.id.author_id,attachments.media_keys"
                    .to_string(),
            ),
        ];
        if let Some(token) = next_token {
            params.push(("pagination_token", token.to_string()));
        }

        let envelope = with_retry(&self.limiter, || {
            self.get_json::<ListEnvelope>(&path, &params)
        })
        .await
        .with_context(|| format!("Failed to fetch recent posts for user {user_id}"))?;

        Ok(envelope.into())
    }

    async fn search_replies(
        &self,
        search: &ReplySearch,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<PostPage> {
        let path = "/2/tweets/search/recent";

        let mut params = vec![
            ("query", search.to_query()),
            ("max_results", page_size.to_string()),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
            ("media.fields", MEDIA_FIELDS.to_string()),
            (
                "expansions",
                "author_id,in_reply_to_user_id,referenced_tweets.id,referenced_tweets.id.author_id,attachments.media_keys"
                    .to_string(),
            ),
        ];
        if let Some(token) = next_token {
            params.push(("next_token", token.to_string()));
        }

        let envelope = with_retry(&self.limiter, || {
            self.get_json::<ListEnvelope>(path, &params)
        })
        .await
        .context("Reply search failed")?;

        Ok(envelope.into())
    }
}
