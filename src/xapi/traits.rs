// The seam between the engine and the network.
//
// The engine only ever talks to the API through this trait, so tests
// can drive a whole poll cycle against a scripted in-memory source.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{ApiUser, PostLookup, PostPage, ReplySearch};

/// The four read primitives the ratio engine needs from the platform.
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Fetch one post with its own author/media include set.
    /// `None` when the post does not exist (deleted, protected, ...).
    async fn post_by_id(&self, id: &str) -> Result<Option<PostLookup>>;

    /// Look up a user by username. `None` when no such user exists.
    async fn user_by_username(&self, username: &str) -> Result<Option<ApiUser>>;

    /// One page of a user's recent posts (7-day lookback), with reply
    /// parents expanded into the include set.
    async fn user_recent_posts(
        &self,
        user_id: &str,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<PostPage>;

    /// One page of recent high-engagement replies matching the search.
    async fn search_replies(
        &self,
        search: &ReplySearch,
        page_size: u32,
        next_token: Option<&str>,
    ) -> Result<PostPage>;
}
