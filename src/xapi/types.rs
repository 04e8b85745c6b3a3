// Wire types for the X v2 API.
//
// Responses arrive as a `data` payload plus an `includes` section that
// carries referenced posts, authors, and media alongside the main
// results. `PostPage` flattens one response page into the shape the
// resolver consumes.

use std::collections::HashMap;

use serde::Deserialize;

/// A post as returned by the API. Only the fields the engine reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiPost {
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub author_id: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub public_metrics: PublicMetrics,
    pub referenced_tweets: Option<Vec<PostRef>>,
    pub attachments: Option<Attachments>,
}

impl ApiPost {
    /// The id of the post this one replies to, if any.
    ///
    /// Quote posts and retweets also appear in `referenced_tweets` but
    /// with a different reference type — only `replied_to` counts.
    pub fn replied_to(&self) -> Option<&str> {
        self.referenced_tweets
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|r| r.ref_type == "replied_to")
            .map(|r| r.id.as_str())
    }

    /// Media keys attached to this post (empty when none).
    pub fn media_keys(&self) -> &[String] {
        self.attachments
            .as_ref()
            .map(|a| a.media_keys.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
}

/// A reference from one post to another (`replied_to`, `quoted`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct PostRef {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

/// A user from the `includes` section or a direct lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiUser {
    pub id: String,
    pub name: String,
    pub username: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiMedia {
    pub media_key: String,
    /// Direct URL for photos.
    pub url: Option<String>,
    /// Thumbnail URL for videos and GIFs.
    pub preview_image_url: Option<String>,
}

impl ApiMedia {
    fn display_url(&self) -> Option<&str> {
        self.url.as_deref().or(self.preview_image_url.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<ApiUser>,
    #[serde(default)]
    pub tweets: Vec<ApiPost>,
    #[serde(default)]
    pub media: Vec<ApiMedia>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageMeta {
    pub next_token: Option<String>,
    pub result_count: Option<u64>,
}

/// Envelope for list endpoints (search, user timeline).
#[derive(Debug, Deserialize)]
pub struct ListEnvelope {
    #[serde(default)]
    pub data: Vec<ApiPost>,
    pub includes: Option<Includes>,
    #[serde(default)]
    pub meta: PageMeta,
}

/// Envelope for single-post lookup.
#[derive(Debug, Deserialize)]
pub struct LookupEnvelope {
    pub data: Option<ApiPost>,
    pub includes: Option<Includes>,
}

/// Envelope for single-user lookup.
#[derive(Debug, Deserialize)]
pub struct UserEnvelope {
    pub data: Option<ApiUser>,
}

/// One page of posts with its include set flattened for lookups.
#[derive(Debug, Default)]
pub struct PostPage {
    pub posts: Vec<ApiPost>,
    pub users: Vec<ApiUser>,
    /// Referenced posts (reply parents) shipped alongside the results.
    pub parents: Vec<ApiPost>,
    /// Media key → display URL.
    pub media: HashMap<String, String>,
    pub next_token: Option<String>,
}

impl PostPage {
    pub fn user_by_id(&self, id: &str) -> Option<&ApiUser> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn parent_by_id(&self, id: &str) -> Option<&ApiPost> {
        // Timeline pages can carry a reply's parent in the main data
        // rather than in includes (self-replies), so check both.
        self.parents
            .iter()
            .find(|p| p.id == id)
            .or_else(|| self.posts.iter().find(|p| p.id == id))
    }

    /// Resolve a post's media keys to display URLs, dropping unknown keys.
    pub fn media_urls(&self, post: &ApiPost) -> Vec<String> {
        post.media_keys()
            .iter()
            .filter_map(|key| self.media.get(key).cloned())
            .collect()
    }
}

impl From<ListEnvelope> for PostPage {
    fn from(envelope: ListEnvelope) -> Self {
        let includes = envelope.includes.unwrap_or_default();
        PostPage {
            posts: envelope.data,
            users: includes.users,
            parents: includes.tweets,
            media: media_map(includes.media),
            next_token: envelope.meta.next_token,
        }
    }
}

pub(crate) fn media_map(media: Vec<ApiMedia>) -> HashMap<String, String> {
    media
        .into_iter()
        .filter_map(|m| {
            let url = m.display_url()?.to_string();
            Some((m.media_key, url))
        })
        .collect()
}

/// Result of a direct single-post fetch: the post plus its own include set.
#[derive(Debug)]
pub struct PostLookup {
    pub post: ApiPost,
    pub users: Vec<ApiUser>,
    pub media: HashMap<String, String>,
}

impl PostLookup {
    pub fn user_by_id(&self, id: &str) -> Option<&ApiUser> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn media_urls(&self) -> Vec<String> {
        self.post
            .media_keys()
            .iter()
            .filter_map(|key| self.media.get(key).cloned())
            .collect()
    }
}

/// Parameters for the recent-reply search.
///
/// The broad discovery pass leaves `to_user` unset; victim enrichment
/// sets it to scope the search to replies aimed at one account.
#[derive(Debug, Clone)]
pub struct ReplySearch {
    pub min_likes: u64,
    pub to_user: Option<String>,
}

impl ReplySearch {
    /// Render the search as an X query string.
    pub fn to_query(&self) -> String {
        let mut query = format!("min_likes:{} is:reply -is:retweet lang:en", self.min_likes);
        if let Some(user) = &self.to_user {
            query.push_str(" to:");
            query.push_str(user);
        }
        query
    }
}
