// Ratio resolution — correlate candidate replies with their parents.
//
// Given one page of candidate replies plus its include set, resolve
// each reply's parent (from the includes, or with a single direct
// fetch), compute the like ratio, and classify severity. Every item
// resolves to either a record or a named skip reason; one bad item
// never fails the batch, but an API failure after the client's own
// retries does propagate.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::store::models::{is_included, PostSnapshot, RatioRecord, ReplySnapshot};
use crate::xapi::traits::PostSource;
use crate::xapi::types::{ApiPost, ApiUser, PostPage};

/// Why a candidate reply did not produce a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not actually a reply (no `replied_to` reference).
    NoParentRef,
    /// Parent post could not be resolved (deleted, protected, fetch failed).
    ParentUnavailable,
    /// Parent or reply author missing from the include sets.
    MissingAuthor,
    /// Parent has zero likes — the ratio is undefined, not infinite.
    ZeroLikeParent,
    /// Reply is below the caller's absolute like floor.
    BelowLikeFloor,
    /// Pair resolved fine but the ratio does not clear the threshold.
    BelowThreshold,
}

/// Per-item outcome, so callers (and tests) can distinguish skip
/// reasons from successes.
#[derive(Debug)]
pub enum Resolution {
    Record(RatioRecord),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Absolute like floor on the reply side. The enrichment patterns
    /// set this to keep low-signal pairs out; broad search leaves it at
    /// zero since the search query already enforces a floor.
    pub reply_like_floor: u64,
}

/// Resolve a batch of candidate replies against a page's include set.
///
/// `candidates` is usually `page.posts`, but the timeline pattern
/// passes a filtered subset (only the items that are replies).
pub async fn resolve_replies(
    source: &dyn PostSource,
    candidates: &[ApiPost],
    page: &PostPage,
    opts: &ResolveOptions,
    now: DateTime<Utc>,
) -> Vec<Resolution> {
    let mut resolutions = Vec::with_capacity(candidates.len());

    for reply in candidates {
        resolutions.push(resolve_one(source, reply, page, opts, now).await);
    }

    resolutions
}

async fn resolve_one(
    source: &dyn PostSource,
    reply: &ApiPost,
    page: &PostPage,
    opts: &ResolveOptions,
    now: DateTime<Utc>,
) -> Resolution {
    if reply.public_metrics.like_count < opts.reply_like_floor {
        return Resolution::Skipped(SkipReason::BelowLikeFloor);
    }

    let Some(parent_id) = reply.replied_to() else {
        return Resolution::Skipped(SkipReason::NoParentRef);
    };

    // Prefer the copy already shipped in this page's include set;
    // fall back to one direct fetch with its own include set.
    let (parent, parent_author, parent_media) = match page.parent_by_id(parent_id) {
        Some(parent) => {
            let author = parent
                .author_id
                .as_deref()
                .and_then(|id| page.user_by_id(id));
            let Some(author) = author else {
                return Resolution::Skipped(SkipReason::MissingAuthor);
            };
            (parent.clone(), author.clone(), page.media_urls(parent))
        }
        None => match source.post_by_id(parent_id).await {
            Ok(Some(lookup)) => {
                let author = lookup
                    .post
                    .author_id
                    .as_deref()
                    .and_then(|id| lookup.user_by_id(id))
                    .cloned();
                let Some(author) = author else {
                    return Resolution::Skipped(SkipReason::MissingAuthor);
                };
                let media = lookup.media_urls();
                (lookup.post, author, media)
            }
            Ok(None) => return Resolution::Skipped(SkipReason::ParentUnavailable),
            Err(err) => {
                warn!(parent_id = parent_id, error = %err, "Parent fetch failed, skipping pair");
                return Resolution::Skipped(SkipReason::ParentUnavailable);
            }
        },
    };

    let reply_author = reply
        .author_id
        .as_deref()
        .and_then(|id| page.user_by_id(id));
    let Some(reply_author) = reply_author else {
        return Resolution::Skipped(SkipReason::MissingAuthor);
    };

    let parent_likes = parent.public_metrics.like_count;
    if parent_likes == 0 {
        return Resolution::Skipped(SkipReason::ZeroLikeParent);
    }

    let ratio = reply.public_metrics.like_count as f64 / parent_likes as f64;
    if !is_included(ratio) {
        return Resolution::Skipped(SkipReason::BelowThreshold);
    }

    debug!(
        parent_id = parent.id,
        reply_id = reply.id,
        ratio = ratio,
        "Resolved ratio"
    );

    Resolution::Record(RatioRecord::new(
        parent_snapshot(&parent, &parent_author, parent_media, now),
        reply_snapshot(reply, reply_author, page.media_urls(reply)),
        ratio,
        now,
    ))
}

fn parent_snapshot(
    post: &ApiPost,
    author: &ApiUser,
    media: Vec<String>,
    now: DateTime<Utc>,
) -> PostSnapshot {
    let created_at = post
        .created_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        // Missing/garbled timestamp: fall back to discovery time so
        // recency sorting stays total.
        .unwrap_or(now);

    PostSnapshot {
        id: post.id.clone(),
        author: author.username.clone(),
        author_name: author.name.clone(),
        avatar: author.profile_image_url.clone(),
        text: post.text.clone(),
        likes: post.public_metrics.like_count,
        replies: post.public_metrics.reply_count,
        reposts: post.public_metrics.retweet_count,
        created_at,
        media,
    }
}

fn reply_snapshot(post: &ApiPost, author: &ApiUser, media: Vec<String>) -> ReplySnapshot {
    ReplySnapshot {
        id: post.id.clone(),
        author: author.username.clone(),
        author_name: author.name.clone(),
        avatar: author.profile_image_url.clone(),
        text: post.text.clone(),
        likes: post.public_metrics.like_count,
        replies: post.public_metrics.reply_count,
        reposts: post.public_metrics.retweet_count,
        media,
    }
}
