// Resolver behavior: parent correlation, per-item skip reasons, ratio
// computation, and severity classification — all against a scripted
// in-memory source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use ratioscope::engine::resolver::{
    resolve_replies, ResolveOptions, Resolution, SkipReason,
};
use ratioscope::xapi::traits::PostSource;
use ratioscope::xapi::types::{
    ApiPost, ApiUser, PostLookup, PostPage, PostRef, PublicMetrics, ReplySearch,
};

fn post(id: &str, author_id: &str, likes: u64, replied_to: Option<&str>) -> ApiPost {
    ApiPost {
        id: id.to_string(),
        text: format!("post {id}"),
        author_id: Some(author_id.to_string()),
        created_at: Some("2026-08-25T10:00:00Z".to_string()),
        public_metrics: PublicMetrics {
            like_count: likes,
            reply_count: 3,
            retweet_count: 1,
        },
        referenced_tweets: replied_to.map(|parent| {
            vec![PostRef {
                ref_type: "replied_to".to_string(),
                id: parent.to_string(),
            }]
        }),
        attachments: None,
    }
}

fn user(id: &str, username: &str) -> ApiUser {
    ApiUser {
        id: id.to_string(),
        name: format!("{username} display"),
        username: username.to_string(),
        profile_image_url: Some(format!("https://img.example/{username}.jpg")),
    }
}

/// Source stub serving direct post lookups from a map, counting calls.
#[derive(Default)]
struct StubSource {
    posts: HashMap<String, (ApiPost, Vec<ApiUser>)>,
    fail_lookups: bool,
    lookup_calls: AtomicUsize,
}

#[async_trait]
impl PostSource for StubSource {
    async fn post_by_id(&self, id: &str) -> Result<Option<PostLookup>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups {
            anyhow::bail!("backend unavailable");
        }
        Ok(self.posts.get(id).map(|(post, users)| PostLookup {
            post: post.clone(),
            users: users.clone(),
            media: HashMap::new(),
        }))
    }

    async fn user_by_username(&self, _username: &str) -> Result<Option<ApiUser>> {
        Ok(None)
    }

    async fn user_recent_posts(
        &self,
        _user_id: &str,
        _page_size: u32,
        _next_token: Option<&str>,
    ) -> Result<PostPage> {
        Ok(PostPage::default())
    }

    async fn search_replies(
        &self,
        _search: &ReplySearch,
        _page_size: u32,
        _next_token: Option<&str>,
    ) -> Result<PostPage> {
        Ok(PostPage::default())
    }
}

fn skip_reason(resolution: &Resolution) -> Option<SkipReason> {
    match resolution {
        Resolution::Skipped(reason) => Some(*reason),
        Resolution::Record(_) => None,
    }
}

#[tokio::test]
async fn resolves_ratio_from_the_include_set() {
    let source = StubSource::default();
    let reply = post("r1", "u2", 5000, Some("p1"));
    let page = PostPage {
        posts: vec![reply.clone()],
        users: vec![user("u1", "victim"), user("u2", "perp")],
        parents: vec![post("p1", "u1", 100, None)],
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions = resolve_replies(
        &source,
        &page.posts,
        &page,
        &ResolveOptions::default(),
        Utc::now(),
    )
    .await;

    assert_eq!(resolutions.len(), 1);
    let Resolution::Record(record) = &resolutions[0] else {
        panic!("expected a record, got {:?}", resolutions[0]);
    };

    assert_eq!(record.id, "p1");
    assert_eq!(record.parent.author, "victim");
    assert_eq!(record.reply.author, "perp");
    assert!((record.ratio - 50.0).abs() < 1e-9);
    assert!(record.is_ratio && record.is_brutal && !record.is_lethal);
    // Parent was in the includes — no direct fetch needed.
    assert_eq!(source.lookup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn falls_back_to_direct_parent_fetch() {
    let mut source = StubSource::default();
    source.posts.insert(
        "p1".to_string(),
        (post("p1", "u1", 10, None), vec![user("u1", "victim")]),
    );

    let page = PostPage {
        posts: vec![post("r1", "u2", 1500, Some("p1"))],
        users: vec![user("u2", "perp")],
        parents: Vec::new(),
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions = resolve_replies(
        &source,
        &page.posts,
        &page,
        &ResolveOptions::default(),
        Utc::now(),
    )
    .await;

    let Resolution::Record(record) = &resolutions[0] else {
        panic!("expected a record");
    };
    assert_eq!(record.parent.author, "victim");
    assert!((record.ratio - 150.0).abs() < 1e-9);
    // 150x clears every tier.
    assert!(record.is_ratio && record.is_brutal && record.is_lethal);
    assert_eq!(source.lookup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn skips_posts_that_are_not_replies() {
    let source = StubSource::default();
    let page = PostPage {
        posts: vec![post("r1", "u2", 5000, None)],
        users: vec![user("u2", "perp")],
        ..Default::default()
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;
    assert_eq!(skip_reason(&resolutions[0]), Some(SkipReason::NoParentRef));
    assert_eq!(source.lookup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn skips_when_parent_is_gone() {
    let source = StubSource::default(); // empty: lookup returns None
    let page = PostPage {
        posts: vec![post("r1", "u2", 5000, Some("deleted"))],
        users: vec![user("u2", "perp")],
        ..Default::default()
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;
    assert_eq!(
        skip_reason(&resolutions[0]),
        Some(SkipReason::ParentUnavailable)
    );
}

#[tokio::test]
async fn parent_fetch_failure_skips_the_pair_not_the_batch() {
    let source = StubSource {
        fail_lookups: true,
        ..Default::default()
    };
    let page = PostPage {
        posts: vec![
            post("r1", "u2", 5000, Some("unreachable")),
            post("r2", "u2", 4000, Some("p2")),
        ],
        users: vec![user("u2", "perp"), user("u1", "victim")],
        parents: vec![post("p2", "u1", 100, None)],
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;

    assert_eq!(
        skip_reason(&resolutions[0]),
        Some(SkipReason::ParentUnavailable)
    );
    // The second pair still resolved from the includes.
    assert!(matches!(resolutions[1], Resolution::Record(_)));
}

#[tokio::test]
async fn skips_when_an_author_is_missing_from_includes() {
    let source = StubSource::default();
    let page = PostPage {
        posts: vec![post("r1", "u2", 5000, Some("p1"))],
        // Reply author present, parent author absent.
        users: vec![user("u2", "perp")],
        parents: vec![post("p1", "u1", 100, None)],
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;
    assert_eq!(skip_reason(&resolutions[0]), Some(SkipReason::MissingAuthor));
}

#[tokio::test]
async fn zero_like_parents_are_never_divided() {
    let source = StubSource::default();
    let page = PostPage {
        posts: vec![post("r1", "u2", 5000, Some("p1"))],
        users: vec![user("u1", "victim"), user("u2", "perp")],
        parents: vec![post("p1", "u1", 0, None)],
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;
    assert_eq!(
        skip_reason(&resolutions[0]),
        Some(SkipReason::ZeroLikeParent)
    );
}

#[tokio::test]
async fn exactly_equal_likes_is_not_a_ratio() {
    let source = StubSource::default();
    let page = PostPage {
        posts: vec![post("r1", "u2", 100, Some("p1"))],
        users: vec![user("u1", "victim"), user("u2", "perp")],
        parents: vec![post("p1", "u1", 100, None)],
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;
    // ratio == 1.0 does not clear the exclusive threshold
    assert_eq!(
        skip_reason(&resolutions[0]),
        Some(SkipReason::BelowThreshold)
    );
}

#[tokio::test]
async fn like_floor_gates_enrichment_candidates() {
    let source = StubSource::default();
    let page = PostPage {
        posts: vec![post("r1", "u2", 30, Some("p1"))],
        users: vec![user("u1", "victim"), user("u2", "perp")],
        parents: vec![post("p1", "u1", 2, None)],
        media: HashMap::new(),
        next_token: None,
    };

    let opts = ResolveOptions {
        reply_like_floor: 50,
    };
    let resolutions = resolve_replies(&source, &page.posts, &page, &opts, Utc::now()).await;
    // 15x ratio, but only 30 absolute likes — below the floor.
    assert_eq!(
        skip_reason(&resolutions[0]),
        Some(SkipReason::BelowLikeFloor)
    );
}

#[tokio::test]
async fn media_keys_resolve_to_urls() {
    let source = StubSource::default();
    let mut parent = post("p1", "u1", 100, None);
    parent.attachments = Some(ratioscope::xapi::types::Attachments {
        media_keys: vec!["m1".to_string(), "missing".to_string()],
    });

    let mut media = HashMap::new();
    media.insert("m1".to_string(), "https://img.example/m1.jpg".to_string());

    let page = PostPage {
        posts: vec![post("r1", "u2", 5000, Some("p1"))],
        users: vec![user("u1", "victim"), user("u2", "perp")],
        parents: vec![parent],
        media,
        next_token: None,
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), Utc::now()).await;
    let Resolution::Record(record) = &resolutions[0] else {
        panic!("expected a record");
    };
    // Known keys map to URLs; unknown keys are dropped.
    assert_eq!(record.parent.media, vec!["https://img.example/m1.jpg"]);
    assert!(record.reply.media.is_empty());
}

#[tokio::test]
async fn parent_timestamps_parse_with_discovery_fallback() {
    let source = StubSource::default();
    let discovered = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();

    let mut unparseable = post("p2", "u1", 100, None);
    unparseable.created_at = None;

    let page = PostPage {
        posts: vec![
            post("r1", "u2", 5000, Some("p1")),
            post("r2", "u2", 5000, Some("p2")),
        ],
        users: vec![user("u1", "victim"), user("u2", "perp")],
        parents: vec![post("p1", "u1", 100, None), unparseable],
        media: HashMap::new(),
        next_token: None,
    };

    let resolutions =
        resolve_replies(&source, &page.posts, &page, &ResolveOptions::default(), discovered).await;

    let Resolution::Record(parsed) = &resolutions[0] else {
        panic!("expected a record");
    };
    assert_eq!(
        parsed.parent.created_at,
        Utc.with_ymd_and_hms(2026, 8, 25, 10, 0, 0).unwrap()
    );

    let Resolution::Record(fallback) = &resolutions[1] else {
        panic!("expected a record");
    };
    assert_eq!(fallback.parent.created_at, discovered);
}
