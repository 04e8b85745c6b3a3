// Data models — the record types that flow through the engine.
//
// These are separate from the store itself so the resolver and the
// read paths can use them without depending on storage details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reply must out-like its parent by more than this factor to count
/// as a ratio at all. Exclusive: exactly 1.0 is not a ratio.
pub const RATIO_THRESHOLD: f64 = 1.0;
/// At 10x the beating is brutal.
pub const BRUTAL_THRESHOLD: f64 = 10.0;
/// At 100x it is lethal.
pub const LETHAL_THRESHOLD: f64 = 100.0;

/// Whether a ratio value clears the inclusion threshold.
pub fn is_included(ratio: f64) -> bool {
    ratio > RATIO_THRESHOLD
}

/// Snapshot of the ratio'd parent post at discovery/update time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub id: String,
    /// Case-preserving username; compared case-insensitively everywhere.
    pub author: String,
    pub author_name: String,
    pub avatar: Option<String>,
    pub text: String,
    pub likes: u64,
    pub replies: u64,
    pub reposts: u64,
    /// When the parent post was originally published.
    pub created_at: DateTime<Utc>,
    pub media: Vec<String>,
}

/// Snapshot of the reply that delivered the ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplySnapshot {
    pub id: String,
    pub author: String,
    pub author_name: String,
    pub avatar: Option<String>,
    pub text: String,
    pub likes: u64,
    pub replies: u64,
    pub reposts: u64,
    pub media: Vec<String>,
}

/// One discovered ratio. Keyed by the parent post's id — a parent has
/// at most one recorded ratio, and re-discovery overwrites the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioRecord {
    pub id: String,
    pub parent: PostSnapshot,
    pub reply: ReplySnapshot,
    /// reply.likes / parent.likes. Never built from a zero-like parent.
    pub ratio: f64,
    pub is_ratio: bool,
    pub is_brutal: bool,
    pub is_lethal: bool,
    /// When this record was first inserted. Preserved across upserts by
    /// the caller (the store writes exactly what it is given).
    pub discovered_at: DateTime<Utc>,
}

impl RatioRecord {
    /// Build a record, deriving the severity flags from the ratio.
    /// The flags always satisfy lethal ⇒ brutal ⇒ ratio.
    pub fn new(
        parent: PostSnapshot,
        reply: ReplySnapshot,
        ratio: f64,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: parent.id.clone(),
            parent,
            reply,
            ratio,
            is_ratio: ratio > RATIO_THRESHOLD,
            is_brutal: ratio >= BRUTAL_THRESHOLD,
            is_lethal: ratio >= LETHAL_THRESHOLD,
            discovered_at,
        }
    }
}

/// Severity filter for queries. When a caller requests several flags at
/// once, precedence is lethal > brutal > ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeverityFilter {
    Ratio,
    Brutal,
    Lethal,
}

impl SeverityFilter {
    /// Collapse independent flag requests into one filter by precedence.
    pub fn from_flags(ratio: bool, brutal: bool, lethal: bool) -> Option<Self> {
        if lethal {
            Some(SeverityFilter::Lethal)
        } else if brutal {
            Some(SeverityFilter::Brutal)
        } else if ratio {
            Some(SeverityFilter::Ratio)
        } else {
            None
        }
    }

    pub fn matches(&self, record: &RatioRecord) -> bool {
        match self {
            SeverityFilter::Ratio => record.is_ratio,
            SeverityFilter::Brutal => record.is_brutal,
            SeverityFilter::Lethal => record.is_lethal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Newest parent post first (original post time, not discovery time).
    #[default]
    Recency,
    /// Highest ratio first.
    Severity,
}

/// Query filters for the read path. `Default` matches everything,
/// sorted by recency, unlimited.
#[derive(Debug, Clone, Default)]
pub struct RatioFilter {
    /// Case-insensitive exact match against either side's author.
    pub username: Option<String>,
    /// Minimum like count on the reply side.
    pub min_likes: u64,
    pub severity: Option<SeverityFilter>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub ratio_count: usize,
    pub brutal_count: usize,
    pub lethal_count: usize,
    pub oldest_discovered: Option<DateTime<Utc>>,
    pub newest_discovered: Option<DateTime<Utc>>,
    pub tracked_users: usize,
}

/// One row of a leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub username: String,
    /// How many stored records this user appears in (on this board's side).
    pub count: usize,
    /// Sum of the opposing side's likes across those records.
    pub total_likes: u64,
    /// The highest ratio involving this user — their worst beating as a
    /// victim, their biggest hit as a perpetrator.
    pub worst_ratio: f64,
    pub example: RatioRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leaderboards {
    pub victims: Vec<LeaderboardEntry>,
    pub perpetrators: Vec<LeaderboardEntry>,
}

/// What `upsert` did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}
