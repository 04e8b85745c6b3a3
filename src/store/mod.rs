// In-memory ratio store.
//
// Records are keyed by parent post id and roll off after the retention
// horizon. The store is a plain struct — the engine serializes access
// behind its own mutex, so nothing here locks.

pub mod models;
pub mod tracked;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use models::{
    LeaderboardEntry, Leaderboards, RatioFilter, RatioRecord, SortOrder, StoreStats, UpsertOutcome,
};

/// Run an eviction sweep every this many insertions, rather than on
/// every call, to bound sweep cost.
const SWEEP_EVERY: u64 = 100;

/// Leaderboards are truncated to this many rows.
pub const LEADERBOARD_SIZE: usize = 20;

pub struct RatioStore {
    records: HashMap<String, RatioRecord>,
    /// Lower-cased usernames selected for targeted enrichment.
    tracked: HashSet<String>,
    retention: Duration,
    inserts_since_sweep: u64,
}

impl RatioStore {
    pub fn new(retention_hours: i64) -> Self {
        Self {
            records: HashMap::new(),
            tracked: HashSet::new(),
            retention: Duration::hours(retention_hours),
            inserts_since_sweep: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&RatioRecord> {
        self.records.get(id)
    }

    /// Insert or fully replace the record keyed by parent id.
    ///
    /// The record is stored exactly as given — preserving `discovered_at`
    /// across updates is the caller's job. Every `SWEEP_EVERY` insertions
    /// an eviction sweep runs as a side effect.
    pub fn upsert(&mut self, record: RatioRecord, now: DateTime<Utc>) -> UpsertOutcome {
        let outcome = if self.records.contains_key(&record.id) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        self.records.insert(record.id.clone(), record);

        self.inserts_since_sweep += 1;
        if self.inserts_since_sweep >= SWEEP_EVERY {
            self.inserts_since_sweep = 0;
            self.evict(now);
        }

        outcome
    }

    /// Drop every record older than the retention horizon.
    /// A record exactly at the cutoff is retained.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        let before = self.records.len();
        self.records.retain(|_, r| r.discovered_at >= cutoff);
        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!(evicted = evicted, remaining = self.records.len(), "Evicted expired ratios");
        }
    }

    /// Full unordered snapshot.
    pub fn get_all(&self) -> Vec<RatioRecord> {
        self.records.values().cloned().collect()
    }

    /// Filtered, sorted, truncated snapshot.
    pub fn query(&self, filter: &RatioFilter) -> Vec<RatioRecord> {
        let mut results: Vec<RatioRecord> = self
            .records
            .values()
            .filter(|r| {
                if let Some(username) = &filter.username {
                    if !r.parent.author.eq_ignore_ascii_case(username)
                        && !r.reply.author.eq_ignore_ascii_case(username)
                    {
                        return false;
                    }
                }
                if r.reply.likes < filter.min_likes {
                    return false;
                }
                if let Some(severity) = &filter.severity {
                    if !severity.matches(r) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        match filter.sort {
            SortOrder::Recency => {
                results.sort_by(|a, b| b.parent.created_at.cmp(&a.parent.created_at));
            }
            SortOrder::Severity => {
                results.sort_by(|a, b| {
                    b.ratio
                        .partial_cmp(&a.ratio)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
        }

        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        results
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total: self.records.len(),
            ratio_count: 0,
            brutal_count: 0,
            lethal_count: 0,
            oldest_discovered: None,
            newest_discovered: None,
            tracked_users: self.tracked.len(),
        };

        for record in self.records.values() {
            if record.is_ratio {
                stats.ratio_count += 1;
            }
            if record.is_brutal {
                stats.brutal_count += 1;
            }
            if record.is_lethal {
                stats.lethal_count += 1;
            }
            let at = record.discovered_at;
            stats.oldest_discovered = Some(stats.oldest_discovered.map_or(at, |o| o.min(at)));
            stats.newest_discovered = Some(stats.newest_discovered.map_or(at, |n| n.max(at)));
        }

        stats
    }

    /// Materialize both leaderboards from the full record set.
    ///
    /// Victims aggregate per parent author, perpetrators per reply
    /// author; each entry keeps count of appearances, the opposing
    /// side's like total, and the highest-ratio example. Sorted by
    /// count descending (ties keep map order), top 20.
    pub fn leaderboards(&self) -> Leaderboards {
        let mut victims: HashMap<String, LeaderboardEntry> = HashMap::new();
        let mut perpetrators: HashMap<String, LeaderboardEntry> = HashMap::new();

        for record in self.records.values() {
            tally(&mut victims, &record.parent.author, record.reply.likes, record);
            tally(
                &mut perpetrators,
                &record.reply.author,
                record.parent.likes,
                record,
            );
        }

        Leaderboards {
            victims: rank(victims),
            perpetrators: rank(perpetrators),
        }
    }

    // -- tracked users --

    /// Add one username (lower-cased). Returns true if newly added.
    pub fn add_tracked_user(&mut self, username: &str) -> bool {
        self.tracked.insert(username.to_lowercase())
    }

    /// Sorted snapshot of the tracked-user set.
    pub fn tracked_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.tracked.iter().cloned().collect();
        users.sort();
        users
    }

    /// Monotonic union of leaderboard usernames into the tracked set.
    /// Returns how many were new.
    pub fn update_tracked_from_leaderboards(
        &mut self,
        victims: &[String],
        perpetrators: &[String],
    ) -> usize {
        let mut added = 0;
        for username in victims.iter().chain(perpetrators) {
            if self.tracked.insert(username.to_lowercase()) {
                added += 1;
            }
        }
        if added > 0 {
            debug!(added = added, total = self.tracked.len(), "Tracked users updated");
        }
        added
    }
}

fn tally(
    board: &mut HashMap<String, LeaderboardEntry>,
    username: &str,
    opposing_likes: u64,
    record: &RatioRecord,
) {
    let entry = board
        .entry(username.to_lowercase())
        .or_insert_with(|| LeaderboardEntry {
            username: username.to_string(),
            count: 0,
            total_likes: 0,
            worst_ratio: 0.0,
            example: record.clone(),
        });
    entry.count += 1;
    entry.total_likes += opposing_likes;
    if record.ratio > entry.worst_ratio {
        entry.worst_ratio = record.ratio;
        entry.example = record.clone();
    }
}

fn rank(board: HashMap<String, LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = board.into_values().collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries.truncate(LEADERBOARD_SIZE);
    entries
}
