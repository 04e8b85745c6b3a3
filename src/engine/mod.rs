// The ratio engine — an owned instance holding the store, the API
// source, and the polling state. The routing/push layer talks to this
// and nothing else.
//
// One poll cycle: broad search → resolve → upsert, then derive the
// tracked-user set from the interim leaderboards, then enrich every
// tracked user concurrently and merge the results sequentially. The
// lone concurrency guard is the polling flag: a poll that arrives
// while one is running is a no-op.

pub mod resolver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::store::models::{
    Leaderboards, RatioFilter, RatioRecord, StoreStats, UpsertOutcome,
};
use crate::store::tracked::TrackedUsersFile;
use crate::store::RatioStore;
use crate::xapi::traits::PostSource;
use crate::xapi::types::{ApiPost, ApiUser, ReplySearch};

use resolver::{ResolveOptions, Resolution};

const SEARCH_PAGE_SIZE: u32 = 100;
/// Broad search stops after this many pages per cycle.
const MAX_SEARCH_PAGES: usize = 5;
/// ... or once this many ratios have been resolved, whichever first.
const MAX_RATIOS_PER_CYCLE: usize = 200;
const ENRICH_PAGE_SIZE: u32 = 100;
/// Per-user fetch depth cap for each enrichment pattern.
const ENRICH_PAGE_CAP: usize = 2;
/// How many tracked users are enriched in parallel.
const ENRICH_CONCURRENCY: usize = 8;
/// Top-N of each leaderboard feeds the tracked-user set.
const TRACKED_TOP_N: usize = 10;

/// Zero-argument callback fired whenever a cycle changed the store.
pub type UpdateHook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PollOutcome {
    pub new_ratios: usize,
    pub total_ratios: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EngineStatus {
    pub is_polling: bool,
    pub is_scheduled: bool,
    pub interval_ms: u64,
}

/// Result of an explicit per-user enrichment request. A username that
/// doesn't exist is a value, not an error — the caller turns it into a
/// clean user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    NotFound,
    Enriched {
        enriched: usize,
        total_tracked: usize,
    },
}

#[derive(Debug, Default)]
struct CycleTally {
    new: usize,
    updated: usize,
}

impl CycleTally {
    fn apply(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.new += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    fn changed(&self) -> usize {
        self.new + self.updated
    }
}

pub struct Engine {
    source: Arc<dyn PostSource>,
    store: Mutex<RatioStore>,
    /// Idle/Polling guard. The only mutual exclusion the cycle needs.
    polling: AtomicBool,
    scheduled: AtomicBool,
    poll_interval: Duration,
    search_min_likes: u64,
    enrich_min_likes: u64,
    tracked_file: Option<TrackedUsersFile>,
    on_update: Mutex<Option<UpdateHook>>,
}

impl Engine {
    /// Build an engine. Seeds the tracked-user set from the file mirror
    /// when one is configured.
    pub fn new(source: Arc<dyn PostSource>, config: &Config) -> Result<Self> {
        let mut store = RatioStore::new(config.retention_hours);

        let tracked_file = config.tracked_file.as_ref().map(TrackedUsersFile::new);
        if let Some(file) = &tracked_file {
            for username in file.load()? {
                store.add_tracked_user(&username);
            }
        }

        Ok(Self {
            source,
            store: Mutex::new(store),
            polling: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            poll_interval: config.poll_interval,
            search_min_likes: config.search_min_likes,
            enrich_min_likes: config.enrich_min_likes,
            tracked_file,
            on_update: Mutex::new(None),
        })
    }

    /// Register the update-notification hook (the push layer's rebroadcast).
    pub fn set_on_update(&self, hook: UpdateHook) {
        *self.on_update.lock().unwrap() = Some(hook);
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            is_polling: self.polling.load(Ordering::SeqCst),
            is_scheduled: self.scheduled.load(Ordering::SeqCst),
            interval_ms: self.poll_interval.as_millis() as u64,
        }
    }

    // -- read paths (never fail; always serve the current snapshot) --

    pub fn query(&self, filter: &RatioFilter) -> Vec<RatioRecord> {
        self.store.lock().unwrap().query(filter)
    }

    pub fn stats(&self) -> StoreStats {
        self.store.lock().unwrap().stats()
    }

    pub fn leaderboards(&self) -> Leaderboards {
        self.store.lock().unwrap().leaderboards()
    }

    pub fn tracked_users(&self) -> Vec<String> {
        self.store.lock().unwrap().tracked_users()
    }

    // -- polling --

    /// Run one poll/enrichment cycle.
    ///
    /// If a cycle is already in flight this returns immediately with
    /// zero new ratios and the current total, without doing any work.
    pub async fn poll(&self) -> Result<PollOutcome> {
        if self
            .polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Poll already in progress, skipping");
            let total = self.store.lock().unwrap().len();
            return Ok(PollOutcome {
                new_ratios: 0,
                total_ratios: total,
            });
        }

        let result = self.run_cycle().await;
        self.polling.store(false, Ordering::SeqCst);
        result
    }

    /// Drive poll cycles at the configured interval, forever.
    /// A failed cycle is logged and does not stop the next tick.
    pub async fn run_scheduled(&self) {
        self.scheduled.store(true, Ordering::SeqCst);
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting scheduled polling"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.poll().await {
                Ok(outcome) => info!(
                    new = outcome.new_ratios,
                    total = outcome.total_ratios,
                    "Scheduled poll complete"
                ),
                Err(err) => error!(error = %err, "Poll cycle failed, retrying next tick"),
            }
        }
    }

    async fn run_cycle(&self) -> Result<PollOutcome> {
        info!(min_likes = self.search_min_likes, "Polling for new ratios");
        let mut tally = CycleTally::default();

        // Broad paginated search for high-engagement replies, bounded by
        // both a page ceiling and a per-cycle ratio ceiling.
        let search = ReplySearch {
            min_likes: self.search_min_likes,
            to_user: None,
        };
        let mut next_token: Option<String> = None;
        let mut collected = 0usize;

        for _ in 0..MAX_SEARCH_PAGES {
            let page = self
                .source
                .search_replies(&search, SEARCH_PAGE_SIZE, next_token.as_deref())
                .await?;

            let resolutions = resolver::resolve_replies(
                self.source.as_ref(),
                &page.posts,
                &page,
                &ResolveOptions::default(),
                Utc::now(),
            )
            .await;

            for resolution in resolutions {
                match resolution {
                    Resolution::Record(record) => {
                        collected += 1;
                        tally.apply(self.upsert_preserving(record));
                    }
                    Resolution::Skipped(reason) => {
                        debug!(reason = ?reason, "Skipped search candidate")
                    }
                }
            }

            next_token = page.next_token;
            if next_token.is_none() || collected >= MAX_RATIOS_PER_CYCLE {
                break;
            }
        }

        // Derive the tracked-user set from the interim leaderboards.
        // This deliberately reads the store *after* this cycle's search
        // upserts so fresh victims/perpetrators get tracked immediately.
        let tracked = {
            let mut store = self.store.lock().unwrap();
            let boards = store.leaderboards();
            let victims: Vec<String> = top_usernames(&boards.victims);
            let perpetrators: Vec<String> = top_usernames(&boards.perpetrators);
            store.update_tracked_from_leaderboards(&victims, &perpetrators);
            store.tracked_users()
        };
        self.mirror_tracked(&tracked);

        // Enrich all tracked users concurrently; merge results into the
        // store sequentially afterwards.
        if !tracked.is_empty() {
            info!(users = tracked.len(), "Running targeted enrichment");

            let fetches: Vec<_> = tracked
                .iter()
                .map(|username| self.fetch_ratios_for(username))
                .collect();
            let results: Vec<Result<Vec<RatioRecord>>> = stream::iter(fetches)
                .buffer_unordered(ENRICH_CONCURRENCY)
                .collect()
                .await;

            for result in results {
                for record in result? {
                    tally.apply(self.upsert_preserving(record));
                }
            }
        }

        let total = self.store.lock().unwrap().len();
        info!(
            new = tally.new,
            updated = tally.updated,
            total = total,
            "Poll cycle complete"
        );

        if tally.changed() > 0 {
            self.notify_update();
        }

        Ok(PollOutcome {
            new_ratios: tally.new,
            total_ratios: total,
        })
    }

    /// Explicit single-user enrichment (client-initiated lookup).
    /// Validates the username first; not-found does no ratio fetches.
    pub async fn enrich_user(&self, username: &str) -> Result<EnrichOutcome> {
        let Some(user) = self.source.user_by_username(username).await? else {
            return Ok(EnrichOutcome::NotFound);
        };

        let tracked = {
            let mut store = self.store.lock().unwrap();
            store.add_tracked_user(&user.username);
            store.tracked_users()
        };
        self.mirror_tracked(&tracked);

        let mut tally = CycleTally::default();
        for record in self.fetch_user_ratios(&user).await? {
            tally.apply(self.upsert_preserving(record));
        }

        if tally.changed() > 0 {
            self.notify_update();
        }

        Ok(EnrichOutcome::Enriched {
            enriched: tally.changed(),
            total_tracked: tracked.len(),
        })
    }

    /// Cycle-side enrichment wrapper: a tracked username that no longer
    /// resolves is skipped, not fatal.
    async fn fetch_ratios_for(&self, username: &str) -> Result<Vec<RatioRecord>> {
        let Some(user) = self.source.user_by_username(username).await? else {
            warn!(username = username, "Tracked user not resolvable, skipping");
            return Ok(Vec::new());
        };
        self.fetch_user_ratios(&user).await
    }

    /// Both per-user patterns: replies aimed at the user ("did they get
    /// ratio'd") and the user's own recent replies ("did they ratio
    /// someone"), each capped at a fixed page depth.
    async fn fetch_user_ratios(&self, user: &ApiUser) -> Result<Vec<RatioRecord>> {
        let opts = ResolveOptions {
            reply_like_floor: self.enrich_min_likes,
        };
        let mut records = Vec::new();

        let search = ReplySearch {
            min_likes: self.enrich_min_likes,
            to_user: Some(user.username.clone()),
        };
        let mut next_token: Option<String> = None;
        for _ in 0..ENRICH_PAGE_CAP {
            let page = self
                .source
                .search_replies(&search, ENRICH_PAGE_SIZE, next_token.as_deref())
                .await?;
            let resolutions = resolver::resolve_replies(
                self.source.as_ref(),
                &page.posts,
                &page,
                &opts,
                Utc::now(),
            )
            .await;
            collect_records(resolutions, &mut records);
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        let mut next_token: Option<String> = None;
        for _ in 0..ENRICH_PAGE_CAP {
            let page = self
                .source
                .user_recent_posts(&user.id, ENRICH_PAGE_SIZE, next_token.as_deref())
                .await?;
            // Only the timeline items that are replies are candidates.
            let candidates: Vec<ApiPost> = page
                .posts
                .iter()
                .filter(|p| p.replied_to().is_some())
                .cloned()
                .collect();
            let resolutions = resolver::resolve_replies(
                self.source.as_ref(),
                &candidates,
                &page,
                &opts,
                Utc::now(),
            )
            .await;
            collect_records(resolutions, &mut records);
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        Ok(records)
    }

    /// Upsert, carrying forward the original discovery time when the
    /// parent is already known.
    fn upsert_preserving(&self, mut record: RatioRecord) -> UpsertOutcome {
        let mut store = self.store.lock().unwrap();
        if let Some(previous) = store.get(&record.id) {
            record.discovered_at = previous.discovered_at;
        }
        store.upsert(record, Utc::now())
    }

    fn notify_update(&self) {
        if let Some(hook) = self.on_update.lock().unwrap().as_ref() {
            hook();
        }
    }

    /// Best-effort file mirror; a write failure never aborts a cycle.
    fn mirror_tracked(&self, usernames: &[String]) {
        if let Some(file) = &self.tracked_file {
            if let Err(err) = file.save(usernames) {
                warn!(error = %err, "Failed to mirror tracked users");
            }
        }
    }
}

fn top_usernames(board: &[crate::store::models::LeaderboardEntry]) -> Vec<String> {
    board
        .iter()
        .take(TRACKED_TOP_N)
        .map(|entry| entry.username.to_lowercase())
        .collect()
}

fn collect_records(resolutions: Vec<Resolution>, records: &mut Vec<RatioRecord>) {
    for resolution in resolutions {
        match resolution {
            Resolution::Record(record) => records.push(record),
            Resolution::Skipped(reason) => debug!(reason = ?reason, "Skipped enrichment candidate"),
        }
    }
}
