use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    /// Bearer token for the X v2 API. Required for any network command.
    pub bearer_token: String,
    /// API base URL (defaults to https://api.x.com). Override for testing.
    pub api_base_url: String,
    /// How often the scheduled poller runs one cycle.
    pub poll_interval: Duration,
    /// Like floor for the broad reply search (global discovery).
    pub search_min_likes: u64,
    /// Like floor for per-user enrichment replies. Lower than the broad
    /// floor — a 50-like reply burying a 3-like post is still a ratio.
    pub enrich_min_likes: u64,
    /// How long ratio records live in the store before eviction.
    pub retention_hours: i64,
    /// Optional file mirror for the tracked-user set (one username per
    /// line), so tracking survives restarts.
    pub tracked_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything except the bearer token has a default; unparseable
    /// numeric values fall back to their defaults rather than failing.
    pub fn load() -> Result<Self> {
        Ok(Self {
            bearer_token: env::var("X_BEARER_TOKEN").unwrap_or_default(),
            api_base_url: env::var("X_API_BASE_URL")
                .unwrap_or_else(|_| crate::xapi::client::DEFAULT_API_BASE_URL.to_string()),
            poll_interval: Duration::from_secs(env_u64("RATIOSCOPE_POLL_INTERVAL_SECS", 300)),
            search_min_likes: env_u64("RATIOSCOPE_SEARCH_MIN_LIKES", 1000),
            enrich_min_likes: env_u64("RATIOSCOPE_ENRICH_MIN_LIKES", 50),
            retention_hours: env_u64("RATIOSCOPE_RETENTION_HOURS", 48) as i64,
            tracked_file: env::var("RATIOSCOPE_TRACKED_FILE").ok().map(PathBuf::from),
        })
    }

    /// Check that the bearer token is configured.
    /// Call this before any command that talks to the API.
    pub fn require_token(&self) -> Result<()> {
        if self.bearer_token.is_empty() {
            anyhow::bail!(
                "X_BEARER_TOKEN not set. Export it or add it to a .env file \
                 in the working directory."
            );
        }
        Ok(())
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
