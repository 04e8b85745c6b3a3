// Rate limiting and retry for X API calls.
//
// App-auth search endpoints allow roughly 450 requests per 15 minutes.
// This module provides a sliding-window rate limiter that throttles
// requests to stay under that budget, plus a retry wrapper that handles
// transient failures (429, 5xx, network/timeout) with exponential
// backoff and jitter. Non-transient failures propagate immediately.
//
// The rate limiter is shared across all concurrent tasks via the client,
// using interior mutability (Mutex) so callers only need &self.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use reqwest::StatusCode;
use tracing::{info, warn};

/// An HTTP error response, kept as a typed error so the retry layer can
/// classify it by status instead of parsing message strings.
#[derive(Debug)]
pub struct StatusError {
    pub status: StatusCode,
    pub endpoint: String,
    pub body: String,
}

impl StatusError {
    pub fn new(status: StatusCode, endpoint: &str, body: String) -> Self {
        Self {
            status,
            endpoint: endpoint.to_string(),
            body,
        }
    }

    /// Rate-limit responses and server errors are worth retrying;
    /// client errors (bad request, not found, auth) are not.
    pub fn is_retryable(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS || self.status.is_server_error()
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X API {} returned {}: {}",
            self.endpoint, self.status, self.body
        )
    }
}

impl std::error::Error for StatusError {}

/// Check whether an error anywhere in the chain is a retryable failure:
/// a retryable HTTP status or a network/timeout transport error.
pub fn is_retryable_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(status) = cause.downcast_ref::<StatusError>() {
            return status.is_retryable();
        }
        if let Some(transport) = cause.downcast_ref::<reqwest::Error>() {
            return transport.is_timeout() || transport.is_connect();
        }
        false
    })
}

/// Check whether an error chain bottoms out in an HTTP 404.
pub fn is_not_found_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<StatusError>()
            .is_some_and(|s| s.status == StatusCode::NOT_FOUND)
    })
}

/// A sliding-window rate limiter for API calls.
///
/// Tracks request timestamps in a sliding window and pauses when the
/// window is full. Thread-safe via interior mutability so one limiter
/// can serve every concurrent enrichment task.
pub struct RateLimiter {
    requests: Mutex<VecDeque<Instant>>,
    max_requests: u32,
    window: Duration,
    /// Minimum delay between consecutive requests to avoid bursts.
    min_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests_per_window: u32, window: Duration, min_delay: Duration) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            max_requests: max_requests_per_window,
            window,
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until a request slot is available, then claim it.
    ///
    /// Enforces the minimum inter-request delay first, then the sliding
    /// window. All waiting happens with the locks released — the wait
    /// duration is computed under the lock, the sleep happens outside it,
    /// so one caller's wait never serializes another caller's bookkeeping.
    pub async fn acquire(&self) {
        let min_delay_wait = {
            let last = self.last_request.lock().unwrap();
            last.map(|t| t.elapsed())
                .filter(|elapsed| *elapsed < self.min_delay)
                .map(|elapsed| self.min_delay - elapsed)
        };

        if let Some(wait) = min_delay_wait {
            tokio::time::sleep(wait).await;
        }

        loop {
            let wait = {
                let now = Instant::now();
                let mut requests = self.requests.lock().unwrap();

                while let Some(&oldest) = requests.front() {
                    if now.duration_since(oldest) > self.window {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }

                if (requests.len() as u32) < self.max_requests {
                    requests.push_back(now);
                    *self.last_request.lock().unwrap() = Some(now);
                    None
                } else {
                    // Window full: wait until the oldest request ages out.
                    let oldest = *requests.front().unwrap();
                    Some((oldest + self.window).duration_since(now))
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    info!(
                        delay_ms = wait.as_millis() as u64,
                        "Rate limit window full, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// Maximum number of retry attempts on transient errors.
const MAX_RETRIES: u32 = 4;

/// Base delay for exponential backoff (doubles each retry).
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Cap on the backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry an async operation with exponential backoff on transient errors.
///
/// Retryable failures (429, 5xx, network/timeout) are retried up to
/// `MAX_RETRIES` times with `min(base * 2^attempt + jitter, cap)` delays;
/// the final failure propagates. Everything else returns immediately.
/// The limiter's `acquire()` runs before each attempt so retries still
/// respect the request budget.
pub async fn with_retry<F, Fut, T>(limiter: &RateLimiter, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        limiter.acquire().await;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable_error(&err) || attempt >= MAX_RETRIES {
                    return Err(err);
                }

                let backoff = BASE_BACKOFF.saturating_mul(1u32 << attempt).min(MAX_BACKOFF);
                let delay = backoff + jitter();
                attempt += 1;

                warn!(
                    attempt = attempt,
                    max_retries = MAX_RETRIES,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient API error, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Up to one second of jitter, derived from the wall clock's nanosecond
/// component — enough spread to avoid thundering herds without pulling
/// in `rand`.
fn jitter() -> Duration {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos % 1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn status_err(status: StatusCode) -> anyhow::Error {
        anyhow::Error::new(StatusError::new(status, "/2/test", String::new()))
    }

    // -- error classification --

    #[test]
    fn rate_limit_status_is_retryable() {
        assert!(is_retryable_error(&status_err(
            StatusCode::TOO_MANY_REQUESTS
        )));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(is_retryable_error(&status_err(
            StatusCode::INTERNAL_SERVER_ERROR
        )));
        assert!(is_retryable_error(&status_err(StatusCode::BAD_GATEWAY)));
        assert!(is_retryable_error(&status_err(
            StatusCode::SERVICE_UNAVAILABLE
        )));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!is_retryable_error(&status_err(StatusCode::BAD_REQUEST)));
        assert!(!is_retryable_error(&status_err(StatusCode::NOT_FOUND)));
        assert!(!is_retryable_error(&status_err(StatusCode::UNAUTHORIZED)));
    }

    #[test]
    fn plain_errors_are_not_retryable() {
        assert!(!is_retryable_error(&anyhow::anyhow!("connection refused")));
    }

    #[test]
    fn classification_sees_through_context() {
        let err = status_err(StatusCode::TOO_MANY_REQUESTS).context("fetching post 123");
        assert!(is_retryable_error(&err));
    }

    #[test]
    fn not_found_detection() {
        assert!(is_not_found_error(&status_err(StatusCode::NOT_FOUND)));
        assert!(!is_not_found_error(&status_err(StatusCode::BAD_REQUEST)));
        assert!(!is_not_found_error(&anyhow::anyhow!("404 in a message")));
    }

    // -- with_retry --
    // start_paused skips the backoff sleeps; these tests check call
    // counts and return values, not elapsed time.

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_immediately() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = with_retry(&limiter, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, anyhow::Error>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = with_retry(&limiter, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(status_err(StatusCode::SERVICE_UNAVAILABLE))
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_budget_exhausted() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<i32> = with_retry(&limiter, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status_err(StatusCode::TOO_MANY_REQUESTS)) }
        })
        .await;

        assert!(result.is_err());
        // 1 initial + MAX_RETRIES
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_does_not_retry_client_errors() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<i32> = with_retry(&limiter, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(status_err(StatusCode::NOT_FOUND)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_preserves_final_error() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::ZERO);

        let result: Result<i32> = with_retry(&limiter, || async {
            Err(status_err(StatusCode::BAD_GATEWAY)).context("fetching timeline")
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("fetching timeline"));
        assert!(is_retryable_error(&err));
    }

    // -- RateLimiter --

    #[tokio::test]
    async fn acquire_allows_requests_under_limit() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60), Duration::ZERO);
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.requests.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn acquire_blocks_when_window_full() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100), Duration::ZERO);

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Third acquire must wait for the 100ms window to age out.
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn acquire_evicts_expired_requests() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50), Duration::ZERO);
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_millis(120)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn acquire_enforces_min_delay() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60), Duration::from_millis(50));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn concurrent_tasks_share_one_window() {
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60), Duration::ZERO));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let lim = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { lim.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(limiter.requests.lock().unwrap().len(), 10);
    }
}
