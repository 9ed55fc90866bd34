//! Retry policy and shared rate-limit state for remote calls.
//!
//! A [`RateLimitContext`] lives for one sync run and is passed into every
//! remote client call. It records when each endpoint may be called again so
//! that a mandated wait seen by one task holds back every other task hitting
//! the same endpoint.

use chrono::Utc;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Key used for a block that applies to every endpoint.
const ALL_ENDPOINTS: &str = "*";

/// Exponential backoff settings for one remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based attempt.
    pub fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = exp.min(self.max_delay_ms as f64);

        let jitter = if self.jitter_ratio > 0.0 {
            let spread = capped * self.jitter_ratio;
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };

        let millis = (capped + jitter).clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is allowed after the given zero-based attempt.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}

/// Whether a response is GitHub telling us to slow down.
///
/// GitHub answers rate limits with 429, or with 403 carrying either a
/// `retry-after` header or an exhausted `x-ratelimit-remaining`.
pub fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && (headers.contains_key("retry-after") || primary_quota_exhausted(headers))
}

/// Whether the primary hourly quota is used up.
pub fn primary_quota_exhausted(headers: &HeaderMap) -> bool {
    header_str(headers, "x-ratelimit-remaining")
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

/// Wait mandated by the response, if it carries one.
///
/// `retry-after` (seconds) wins over the `x-ratelimit-reset` epoch.
pub fn mandated_wait(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_str(headers, "retry-after").and_then(|v| v.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(secs));
    }

    if primary_quota_exhausted(headers) {
        let reset = header_str(headers, "x-ratelimit-reset")?
            .trim()
            .parse::<i64>()
            .ok()?;
        let secs = (reset - Utc::now().timestamp()).max(0) as u64;
        // reset is whole seconds; one more keeps us past it
        return Some(Duration::from_secs(secs + 1));
    }

    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Debug, Default)]
struct LimiterState {
    blocked_until: HashMap<String, Instant>,
    waits: u32,
    total_wait: Duration,
}

/// Counters describing how much a run was held back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub waits: u32,
    pub total_wait_ms: u64,
}

/// Rate-limit state shared by every remote call of one run.
#[derive(Debug, Clone, Default)]
pub struct RateLimitContext {
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimitContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until the endpoint (and the global block) allows another call.
    pub async fn wait_turn(&self, endpoint: &str) {
        loop {
            let deadline = {
                let state = self.state.lock().await;
                let own = state.blocked_until.get(endpoint).copied();
                let global = state.blocked_until.get(ALL_ENDPOINTS).copied();
                match (own, global) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                }
            };

            match deadline {
                Some(until) if until > Instant::now() => {
                    let wait = until - Instant::now();
                    {
                        let mut state = self.state.lock().await;
                        state.waits += 1;
                        state.total_wait += wait;
                    }
                    log::debug!("[github] Waiting {:?} before calling {}", wait, endpoint);
                    tokio::time::sleep_until(until).await;
                }
                _ => return,
            }
        }
    }

    /// Hold back calls to one endpoint for `wait`.
    pub async fn block_endpoint(&self, endpoint: &str, wait: Duration) {
        self.block(endpoint, wait).await;
    }

    /// Hold back calls to every endpoint for `wait`.
    pub async fn block_all(&self, wait: Duration) {
        self.block(ALL_ENDPOINTS, wait).await;
    }

    async fn block(&self, key: &str, wait: Duration) {
        let until = Instant::now() + wait;
        let mut state = self.state.lock().await;
        let entry = state.blocked_until.entry(key.to_string()).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    pub async fn stats(&self) -> RateLimitStats {
        let state = self.state.lock().await;
        RateLimitStats {
            waits: state.waits,
            total_wait_ms: state.total_wait.as_millis() as u64,
        }
    }
}
