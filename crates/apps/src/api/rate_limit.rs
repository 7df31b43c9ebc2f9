//! Per-client rate limiting
//!
//! A sliding one-minute window per client IP. Health checks are never
//! limited. Rejected requests get `429` with a `retry_after` hint.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use ethernity_core::config::RateLimitConfig;
use ethernity_core::Clock;

use crate::api::extract::client_ip;
use crate::state::AppState;

/// Length of the window in seconds
pub const WINDOW_SECS: i64 = 60;

/// Client count above which idle entries are dropped
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Health route, served at the root and under the API prefix
const HEALTH_PATH: &str = "/health";

/// Sliding-window request counter keyed by client
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    per_minute: usize,
    clock: Arc<dyn Clock>,
    hits: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            per_minute: config.per_minute as usize,
            clock,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count a request for `key`; `false` when the window is full
    pub async fn check(&self, key: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let now = self.clock.now();
        let window_start = now - Duration::seconds(WINDOW_SECS);

        let mut hits = self.hits.lock().await;
        if hits.len() >= MAX_TRACKED_CLIENTS {
            Self::prune_before(&mut hits, window_start);
        }
        let recent = hits.entry(key.to_string()).or_default();
        while recent.front().map_or(false, |t| *t <= window_start) {
            recent.pop_front();
        }
        if recent.len() >= self.per_minute {
            return false;
        }
        recent.push_back(now);
        true
    }

    fn prune_before(hits: &mut HashMap<String, VecDeque<DateTime<Utc>>>, window_start: DateTime<Utc>) -> usize {
        let before = hits.len();
        hits.retain(|_, recent| recent.back().map_or(false, |t| *t > window_start));
        before - hits.len()
    }

    /// Drop clients with no request inside the window
    pub async fn prune(&self) -> usize {
        let window_start = self.clock.now() - Duration::seconds(WINDOW_SECS);
        let mut hits = self.hits.lock().await;
        Self::prune_before(&mut hits, window_start)
    }

    /// Clients currently tracked
    pub async fn tracked_clients(&self) -> usize {
        self.hits.lock().await.len()
    }
}

/// Whether `path` is a health check that bypasses the limiter
fn is_exempt(path: &str, api_prefix: &str) -> bool {
    path == HEALTH_PATH || path.strip_prefix(api_prefix.trim_end_matches('/')) == Some(HEALTH_PATH)
}

/// Middleware applying [`RateLimiter`] to every request
pub async fn rate_limit<B>(State(state): State<AppState>, request: Request<B>, next: Next<B>) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() || is_exempt(request.uri().path(), &state.settings.api_prefix) {
        return next.run(request).await;
    }

    let ip = client_ip(request.headers(), request.extensions()).unwrap_or_else(|| "unknown".to_string());
    if !limiter.check(&ip).await {
        warn!("Rate limit exceeded for {}", ip);
        let body = json!({
            "error": "Too many requests. Please try again later.",
            "retry_after": WINDOW_SECS,
        });
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ethernity_core::ManualClock;

    fn limiter(per_minute: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()));
        let config = RateLimitConfig { enabled: true, per_minute };
        (RateLimiter::new(&config, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.check("10.0.0.1").await);
        clock.advance(Duration::seconds(30));
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
        assert!(limiter.check("10.0.0.2").await);

        clock.advance(Duration::seconds(31));
        assert!(limiter.check("10.0.0.1").await);
        assert!(!limiter.check("10.0.0.1").await);
    }

    #[test]
    fn test_health_exempt_under_configured_prefix() {
        assert!(is_exempt("/health", "/api/v1"));
        assert!(is_exempt("/api/v1/health", "/api/v1"));
        assert!(is_exempt("/v2/health", "/v2/"));
        assert!(!is_exempt("/api/v1/health", "/v2"));
        assert!(!is_exempt("/v2/healthz", "/v2"));
        assert!(!is_exempt("/v2/protocols/", "/v2"));
    }

    #[tokio::test]
    async fn test_disabled_and_prune() {
        let clock = Arc::new(ManualClock::default());
        let disabled = RateLimiter::new(&RateLimitConfig { enabled: false, per_minute: 0 }, clock);
        assert!(disabled.check("anyone").await);

        let (limiter, clock) = limiter(5);
        limiter.check("a").await;
        limiter.check("b").await;
        clock.advance(Duration::seconds(WINDOW_SECS + 1));
        limiter.check("b").await;
        assert_eq!(limiter.prune().await, 1);
        assert_eq!(limiter.tracked_clients().await, 1);
    }
}
