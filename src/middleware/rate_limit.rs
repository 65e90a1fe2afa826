//! Fixed-window request limiter keyed by client address.
//!
//! State lives in process memory only, so limits reset when the server
//! restarts and are not shared between instances.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::AppState;

pub const PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    entries: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(window: std::time::Duration, max_requests: u32) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::minutes(15)),
            max_requests,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, identifier: &str) -> RateLimitStatus {
        self.check_at(identifier, Utc::now())
    }

    /// Counts one request for `identifier` at `now`.
    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitStatus {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let window = entries
            .entry(identifier.to_string())
            .and_modify(|w| {
                if now > w.reset_at {
                    *w = Window {
                        count: 0,
                        reset_at: now + self.window,
                    };
                }
            })
            .or_insert(Window {
                count: 0,
                reset_at: now + self.window,
            });
        window.count = window.count.saturating_add(1);

        let allowed = window.count <= self.max_requests;
        let retry_after_secs = if allowed {
            0
        } else {
            let millis = (window.reset_at - now).num_milliseconds().max(0) as u64;
            millis.div_ceil(1000)
        };

        RateLimitStatus {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(window.count),
            reset_at: window.reset_at,
            retry_after_secs,
        }
    }

    /// Drops windows that have already closed. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, w| w.reset_at >= now);
        before - entries.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn spawn_purge_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = self.purge_expired(Utc::now());
                if removed > 0 {
                    tracing::debug!("Purged {} expired rate limit windows", removed);
                }
            }
        })
    }
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, else `anonymous`.
pub fn client_identifier(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or("anonymous")
        .to_string()
}

fn apply_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    let pairs = [
        ("x-ratelimit-limit", status.limit.to_string()),
        ("x-ratelimit-remaining", status.remaining.to_string()),
        (
            "x-ratelimit-reset",
            status.reset_at.timestamp_millis().to_string(),
        ),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identifier = client_identifier(request.headers());
    let status = state.rate_limiter.check(&identifier);

    if !status.allowed {
        tracing::warn!("Rate limit exceeded for {}", identifier);
        let mut response = AppError::TooManyRequests.into_response();
        apply_headers(response.headers_mut(), &status);
        if let Ok(value) = HeaderValue::from_str(&status.retry_after_secs.to_string()) {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &status);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_allows_up_to_limit() {
        let limiter = RateLimiter::new(std::time::Duration::from_secs(60), 3);
        let now = Utc::now();

        for expected_remaining in [2, 1, 0] {
            let status = limiter.check_at("1.2.3.4", now);
            assert!(status.allowed);
            assert_eq!(status.remaining, expected_remaining);
        }

        let blocked = limiter.check_at("1.2.3.4", now);
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.retry_after_secs, 60);

        // Other clients have their own window
        assert!(limiter.check_at("5.6.7.8", now).allowed);
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let limiter = RateLimiter::new(std::time::Duration::from_secs(10), 1);
        let now = Utc::now();
        assert!(limiter.check_at("client", now).allowed);
        assert!(!limiter.check_at("client", now).allowed);

        let later = now + Duration::seconds(11);
        let status = limiter.check_at("client", later);
        assert!(status.allowed);
        assert_eq!(status.reset_at, later + Duration::seconds(10));
    }

    #[test]
    fn test_purge_expired() {
        let limiter = RateLimiter::new(std::time::Duration::from_secs(10), 5);
        let now = Utc::now();
        limiter.check_at("old", now - Duration::seconds(30));
        limiter.check_at("fresh", now);

        assert_eq!(limiter.purge_expired(now), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_identifier() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers), "anonymous");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_identifier(&headers), "10.0.0.2");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_identifier(&headers), "203.0.113.7");
    }
}
