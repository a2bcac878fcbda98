//! Rate Limiting Infrastructure
//!
//! Fixed-window counters keyed by an arbitrary string (usually
//! `"<scope>:<client ip>"`). Used to throttle password and MFA attempts.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_ms: i64,
}

impl RateLimitResult {
    /// Seconds until the window resets, for `Retry-After`
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let remaining_ms = (self.reset_at_ms - now_ms).max(0) as u64;
        remaining_ms.div_ceil(1000)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit backend unavailable: {0}")]
    Backend(String),
}

#[trait_variant::make(RateLimitStore: Send)]
pub trait LocalRateLimitStore {
    /// Count one request against `key` and report whether it is allowed.
    async fn check_and_increment(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, RateLimitError>;

    /// Forget the counter for `key` (e.g. after a successful login).
    async fn reset(&self, key: &str) -> Result<(), RateLimitError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at_ms: i64,
    count: u32,
}

/// Process-local store. Counters are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn check_at(&self, key: &str, config: &RateLimitConfig, now_ms: i64) -> RateLimitResult {
        let mut windows = self.windows.lock().await;

        // Opportunistic sweep so abandoned keys do not accumulate
        if windows.len() > 10_000 {
            let window_ms = config.window_ms();
            windows.retain(|_, w| now_ms - w.started_at_ms < window_ms);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            started_at_ms: now_ms,
            count: 0,
        });
        if now_ms - window.started_at_ms >= config.window_ms() {
            *window = Window {
                started_at_ms: now_ms,
                count: 0,
            };
        }

        let reset_at_ms = window.started_at_ms + config.window_ms();
        if window.count >= config.max_requests {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at_ms,
            };
        }

        window.count += 1;
        RateLimitResult {
            allowed: true,
            remaining: config.max_requests - window.count,
            reset_at_ms,
        }
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitResult, RateLimitError> {
        Ok(self
            .check_at(key, config, Utc::now().timestamp_millis())
            .await)
    }

    async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        self.windows.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryRateLimitStore, RateLimitConfig, RateLimitStore};

    #[tokio::test]
    async fn test_fixed_window() {
        let store = InMemoryRateLimitStore::new();
        let config = RateLimitConfig::new(3, 60);

        for expected_remaining in [2, 1, 0] {
            let result = store.check_at("login:1.2.3.4", &config, 1_000).await;
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }

        let blocked = store.check_at("login:1.2.3.4", &config, 2_000).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.reset_at_ms, 61_000);
        assert_eq!(blocked.retry_after_secs(2_000), 59);

        // other keys are independent
        assert!(store.check_at("login:5.6.7.8", &config, 2_000).await.allowed);

        // new window
        assert!(store.check_at("login:1.2.3.4", &config, 61_000).await.allowed);
    }

    #[tokio::test]
    async fn test_reset() {
        let store = InMemoryRateLimitStore::new();
        let config = RateLimitConfig::new(1, 60);

        assert!(store.check_and_increment("k", &config).await.unwrap().allowed);
        assert!(!store.check_and_increment("k", &config).await.unwrap().allowed);

        store.reset("k").await.unwrap();
        assert!(store.check_and_increment("k", &config).await.unwrap().allowed);
    }
}
