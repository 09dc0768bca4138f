use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::models::Id;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits, keyed by user id.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub message_limit: usize,
    pub message_window: Duration,
    pub connect_limit: usize,
    pub connect_window: Duration,
    pub upload_limit: usize,
    pub upload_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_limit: 30,
            message_window: Duration::from_secs(60),
            connect_limit: 20,
            connect_window: Duration::from_secs(3600),
            upload_limit: 20,
            upload_window: Duration::from_secs(600),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            message_limit: usize_env("RL_MESSAGE_LIMIT", d.message_limit),
            message_window: dur_env("RL_MESSAGE_WINDOW", d.message_window),
            connect_limit: usize_env("RL_CONNECT_LIMIT", d.connect_limit),
            connect_window: dur_env("RL_CONNECT_WINDOW", d.connect_window),
            upload_limit: usize_env("RL_UPLOAD_LIMIT", d.upload_limit),
            upload_window: dur_env("RL_UPLOAD_WINDOW", d.upload_window),
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_message(&self, user: Id) -> bool { self.limiter.check(&format!("message:{user}"), self.cfg.message_limit, self.cfg.message_window) }
    pub fn allow_connect(&self, user: Id) -> bool { self.limiter.check(&format!("connect:{user}"), self.cfg.connect_limit, self.cfg.connect_window) }
    pub fn allow_upload(&self, user: Id) -> bool { self.limiter.check(&format!("upload:{user}"), self.cfg.upload_limit, self.cfg.upload_window) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn keys_are_per_user_and_action() {
        let cfg = RateLimitConfig { message_limit: 1, ..RateLimitConfig::default() };
        let f = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        let (a, b) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        assert!(f.allow_message(a));
        assert!(!f.allow_message(a));
        assert!(f.allow_message(b));
        assert!(f.allow_connect(a));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..10 { assert!(rl.check("k", 1, Duration::from_secs(60))); }
    }
}
