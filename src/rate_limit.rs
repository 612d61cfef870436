//! Sliding-window request throttling, one limiter per upstream provider.
//!
//! The cap belongs to the API key, not to a pipeline stage, so every caller of
//! a provider must draw from the same [`RateLimiter`]. The
//! [`RateLimiterRegistry`] is created once by the application and handed to
//! each pipeline; concurrently running jobs therefore contend for the same
//! quota.
//!
//! Time comes from `tokio::time::Instant`, so tests can drive the window with
//! a paused clock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Requests allowed per trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 15,
            window_ms: 60_000,
        }
    }
}

pub struct RateLimiter {
    provider: String,
    limit: RateLimit,
    timestamps: Mutex<VecDeque<Instant>>,
    /// Serialises `acquire` so waiters are admitted in arrival order.
    gate: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, limit: RateLimit) -> Self {
        Self {
            provider: provider.into(),
            limit: RateLimit {
                max_requests: limit.max_requests.max(1),
                window_ms: limit.window_ms,
            },
            timestamps: Mutex::new(VecDeque::new()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.limit.window_ms)
    }

    fn pruned(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        let mut ts = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        while let Some(&oldest) = ts.front() {
            if now.duration_since(oldest) >= self.window() {
                ts.pop_front();
            } else {
                break;
            }
        }
        ts
    }

    /// Requests that may be issued right now without waiting.
    pub fn available_slots(&self) -> usize {
        let ts = self.pruned();
        self.limit.max_requests.saturating_sub(ts.len())
    }

    /// Milliseconds until a slot frees up; `0` when one is available.
    pub fn wait_time_ms(&self) -> u64 {
        self.wait_time().as_millis() as u64
    }

    fn wait_time(&self) -> Duration {
        let ts = self.pruned();
        if ts.len() < self.limit.max_requests {
            return Duration::ZERO;
        }
        match ts.front() {
            Some(&oldest) => (oldest + self.window()).saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }

    /// Wait for a free slot, then claim it.
    pub async fn acquire(&self) {
        let _turn = self.gate.lock().await;
        loop {
            let wait = self.wait_time();
            if wait.is_zero() {
                break;
            }
            debug!("Rate limiting '{}': waiting {:?}", self.provider, wait);
            sleep(wait).await;
        }
        self.pruned().push_back(Instant::now());
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("provider", &self.provider)
            .field("limit", &self.limit)
            .finish()
    }
}

/// Process-wide map from provider name to its shared limiter.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    default_limit: RateLimit,
    overrides: HashMap<String, RateLimit>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            overrides: HashMap::new(),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Give one provider its own quota. Only affects limiters created afterwards.
    pub fn with_limit(mut self, provider: impl Into<String>, limit: RateLimit) -> Self {
        self.overrides.insert(provider.into(), limit);
        self
    }

    /// The limiter for `provider`, created on first use.
    pub fn limiter(&self, provider: &str) -> Arc<RateLimiter> {
        let mut map = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        let limit = self
            .overrides
            .get(provider)
            .copied()
            .unwrap_or(self.default_limit);
        Arc::clone(
            map.entry(provider.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(provider, limit))),
        )
    }
}
