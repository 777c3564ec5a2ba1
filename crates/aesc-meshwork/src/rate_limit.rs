//! Fixed-window rate limiting for the form and post endpoints.
//!
//! Counters live behind [`WindowCounter`] so they can move to a shared
//! cache when the node runs as more than one process. Best-effort abuse
//! deterrence only.

use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Counters above this many keys trigger a sweep of expired windows.
const PRUNE_THRESHOLD: usize = 10_000;

/// Keys tracked at most. New keys beyond this are refused until a sweep
/// frees room.
pub const MAX_TRACKED_KEYS: usize = 100_000;

/// A per-key counter with a fixed window.
pub trait WindowCounter: Send + Sync {
    /// Count one hit for `key` at `now_ms` and return the count in the
    /// current window, including this hit. The window restarts when more
    /// than `window_ms` has elapsed since it began.
    fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> u32;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: i64,
    count: u32,
    window_ms: i64,
}

#[derive(Debug, Default)]
struct Windows {
    map: HashMap<String, Window>,
    /// Time of the last sweep; sweeps run at most once per window
    last_sweep: Option<i64>,
    sweeps: u64,
}

impl Windows {
    fn sweep_if_due(&mut self, now_ms: i64, window_ms: i64) {
        if self.map.len() <= PRUNE_THRESHOLD {
            return;
        }
        if self.last_sweep.is_some_and(|at| now_ms - at < window_ms) {
            return;
        }
        self.map.retain(|_, w| now_ms - w.started_at <= w.window_ms);
        self.last_sweep = Some(now_ms);
        self.sweeps += 1;
    }
}

/// In-process counter.
pub struct MemoryWindowCounter {
    windows: Mutex<Windows>,
    max_keys: usize,
}

impl Default for MemoryWindowCounter {
    fn default() -> Self {
        Self::with_max_keys(MAX_TRACKED_KEYS)
    }
}

impl MemoryWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter refusing new keys once `max_keys` are tracked.
    pub fn with_max_keys(max_keys: usize) -> Self {
        Self {
            windows: Mutex::new(Windows::default()),
            max_keys,
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WindowCounter for MemoryWindowCounter {
    fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> u32 {
        let mut windows = self.windows.lock();
        windows.sweep_if_due(now_ms, window_ms);

        if !windows.map.contains_key(key) && windows.map.len() >= self.max_keys {
            tracing::warn!(keys = windows.map.len(), "rate limiter full, refusing new key");
            return u32::MAX;
        }

        let window = windows.map.entry(key.to_string()).or_insert(Window {
            started_at: now_ms,
            count: 0,
            window_ms,
        });
        if now_ms - window.started_at > window_ms {
            *window = Window {
                started_at: now_ms,
                count: 0,
                window_ms,
            };
        }
        window.count = window.count.saturating_add(1);
        window.count
    }
}

/// A limit: at most `max` hits per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max: u32,
    pub window_ms: i64,
}

impl Limit {
    pub const fn per_minute(max: u32) -> Self {
        Self { max, window_ms: 60_000 }
    }
}

/// Limit for the contact and subscribe forms.
pub const FORM_LIMIT: Limit = Limit::per_minute(10);

/// Limit for signal posts and node registration.
pub const POST_LIMIT: Limit = Limit::per_minute(20);

/// Rate limiter over a pluggable counter.
#[derive(Clone)]
pub struct RateLimiter {
    counter: Arc<dyn WindowCounter>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(MemoryWindowCounter::new()))
    }
}

impl RateLimiter {
    pub fn new(counter: Arc<dyn WindowCounter>) -> Self {
        Self { counter }
    }

    /// Whether a hit on `key` is within `limit`, counted now.
    pub fn allow(&self, key: &str, limit: Limit) -> bool {
        self.allow_at(key, limit, crate::now_ms())
    }

    /// Whether a hit on `key` at `now_ms` is within `limit`.
    pub fn allow_at(&self, key: &str, limit: Limit, now_ms: i64) -> bool {
        let count = self.counter.hit(key, now_ms, limit.window_ms);
        let allowed = count <= limit.max;
        if !allowed {
            tracing::debug!(key, count, max = limit.max, "rate limited");
        }
        allowed
    }
}

/// Client IP. With `trust_proxy`, the first `X-Forwarded-For` entry wins;
/// otherwise the header is ignored, since any client can set it. Falls
/// back to the peer address, then `unknown`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .filter(|_| trust_proxy)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}
