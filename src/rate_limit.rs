//! Login / device-exchange rate limiting (ambient hardening, not a
//! numbered component).
//!
//! Scoped narrowly to the two unauthenticated, brute-forceable endpoints
//! spec.md calls out: `/auth/login` and `/devices/exchange`. Every other
//! route sits behind [`crate::authz::PermissionGuard`] already, so it does
//! not need its own throttle. Unlike a general-purpose limiter this carries
//! no per-deployment config surface: the two endpoint budgets are fixed
//! constants, since nothing in this crate's config ever varies them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use trust_core::rate_limit::{RateLimiter, RateLimitKey};
//!
//! # async fn example() {
//! let limiter = RateLimiter::for_auth();
//!
//! let key = RateLimitKey::ip("192.168.1.1");
//! match limiter.check(&key, "login").await {
//!     Ok(()) => { /* proceed with authentication */ }
//!     Err(info) => { /* 429, retry after info.retry_after */ }
//! }
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Budget {
    requests: u32,
    window: Duration,
    burst: u32,
}

const LOGIN_BUDGET: Budget = Budget {
    requests: 5,
    window: Duration::from_secs(60),
    burst: 2,
};

const DEVICE_EXCHANGE_BUDGET: Budget = Budget {
    requests: 10,
    window: Duration::from_secs(60),
    burst: 3,
};

/// Catches any endpoint that isn't `login`/`device_exchange`; generous
/// because every such route already requires a resolved actor first.
const FALLBACK_BUDGET: Budget = Budget {
    requests: 100,
    window: Duration::from_secs(60),
    burst: 10,
};

fn budget_for(endpoint: &str) -> &'static Budget {
    match endpoint {
        "login" => &LOGIN_BUDGET,
        "device_exchange" => &DEVICE_EXCHANGE_BUDGET,
        _ => &FALLBACK_BUDGET,
    }
}

/// Key identifying the source of a throttled request. Only IP-keying is
/// exercised today; `/auth/login` and `/devices/exchange` are both
/// unauthenticated, so there is no user id or API key to key on yet.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Key on the caller's source IP.
    pub fn ip(ip: impl Into<String>) -> Self {
        Self(ip.into())
    }
}

/// Returned when [`RateLimiter::check`] denies a request.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub retry_after: Duration,
    pub current_count: u32,
    pub limit: u32,
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rate limited: {}/{} requests, retry after {:?}",
            self.current_count, self.limit, self.retry_after
        )
    }
}

impl std::error::Error for RateLimitInfo {}

#[derive(Debug, Default)]
struct RequestTracker {
    timestamps: Vec<Instant>,
}

/// Sliding-window-with-burst limiter over the login and device-exchange
/// endpoints.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    entries: Arc<RwLock<HashMap<(RateLimitKey, &'static str), RequestTracker>>>,
}

impl RateLimiter {
    /// Construct a limiter carrying the fixed login/device-exchange budgets.
    pub fn for_auth() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Admit or deny a request from `key` against `endpoint`'s budget.
    pub async fn check(&self, key: &RateLimitKey, endpoint: &str) -> Result<(), RateLimitInfo> {
        let budget = budget_for(endpoint);
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry_key = (key.clone(), normalize(endpoint));
        let tracker = entries.entry(entry_key).or_default();

        let window_start = now - budget.window;
        tracker.timestamps.retain(|&t| t > window_start);

        let current_count = tracker.timestamps.len() as u32;
        let effective_limit = budget.requests + budget.burst;

        if current_count >= effective_limit {
            let oldest = tracker.timestamps.first().copied().unwrap_or(now);
            return Err(RateLimitInfo {
                retry_after: budget.window - (now - oldest),
                current_count,
                limit: budget.requests,
            });
        }

        tracker.timestamps.push(now);
        Ok(())
    }
}

fn normalize(endpoint: &str) -> &'static str {
    match endpoint {
        "login" => "login",
        "device_exchange" => "device_exchange",
        _ => "other",
    }
}
