//! Anti-Replay Set (C2)
//!
//! A bounded time-indexed set of consumed `jti` values. Memory-resident by
//! default per §4.2's scale note; the contract is the same shape a
//! distributed TTL store would expose, so swapping backends later doesn't
//! touch [`crate::jwt`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A `jti -> expiresAtUnixMs` record, per §3.
#[derive(Debug, Clone, Copy)]
struct JtiRecord {
    expires_at_ms: i64,
}

/// Concurrent, bounded, time-indexed replay-detection set.
#[derive(Debug, Default)]
pub struct AntiReplaySet {
    entries: Mutex<HashMap<String, JtiRecord>>,
}

impl AntiReplaySet {
    /// Construct an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an `Arc` for sharing across the token engine and the sweeper.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register `jti` as consumed through `expires_at_ms`. Returns `true` if
    /// this is a fresh registration, `false` if `jti` is already present and
    /// unexpired — treat `false` as a replay per §4.2.
    pub async fn register(&self, jti: &str, expires_at_ms: i64, now_ms: i64) -> bool {
        let mut guard = self.entries.lock().await;
        if let Some(existing) = guard.get(jti) {
            if existing.expires_at_ms > now_ms {
                debug!(jti, "replay: jti already registered and unexpired");
                return false;
            }
        }
        guard.insert(jti.to_string(), JtiRecord { expires_at_ms });
        true
    }

    /// Whether `jti` is currently consumed. An expired entry is treated as
    /// not-consumed and is evicted on the way out (lazy eviction, §4.2).
    pub async fn is_consumed(&self, jti: &str, now_ms: i64) -> bool {
        let mut guard = self.entries.lock().await;
        match guard.get(jti) {
            Some(record) if record.expires_at_ms > now_ms => true,
            Some(_) => {
                guard.remove(jti);
                false
            }
            None => false,
        }
    }

    /// Sweep every entry whose `expires_at_ms` is at or before `now_ms`.
    /// Returns the count evicted. Intended to run on a coarse background
    /// schedule (§5).
    pub async fn cleanup_expired(&self, now_ms: i64) -> usize {
        let mut guard = self.entries.lock().await;
        let before = guard.len();
        guard.retain(|_, record| record.expires_at_ms > now_ms);
        before - guard.len()
    }

    /// Current entry count, for tests/metrics.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True if the set currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_register_of_live_jti_is_replay() {
        let set = AntiReplaySet::new();
        assert!(set.register("t1", 10_000, 0).await);
        assert!(!set.register("t1", 10_000, 1).await);
    }

    #[tokio::test]
    async fn register_after_expiry_succeeds_again() {
        let set = AntiReplaySet::new();
        assert!(set.register("t1", 100, 0).await);
        assert!(set.register("t1", 200, 150).await);
    }

    #[tokio::test]
    async fn is_consumed_false_past_expiry_and_evicts() {
        let set = AntiReplaySet::new();
        set.register("t1", 100, 0).await;
        assert!(set.is_consumed("t1", 50).await);
        assert!(!set.is_consumed("t1", 150).await);
        assert_eq!(set.len().await, 0);
    }

    #[tokio::test]
    async fn cleanup_expired_counts_evictions() {
        let set = AntiReplaySet::new();
        set.register("a", 100, 0).await;
        set.register("b", 9_000, 0).await;
        let evicted = set.cleanup_expired(1_000).await;
        assert_eq!(evicted, 1);
        assert_eq!(set.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_register_has_no_lost_updates() {
        let set = Arc::new(AntiReplaySet::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let set = Arc::clone(&set);
            handles.push(tokio::spawn(
                async move { set.register("shared", 100_000, 0).await },
            ));
        }
        let mut successes = 0;
        for h in handles {
            if h.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
