//! In-memory store backend.
//!
//! Uses `DashMap` for thread-safe concurrent access, the way the teacher
//! crate's `MemoryStorage` does. Atomicity per key is provided by
//! `DashMap::entry`, which holds its shard lock for the lifetime of the
//! returned guard — the read, the refill/leak/prune computation, and the
//! write all happen while that lock is held, so two callers racing on the
//! same key never interleave (`spec.md` §9).
//!
//! Expired leaky-bucket and sliding-window entries are evicted lazily (an
//! entry past its TTL is treated as absent the next time it's read, exactly
//! as `spec.md` §3's "Lifecycle" describes) and also swept periodically in
//! the background so memory does not grow unbounded from keys that are
//! never touched again.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::Result;
use crate::store::{ScriptResult, Store};

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: f64,
    last_refill_ts: f64,
}

#[derive(Debug, Clone)]
struct LeakyBucketState {
    water_level: f64,
    last_leaked_ts: f64,
    expires_at: f64,
}

#[derive(Debug, Clone)]
struct SlidingWindowState {
    /// Admitted event timestamps, kept sorted ascending. A plain `Vec`
    /// rather than a true set means two admissions at an identical `now`
    /// never coalesce the way they would in a sorted set keyed by
    /// `(score, member)` with `member == now` (the collision `spec.md` §9
    /// flags) — each push is a distinct element regardless of its score.
    timestamps: Vec<f64>,
    expires_at: f64,
}

/// In-memory store backend.
///
/// Suitable for a single-process deployment or for tests; for a fleet of
/// replicas sharing decisions, use [`crate::store::RedisStore`] instead.
pub struct MemoryStore {
    token_buckets: Arc<DashMap<String, TokenBucketState>>,
    leaky_buckets: Arc<DashMap<String, LeakyBucketState>>,
    sliding_windows: Arc<DashMap<String, SlidingWindowState>>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("token_buckets", &self.token_buckets.len())
            .field("leaky_buckets", &self.leaky_buckets.len())
            .field("sliding_windows", &self.sliding_windows.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new, empty in-memory store with its background sweeper
    /// running at the default interval (60 seconds).
    pub fn new() -> Self {
        Self::with_sweep_interval(Duration::from_secs(60))
    }

    /// Create a new in-memory store whose background sweeper runs at the
    /// given interval. Pass a very large interval (or drop the returned
    /// handle and never await it) to effectively disable sweeping; it is
    /// only a memory-hygiene optimization, not a correctness requirement —
    /// lazy eviction on read already enforces the TTL.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let store = Self {
            token_buckets: Arc::new(DashMap::new()),
            leaky_buckets: Arc::new(DashMap::new()),
            sliding_windows: Arc::new(DashMap::new()),
            shutdown: Arc::new(Notify::new()),
        };
        store.spawn_sweeper(interval);
        store
    }

    fn spawn_sweeper(&self, interval: Duration) {
        let leaky_buckets = self.leaky_buckets.clone();
        let sliding_windows = self.sliding_windows.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => break,
                }

                let now = {
                    use crate::clock::Clock;
                    crate::clock::SystemClock.now_secs()
                };
                leaky_buckets.retain(|_, state| state.expires_at > now);
                sliding_windows.retain(|_, state| state.expires_at > now);
            }
        });
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

impl Store for MemoryStore {
    async fn eval_token_bucket(
        &self,
        subject: &str,
        capacity: f64,
        refill_rate: f64,
        now: f64,
    ) -> Result<ScriptResult> {
        let key = format!("tb:{subject}");
        let mut entry = self.token_buckets.entry(key).or_insert(TokenBucketState {
            tokens: capacity,
            last_refill_ts: now,
        });

        // Cold start: a freshly-inserted entry already reads as "born full".
        let elapsed = (now - entry.last_refill_ts).max(0.0);
        let new_tokens = (entry.tokens + elapsed * refill_rate).min(capacity);

        if new_tokens < 1.0 {
            // Deny path leaves the stored tokens/last_refill_ts untouched.
            trace!(subject, capacity, remaining = new_tokens, "store.memory.token_bucket.deny");
            return Ok(ScriptResult::deny(new_tokens));
        }

        entry.tokens = new_tokens - 1.0;
        entry.last_refill_ts = now;
        trace!(
            subject,
            capacity,
            remaining = new_tokens - 1.0,
            "store.memory.token_bucket.allow"
        );
        Ok(ScriptResult::allow(new_tokens - 1.0))
    }

    async fn eval_leaky_bucket(
        &self,
        subject: &str,
        capacity: f64,
        leak_rate: f64,
        now: f64,
    ) -> Result<ScriptResult> {
        let key = format!("lb:{subject}");
        let ttl = (capacity / leak_rate).ceil() + 60.0;

        let mut entry = self.leaky_buckets.entry(key).or_insert(LeakyBucketState {
            water_level: 0.0,
            last_leaked_ts: now,
            expires_at: now + ttl,
        });

        // TTL lapsed since the last write: the key was logically evicted,
        // so this decision recreates it from scratch.
        let (stored_level, stored_ts) = if entry.expires_at <= now {
            (0.0, now)
        } else {
            (entry.water_level, entry.last_leaked_ts)
        };

        let elapsed = (now - stored_ts).max(0.0);
        let decayed = (stored_level - elapsed * leak_rate).max(0.0);

        if decayed + 1.0 > capacity {
            // Deny path leaves the stored fields and TTL untouched.
            trace!(subject, capacity, water_level = decayed, "store.memory.leaky_bucket.deny");
            return Ok(ScriptResult::deny(decayed));
        }

        entry.water_level = decayed + 1.0;
        entry.last_leaked_ts = now;
        entry.expires_at = now + ttl;
        trace!(
            subject,
            capacity,
            water_level = decayed + 1.0,
            "store.memory.leaky_bucket.allow"
        );
        Ok(ScriptResult::allow(decayed + 1.0))
    }

    async fn eval_sliding_window(
        &self,
        subject: &str,
        capacity: f64,
        window_size: f64,
        now: f64,
    ) -> Result<ScriptResult> {
        let key = format!("sw:{subject}");
        let cutoff = now - window_size;

        let mut entry = self
            .sliding_windows
            .entry(key)
            .or_insert_with(|| SlidingWindowState {
                timestamps: Vec::new(),
                expires_at: now + window_size,
            });

        if entry.expires_at <= now {
            entry.timestamps.clear();
        }

        // Evict members with score <= now - window_size (left-closed exclusion).
        entry.timestamps.retain(|&ts| ts > cutoff);

        let count = entry.timestamps.len() as f64;
        if count >= capacity {
            trace!(subject, capacity, count, "store.memory.sliding_window.deny");
            return Ok(ScriptResult::deny(count));
        }

        entry.timestamps.push(now);
        entry.expires_at = now + window_size;
        trace!(
            subject,
            capacity,
            count = count + 1.0,
            "store.memory.sliding_window.allow"
        );
        Ok(ScriptResult::allow(count + 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FakeClock};

    fn clock(start: f64) -> FakeClock {
        FakeClock::new(start)
    }

    #[tokio::test]
    async fn token_bucket_cold_start_allows() {
        let store = MemoryStore::new();
        let result = store.eval_token_bucket("u1", 2.0, 1.0, 100.0).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 1.0);
    }

    #[tokio::test]
    async fn token_bucket_denies_when_exhausted() {
        let store = MemoryStore::new();
        let clk = clock(0.0);

        for _ in 0..2 {
            let r = store
                .eval_token_bucket("u1", 2.0, 1.0, clk.now_secs())
                .await
                .unwrap();
            assert!(r.allowed);
        }

        let r = store
            .eval_token_bucket("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(!r.allowed);

        clk.advance(1.2);
        let r = store
            .eval_token_bucket("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(r.allowed);
    }

    #[tokio::test]
    async fn token_bucket_tolerates_backward_clock() {
        let store = MemoryStore::new();
        let r1 = store.eval_token_bucket("u1", 2.0, 1.0, 100.0).await.unwrap();
        assert!(r1.allowed);
        // A later call with an earlier "now" must not crash or drain extra tokens.
        let r2 = store.eval_token_bucket("u1", 2.0, 1.0, 90.0).await.unwrap();
        assert!(r2.allowed);
    }

    #[tokio::test]
    async fn leaky_bucket_fills_then_drains() {
        let store = MemoryStore::new();
        let clk = clock(0.0);

        for _ in 0..2 {
            let r = store
                .eval_leaky_bucket("u1", 2.0, 1.0, clk.now_secs())
                .await
                .unwrap();
            assert!(r.allowed);
        }

        let r = store
            .eval_leaky_bucket("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(!r.allowed);

        clk.advance(1.5);
        let r = store
            .eval_leaky_bucket("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(r.allowed);
    }

    #[tokio::test]
    async fn leaky_bucket_never_exceeds_capacity() {
        let store = MemoryStore::new();
        for i in 0..10 {
            let r = store
                .eval_leaky_bucket("u1", 5.0, 2.0, i as f64 * 0.01)
                .await
                .unwrap();
            if r.allowed {
                assert!(r.remaining <= 5.0);
            }
        }
    }

    #[tokio::test]
    async fn sliding_window_admits_up_to_capacity() {
        let store = MemoryStore::new();
        let clk = clock(0.0);

        for _ in 0..3 {
            let r = store
                .eval_sliding_window("u1", 3.0, 10.0, clk.now_secs())
                .await
                .unwrap();
            assert!(r.allowed);
        }

        let r = store
            .eval_sliding_window("u1", 3.0, 10.0, clk.now_secs())
            .await
            .unwrap();
        assert!(!r.allowed);
        assert_eq!(r.remaining, 3.0);
    }

    #[tokio::test]
    async fn sliding_window_evicts_old_events() {
        let store = MemoryStore::new();
        let clk = clock(0.0);

        let r = store
            .eval_sliding_window("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(r.allowed);
        let r = store
            .eval_sliding_window("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(r.allowed);
        let r = store
            .eval_sliding_window("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(!r.allowed);

        clk.advance(1.1);
        let r = store
            .eval_sliding_window("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(r.allowed);
        let r = store
            .eval_sliding_window("u1", 2.0, 1.0, clk.now_secs())
            .await
            .unwrap();
        assert!(r.allowed);
    }

    #[tokio::test]
    async fn isolation_between_subjects() {
        let store = MemoryStore::new();
        store.eval_token_bucket("a", 1.0, 1.0, 0.0).await.unwrap();
        let denied_a = store.eval_token_bucket("a", 1.0, 1.0, 0.0).await.unwrap();
        assert!(!denied_a.allowed);

        let allowed_b = store.eval_token_bucket("b", 1.0, 1.0, 0.0).await.unwrap();
        assert!(allowed_b.allowed);
    }
}
