//! The decision engine: validates inputs, captures a single time reading,
//! and delegates to a [`Store`] script for each algorithm.
//!
//! A deny is not an error — it is an ordinary [`DecisionEnvelope`] with
//! `allowed: false`, carried all the way out to the HTTP surface as a normal
//! value rather than unwound as a failure.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{DeciderError, Result};
use crate::store::Store;

/// The outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionEnvelope {
    /// Whether the unit of work was admitted.
    pub allowed: bool,
    /// Remaining headroom against `capacity`: tokens left for token bucket,
    /// `max(0, capacity - water_level)` for leaky bucket, `capacity - count`
    /// for sliding window.
    pub remaining: f64,
}

/// Validates requests and runs them against a [`Store`] backend.
///
/// Generic over the store backend and, independently, over the clock — the
/// default `SystemClock` is what every caller outside of tests wants, but
/// swapping in a `FakeClock` lets tests drive refill/leak/eviction timing
/// deterministically instead of sleeping on a real clock.
#[derive(Debug, Clone)]
pub struct DecisionEngine<S: Store, C: Clock = SystemClock> {
    store: S,
    clock: C,
}

impl<S: Store> DecisionEngine<S, SystemClock> {
    /// Create a new decision engine backed by `store`, using the real system
    /// clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: SystemClock,
        }
    }
}

impl<S: Store, C: Clock> DecisionEngine<S, C> {
    /// Create a new decision engine with an explicit clock, for tests.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Check and consume one unit against a token bucket for `subject`.
    ///
    /// `capacity` is the bucket size in tokens; `refill_rate` is tokens
    /// added per second. Both must be positive.
    pub async fn decide_token_bucket(
        &self,
        subject: &str,
        capacity: f64,
        refill_rate: f64,
    ) -> Result<DecisionEnvelope> {
        validate_subject(subject)?;
        validate_capacity(capacity)?;
        validate_rate(refill_rate, "refill_rate")?;

        let now = self.clock.now_secs();
        let result = self
            .store
            .eval_token_bucket(subject, capacity, refill_rate, now)
            .await?;

        debug!(
            subject,
            capacity,
            refill_rate,
            allowed = result.allowed,
            remaining = result.remaining,
            "decision.token_bucket"
        );

        Ok(DecisionEnvelope {
            allowed: result.allowed,
            remaining: result.remaining,
        })
    }

    /// Check and admit one unit into a leaky bucket for `subject`.
    ///
    /// `capacity` is the bucket size in units of water; `leak_rate` is units
    /// drained per second. Both must be positive.
    pub async fn decide_leaky_bucket(
        &self,
        subject: &str,
        capacity: f64,
        leak_rate: f64,
    ) -> Result<DecisionEnvelope> {
        validate_subject(subject)?;
        validate_capacity(capacity)?;
        validate_rate(leak_rate, "leak_rate")?;

        let now = self.clock.now_secs();
        let result = self
            .store
            .eval_leaky_bucket(subject, capacity, leak_rate, now)
            .await?;

        // The store returns the raw water_level; the public contract wants
        // remaining headroom against capacity (spec.md §4.1).
        let remaining = (capacity - result.remaining).max(0.0);
        debug!(
            subject,
            capacity,
            leak_rate,
            allowed = result.allowed,
            remaining,
            "decision.leaky_bucket"
        );

        Ok(DecisionEnvelope {
            allowed: result.allowed,
            remaining,
        })
    }

    /// Check and admit one event into a sliding window for `subject`.
    ///
    /// `capacity` is the maximum number of events allowed within
    /// `window_size` seconds. Both must be positive.
    pub async fn decide_sliding_window(
        &self,
        subject: &str,
        capacity: f64,
        window_size: f64,
    ) -> Result<DecisionEnvelope> {
        validate_subject(subject)?;
        validate_capacity(capacity)?;
        validate_rate(window_size, "window_size")?;

        let now = self.clock.now_secs();
        let result = self
            .store
            .eval_sliding_window(subject, capacity, window_size, now)
            .await?;

        // The store returns the raw event count; the public contract wants
        // remaining headroom against capacity (spec.md §4.1).
        let remaining = (capacity - result.remaining).max(0.0);
        debug!(
            subject,
            capacity,
            window_size,
            allowed = result.allowed,
            remaining,
            "decision.sliding_window"
        );

        Ok(DecisionEnvelope {
            allowed: result.allowed,
            remaining,
        })
    }
}

fn validate_subject(subject: &str) -> Result<()> {
    if subject.trim().is_empty() {
        return Err(DeciderError::BadRequest("subject must not be empty".into()));
    }
    Ok(())
}

fn validate_capacity(capacity: f64) -> Result<()> {
    if !capacity.is_finite() || capacity < 1.0 || capacity.fract() != 0.0 {
        return Err(DeciderError::BadRequest(
            "capacity must be an integer >= 1".into(),
        ));
    }
    Ok(())
}

fn validate_rate(rate: f64, field: &str) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(DeciderError::BadRequest(format!(
            "{field} must be a finite number > 0"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::store::MemoryStore;

    fn engine(start: f64) -> DecisionEngine<MemoryStore, FakeClock> {
        DecisionEngine::with_clock(MemoryStore::new(), FakeClock::new(start))
    }

    #[tokio::test]
    async fn token_bucket_allows_then_denies() {
        let engine = engine(0.0);

        let first = engine
            .decide_token_bucket("user:1", 2.0, 1.0)
            .await
            .unwrap();
        assert!(first.allowed);

        let second = engine
            .decide_token_bucket("user:1", 2.0, 1.0)
            .await
            .unwrap();
        assert!(second.allowed);

        let third = engine
            .decide_token_bucket("user:1", 2.0, 1.0)
            .await
            .unwrap();
        assert!(!third.allowed);
    }

    #[tokio::test]
    async fn rejects_empty_subject() {
        let engine = engine(0.0);
        let err = engine
            .decide_token_bucket("", 2.0, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeciderError::BadRequest(_)));
    }

    #[tokio::test]
    async fn rejects_sub_unit_capacity() {
        let engine = engine(0.0);
        let err = engine
            .decide_leaky_bucket("user:1", 0.5, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeciderError::BadRequest(_)));
    }

    #[tokio::test]
    async fn rejects_fractional_capacity() {
        let engine = engine(0.0);
        let err = engine
            .decide_token_bucket("user:1", 2.5, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeciderError::BadRequest(_)));
    }

    #[tokio::test]
    async fn leaky_bucket_remaining_is_headroom_against_capacity() {
        let engine = engine(0.0);
        let decision = engine
            .decide_leaky_bucket("user:1", 10.0, 2.0)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9.0);
    }

    #[tokio::test]
    async fn sliding_window_remaining_is_headroom_against_capacity() {
        let engine = engine(0.0);

        for expected_remaining in [2.0, 1.0, 0.0] {
            let decision = engine
                .decide_sliding_window("user:1", 3.0, 10.0)
                .await
                .unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = engine
            .decide_sliding_window("user:1", 3.0, 10.0)
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0.0);
    }

    #[tokio::test]
    async fn rejects_non_positive_rate() {
        let engine = engine(0.0);
        let err = engine
            .decide_sliding_window("user:1", 5.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, DeciderError::BadRequest(_)));
    }

    #[tokio::test]
    async fn sliding_window_respects_fake_clock_advance() {
        let engine = engine(0.0);

        for _ in 0..2 {
            let r = engine
                .decide_sliding_window("user:1", 2.0, 1.0)
                .await
                .unwrap();
            assert!(r.allowed);
        }

        let denied = engine
            .decide_sliding_window("user:1", 2.0, 1.0)
            .await
            .unwrap();
        assert!(!denied.allowed);
    }
}
