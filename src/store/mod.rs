//! Store backend trait and implementations.
//!
//! This module defines the [`Store`] trait every backend must implement: one
//! atomic scripted operation per algorithm, each reading prior state for a
//! key, advancing it using the caller-supplied `now`, deciding allow/deny,
//! writing back, and returning `(allowed, remaining)` — `spec.md` §2's
//! "Algorithm Scripts" component folded directly into the trait the "Store
//! Client" component exposes, rather than a single generic
//! `eval(script, keys, args)` entry point: Rust's type system can check each
//! script's argument and result shape at compile time, so there is no value
//! in stringly-typed dispatch the way a Lua client library needs one.
//!
//! All operations must execute as a single atomic unit at the store — no
//! implementation may split a script into a client-side read, a local
//! computation, and a separate write, since two concurrent callers racing
//! across those steps would lose an update (`spec.md` §9).

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisStore};

use std::future::Future;

use crate::error::Result;

/// The outcome of one scripted call: whether the unit of work was admitted,
/// and the bucket's resulting `remaining` figure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptResult {
    /// Whether the call was admitted.
    pub allowed: bool,
    /// The algorithm-specific "remaining" figure the script returned.
    pub remaining: f64,
}

impl ScriptResult {
    /// Construct an admitted result.
    pub fn allow(remaining: f64) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    /// Construct a denied result.
    pub fn deny(remaining: f64) -> Self {
        Self {
            allowed: false,
            remaining,
        }
    }
}

/// Atomic scripting facility against a keyed hash/sorted-set store.
///
/// Implementations must be safe to call concurrently for the same key from
/// the same process and from distinct processes; the store's own scripting
/// engine is what provides that guarantee, not anything client-side.
pub trait Store: Send + Sync + 'static {
    /// Run the token bucket script (`spec.md` §4.2) against key `tb:<subject>`.
    fn eval_token_bucket(
        &self,
        subject: &str,
        capacity: f64,
        refill_rate: f64,
        now: f64,
    ) -> impl Future<Output = Result<ScriptResult>> + Send;

    /// Run the leaky bucket script (`spec.md` §4.3) against key `lb:<subject>`.
    fn eval_leaky_bucket(
        &self,
        subject: &str,
        capacity: f64,
        leak_rate: f64,
        now: f64,
    ) -> impl Future<Output = Result<ScriptResult>> + Send;

    /// Run the sliding window script (`spec.md` §4.4) against key `sw:<subject>`.
    fn eval_sliding_window(
        &self,
        subject: &str,
        capacity: f64,
        window_size: f64,
        now: f64,
    ) -> impl Future<Output = Result<ScriptResult>> + Send;
}

impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    async fn eval_token_bucket(
        &self,
        subject: &str,
        capacity: f64,
        refill_rate: f64,
        now: f64,
    ) -> Result<ScriptResult> {
        (**self).eval_token_bucket(subject, capacity, refill_rate, now).await
    }

    async fn eval_leaky_bucket(
        &self,
        subject: &str,
        capacity: f64,
        leak_rate: f64,
        now: f64,
    ) -> Result<ScriptResult> {
        (**self).eval_leaky_bucket(subject, capacity, leak_rate, now).await
    }

    async fn eval_sliding_window(
        &self,
        subject: &str,
        capacity: f64,
        window_size: f64,
        now: f64,
    ) -> Result<ScriptResult> {
        (**self)
            .eval_sliding_window(subject, capacity, window_size, now)
            .await
    }
}
