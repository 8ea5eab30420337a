//! Time sources for the decision engine.
//!
//! `spec.md` §4.1 requires the decider to read a real-valued wall-clock
//! seconds measurement once per call and pass it into the store untouched;
//! the store never reads its own clock. Making the clock an injectable trait
//! (rather than calling `SystemTime::now()` directly from the algorithms)
//! lets tests exercise refill/leak/eviction timing deterministically instead
//! of sleeping on a wall clock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A source of wall-clock seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch, as a real number.
    fn now_secs(&self) -> f64;
}

/// The real system clock, backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs_f64()
    }
}

/// A clock that only advances when told to, for deterministic tests.
///
/// Mirrors the `FakeClock` pattern used by generic rate-limiting crates: a
/// shared mutable "now" that tests can move forward explicitly instead of
/// sleeping on a real clock.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now: Arc<Mutex<f64>>,
}

impl FakeClock {
    /// Create a fake clock starting at the given time.
    pub fn new(start_secs: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start_secs)),
        }
    }

    /// Move the clock forward by `secs` seconds.
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    /// Move the clock backward by `secs` seconds (to exercise clock-skew
    /// tolerance in the algorithms).
    pub fn rewind(&self, secs: f64) {
        *self.now.lock() -= secs;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> f64 {
        *self.now.lock()
    }
}
