//! Time source abstraction
//!
//! All ban bookkeeping uses unix seconds. Components take a `Clock` so tests
//! can pin and advance time deterministically.

/// Source of the current unix timestamp (seconds)
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
