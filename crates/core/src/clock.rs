//! Time sources.
//!
//! Persisted timestamps come from [`Clock::now`]; deadline arithmetic uses
//! [`Clock::monotonic_now`] so wall-clock jumps cannot expire or extend a dispatch.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// Abstraction over time sources, injectable for deterministic tests.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic instant for elapsed/timeout comparisons.
    fn monotonic_now(&self) -> Instant;
}

/// Production clock backed by the system time and `Instant::now`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.monotonic_now();
        let b = clock.monotonic_now();
        assert!(b >= a);
    }
}
