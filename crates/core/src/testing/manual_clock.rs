//! Manually advanced clock for deterministic timeout tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::Clock;

#[derive(Debug)]
struct ManualTime {
    wall: DateTime<Utc>,
    base: Instant,
    elapsed: Duration,
}

/// Clock that only moves when told to.
///
/// Wall time and monotonic time advance together.
#[derive(Debug)]
pub struct ManualClock {
    time: Mutex<ManualTime>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(ManualTime {
                wall: start,
                base: Instant::now(),
                elapsed: Duration::ZERO,
            }),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().unwrap();
        time.elapsed += by;
        if let Ok(delta) = chrono::Duration::from_std(by) {
            time.wall += delta;
        }
    }

    /// Time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.time.lock().unwrap().elapsed
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.time.lock().unwrap().wall
    }

    fn monotonic_now(&self) -> Instant {
        let time = self.time.lock().unwrap();
        time.base + time.elapsed
    }
}
