//! Engine clock and timestamps
//!
//! All timing in the engine is measured against one monotonic epoch fixed
//! when the [`Device`](crate::Device) is built. Trigger expiries are
//! programmed in nanoseconds on this clock and block timestamps are read
//! from it, so programmed and recorded instants are directly comparable.
//!
//! The clock is built on `tokio::time::Instant`, which means tests running
//! under a paused runtime get fully deterministic firing times.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Nanoseconds per second
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// A point in engine time: whole seconds plus nanosecond ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeSpec {
    /// Seconds since the engine epoch
    pub secs: u64,
    /// Nanoseconds within the current second (< 10⁹)
    pub ticks: u32,
}

impl TimeSpec {
    /// Builds a timestamp from nanoseconds since the engine epoch
    pub fn from_ns(ns: u64) -> Self {
        Self {
            secs: ns / NSEC_PER_SEC,
            ticks: (ns % NSEC_PER_SEC) as u32,
        }
    }

    /// Total nanoseconds since the engine epoch
    pub fn as_ns(&self) -> u64 {
        self.secs * NSEC_PER_SEC + u64::from(self.ticks)
    }
}

/// Monotonic clock anchored at device construction
#[derive(Debug, Clone)]
pub struct DaqClock {
    epoch: Instant,
}

impl DaqClock {
    /// Starts a clock with the epoch at the current instant
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the epoch
    pub fn now_ns(&self) -> u64 {
        // u64 nanoseconds cover ~584 years of engine uptime
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Current engine time as a timestamp
    pub fn now(&self) -> TimeSpec {
        TimeSpec::from_ns(self.now_ns())
    }

    /// The instant at which `ns` nanoseconds of engine time will have elapsed
    pub fn instant_at(&self, ns: u64) -> Instant {
        self.epoch + Duration::from_nanos(ns)
    }
}

impl Default for DaqClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timespec_round_trip() {
        let ts = TimeSpec::from_ns(3 * NSEC_PER_SEC + 250_000_000);
        assert_eq!(ts.secs, 3);
        assert_eq!(ts.ticks, 250_000_000);
        assert_eq!(ts.as_ns(), 3_250_000_000);
    }

    #[test]
    fn timespec_sub_second() {
        let ts = TimeSpec::from_ns(999_999_999);
        assert_eq!(ts.secs, 0);
        assert_eq!(ts.ticks, 999_999_999);
    }

    #[test]
    fn timespec_ordering_follows_ns() {
        let a = TimeSpec::from_ns(1_000_000_000);
        let b = TimeSpec::from_ns(999_999_999);
        assert!(a > b);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_tracks_virtual_time() {
        let clock = DaqClock::new();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let ts = clock.now();
        assert_eq!(ts.secs, 1);
        assert_eq!(ts.ticks, 500_000_000);
    }
}
