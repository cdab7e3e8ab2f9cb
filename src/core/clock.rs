//! Timestamp source for session events
//!
//! Provides absolute UTC wall-clock strings and relative elapsed milliseconds
//! measured from a resettable baseline.

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Source of timestamps for logged events
pub trait TimeSource: Send + Sync {
    /// Current UTC time as `YYYY-MM-DDThh:mm:ss.sssZ`
    fn absolute_time(&self) -> String;

    /// Milliseconds since construction or the last reset
    fn relative_millis(&self) -> u64;

    /// Rebase the relative origin to now
    fn reset_relative(&self);
}

/// Wall clock plus a resettable monotonic baseline
#[derive(Debug)]
pub struct Clock {
    baseline: RwLock<Instant>,
}

static SHARED: OnceLock<Arc<Clock>> = OnceLock::new();

impl Clock {
    /// Create an independent clock with its baseline at now
    pub fn new() -> Self {
        Self {
            baseline: RwLock::new(Instant::now()),
        }
    }

    /// Process-wide clock, created on first access
    ///
    /// Every call returns the same instance. Prefer passing the returned `Arc`
    /// down explicitly over calling this from deep inside other components.
    pub fn shared() -> Arc<Clock> {
        SHARED.get_or_init(|| Arc::new(Clock::new())).clone()
    }

    /// Elapsed time since the baseline
    pub fn elapsed(&self) -> Duration {
        self.baseline.read().elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for Clock {
    fn absolute_time(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn relative_millis(&self) -> u64 {
        u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn reset_relative(&self) {
        *self.baseline.write() = Instant::now();
    }
}
