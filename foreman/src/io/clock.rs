//! Clock port for wall time and sleeping.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Provides the current time and a way to wait.
///
/// Time-dependent policy (minimum execution time, retry pacing, loop
/// intervals) goes through this trait so tests can substitute a manual clock.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);

    /// Time elapsed since `since`, clamped at zero.
    fn elapsed_since(&self, since: DateTime<Utc>) -> Duration {
        (self.now() - since).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Clock backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
