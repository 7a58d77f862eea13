//! Time budget helpers for the minimum-execution-time policy.

use std::time::Duration;

/// Time still owed toward `min_time`, or `None` once it has been reached.
///
/// A zero `min_time` means "no minimum" and never owes anything.
pub fn remaining_min_time(min_time: Duration, elapsed: Duration) -> Option<Duration> {
    if min_time.is_zero() {
        return None;
    }
    let remaining = min_time.saturating_sub(elapsed);
    (!remaining.is_zero()).then_some(remaining)
}

/// Per-round timeout: none without an outstanding minimum, otherwise the
/// remaining time plus `buffer`.
pub fn round_timeout(min_time: Duration, elapsed: Duration, buffer: Duration) -> Option<Duration> {
    remaining_min_time(min_time, elapsed).map(|remaining| remaining + buffer)
}
