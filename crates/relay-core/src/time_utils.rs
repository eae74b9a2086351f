use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch; 0 if the clock is before it.
pub fn current_unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| saturating_millis(elapsed.as_millis()))
        .unwrap_or(0)
}

/// Milliseconds elapsed since `since` on the monotonic clock.
pub fn elapsed_ms(since: Instant) -> u64 {
    saturating_millis(Instant::now().saturating_duration_since(since).as_millis())
}

fn saturating_millis(millis: u128) -> u64 {
    u64::try_from(millis).unwrap_or(u64::MAX)
}
