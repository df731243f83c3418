use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds between two epoch-ms instants, saturating at zero.
pub fn secs_between(earlier_ms: u64, later_ms: u64) -> u64 {
    later_ms.saturating_sub(earlier_ms) / 1_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000, "clock should be past 2020");
    }

    #[test]
    fn secs_between_rounds_down_and_saturates() {
        assert_eq!(secs_between(1_000, 3_999), 2);
        assert_eq!(secs_between(5_000, 1_000), 0);
    }
}
