/*!
 * Timeout Conversion
 *
 * Maps the scheduler's nanosecond timeouts onto poll(2)'s milliseconds.
 */

use crate::core::limits::{NANOS_PER_MILLI, POLL_TIMEOUT_CAP_NANOS};

/// Convert a nanosecond timeout to a poll(2) timeout
///
/// - `ns < 0`: block indefinitely (-1)
/// - `ns == 0`: return immediately (0)
/// - `0 < ns < 1ms`: 1ms, never rounded down to a busy loop
/// - huge requests: capped at `max_ms`
pub fn poll_timeout_ms(ns: i64, max_ms: i32) -> libc::c_int {
    if ns < 0 {
        -1
    } else if ns == 0 {
        0
    } else if ns < NANOS_PER_MILLI {
        1
    } else if ns < POLL_TIMEOUT_CAP_NANOS {
        (ns / NANOS_PER_MILLI).min(i64::from(max_ms)) as libc::c_int
    } else {
        max_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limits::DEFAULT_MAX_POLL_TIMEOUT_MS;

    const MAX: i32 = DEFAULT_MAX_POLL_TIMEOUT_MS;

    #[test]
    fn test_blocking_and_immediate() {
        assert_eq!(poll_timeout_ms(-1, MAX), -1);
        assert_eq!(poll_timeout_ms(i64::MIN, MAX), -1);
        assert_eq!(poll_timeout_ms(0, MAX), 0);
    }

    #[test]
    fn test_small_values_round_up() {
        assert_eq!(poll_timeout_ms(1, MAX), 1);
        assert_eq!(poll_timeout_ms(999_999, MAX), 1);
        assert_eq!(poll_timeout_ms(1_000_000, MAX), 1);
        assert_eq!(poll_timeout_ms(2_500_000, MAX), 2);
    }

    #[test]
    fn test_large_values_are_capped() {
        assert_eq!(poll_timeout_ms(i64::MAX, MAX), MAX);
        assert_eq!(poll_timeout_ms(POLL_TIMEOUT_CAP_NANOS, MAX), MAX);
        assert_eq!(poll_timeout_ms(POLL_TIMEOUT_CAP_NANOS - 1, MAX), 999_999_999);
        assert_eq!(poll_timeout_ms(10_000_000_000, 500), 500);
    }
}
