//! Pure alarm/interval arithmetic over epoch-second timestamps.
//!
//! Every function here is total: no panics, no division by zero special-casing
//! beyond the documented `m == 0` behaviour, and no reliance on wall-clock time.

/// Guard window, in seconds, between programming an alarm and the earliest
/// moment it is allowed to fire. Must be large enough for the orchestrator to
/// finish writing persistent state and enter deep sleep before the RTC fires.
pub const ALARM_THRESHOLD: u32 = 2;

/// Sampling intervals a server is allowed to hand out, in minutes.
pub const ALLOWED_INTERVALS_MIN: [u16; 7] = [1, 2, 5, 10, 15, 20, 30];

/// Smallest multiple of `m` that is `>= n`.
///
/// `round_up(n, 0) == n` (there is no meaningful multiple of zero, so the
/// input passes through unchanged rather than panicking).
pub fn round_up(n: u32, m: u32) -> u32 {
    if m == 0 {
        return n;
    }
    let remainder = n % m;
    if remainder == 0 {
        n
    } else {
        n + (m - remainder)
    }
}

/// Next wall-clock instant strictly greater than `now` that is a multiple of
/// `interval_s`, advanced by one further interval if it would land within
/// `guard_s` of `now`.
pub fn next_aligned(now: u32, interval_s: u32, guard_s: u32) -> u32 {
    if interval_s == 0 {
        return now;
    }

    let mut candidate = round_up(now + 1, interval_s);
    if candidate.saturating_sub(now) <= guard_s {
        candidate += interval_s;
    }
    candidate
}

/// Like [`next_aligned`] but first snaps `now` to the start of the next
/// minute, so the very first observation of a session lands on a whole-minute
/// boundary the same way every later one does.
pub fn first_aligned(now: u32, interval_s: u32, guard_s: u32) -> u32 {
    let start_of_next_minute = now + (60 - now % 60);
    let aligned = round_up(start_of_next_minute, interval_s);

    if aligned.saturating_sub(now) <= guard_s {
        aligned + interval_s
    } else {
        aligned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_up_examples() {
        assert_eq!(round_up(0, 5), 0);
        assert_eq!(round_up(1, 5), 5);
        assert_eq!(round_up(5, 5), 5);
        assert_eq!(round_up(6, 5), 10);
        assert_eq!(round_up(7, 0), 7);
    }

    #[test]
    fn s1_first_alarm_alignment() {
        // 2024-06-01 10:03:41Z as epoch seconds.
        let now = 1_717_236_221;
        let interval_s = 5 * 60;
        let first = first_aligned(now, interval_s, ALARM_THRESHOLD);
        // 2024-06-01 10:05:00Z
        assert_eq!(first, 1_717_236_300);
    }

    #[test]
    fn s2_first_alarm_guard_skip() {
        // 2024-06-01 10:04:59Z
        let now = 1_717_236_299;
        let interval_s = 5 * 60;
        let first = first_aligned(now, interval_s, 2);
        // 10:05:00 is 1s away (within guard=2), so it advances to 10:10:00.
        assert_eq!(first, 1_717_236_600);
    }

    proptest! {
        #[test]
        fn prop_round_up_total(n in 0u32..u32::MAX / 2, m in 1u32..10_000) {
            let r = round_up(n, m);
            prop_assert_eq!(r % m, 0);
            prop_assert!(r - n < m);
        }

        #[test]
        fn prop_next_aligned_clears_guard(
            now in 0u32..1_000_000_000,
            interval_s in 3u32..3600,
            guard_s in 1u32..2,
        ) {
            // interval_s > guard_s is required by the invariant.
            let next = next_aligned(now, interval_s, guard_s);
            prop_assert!(next - now > guard_s);
            prop_assert_eq!(next % interval_s, 0);
        }
    }
}
