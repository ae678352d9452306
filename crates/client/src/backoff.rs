//! Reconnection backoff policy.
//!
//! Deliberately a pure table lookup rather than multiplier state, so the
//! schedule is deterministic and unit-testable without touching a clock.

use std::time::Duration;

/// Retry delays in milliseconds, indexed by attempt. Attempts past the end of
/// the table keep the final delay; the schedule never grows unbounded and
/// never gives up.
const RETRY_DELAYS_MS: [u64; 5] = [1_500, 3_000, 6_000, 12_000, 30_000];

/// Delay to wait before reconnection attempt `attempt` (zero-based).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let index = (attempt as usize).min(RETRY_DELAYS_MS.len() - 1);
    Duration::from_millis(RETRY_DELAYS_MS[index])
}

/// Largest meaningful attempt index; the visible attempt counter is capped
/// here since every later attempt reuses the final delay.
pub fn max_attempt_index() -> u32 {
    (RETRY_DELAYS_MS.len() - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_are_monotonic_then_capped() {
        let mut previous = Duration::ZERO;
        for attempt in 0..16 {
            let delay = delay_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            previous = delay;
        }
        assert_eq!(
            delay_for_attempt(max_attempt_index()),
            delay_for_attempt(max_attempt_index() + 1)
        );
    }

    #[test]
    fn first_and_last_delays_match_the_table() {
        assert_eq!(delay_for_attempt(0), Duration::from_millis(1_500));
        assert_eq!(delay_for_attempt(1_000), Duration::from_millis(30_000));
    }
}
