//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Delay before polling attempt `attempt` (0-based; the first attempt runs
/// immediately).
///
/// `base_ms * 2^(attempt - 1)` plus up to 10% jitter, capped at `max_ms`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = (attempt - 1).min(63);
    let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(max_ms);

    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_has_no_delay() {
        assert_eq!(calculate_backoff(0, 100, 2000), Duration::ZERO);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let b1 = calculate_backoff(1, 100, 10_000).as_millis();
        assert!((100..110).contains(&b1));

        let b2 = calculate_backoff(2, 100, 10_000).as_millis();
        assert!((200..220).contains(&b2));

        let b4 = calculate_backoff(4, 100, 10_000).as_millis();
        assert!((800..880).contains(&b4));
    }

    #[test]
    fn test_backoff_never_exceeds_ceiling() {
        for attempt in 1..100 {
            assert!(calculate_backoff(attempt, 100, 1000) <= Duration::from_millis(1000));
        }
        assert_eq!(calculate_backoff(u32::MAX, 100, 1000), Duration::from_millis(1000));
    }
}
