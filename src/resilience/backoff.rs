//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Largest exponent applied; beyond it every delay is already capped.
const MAX_EXPONENT: u32 = 32;

/// Delay after the failed attempt number `attempt` (0-based):
/// `min(base * 2^attempt, max)`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    if base_ms == 0 {
        return Duration::ZERO;
    }

    let exponential = 1u64 << attempt.min(MAX_EXPONENT);
    let delay_ms = base_ms.saturating_mul(exponential);
    Duration::from_millis(delay_ms).min(max)
}

/// Add 0 to 10% random jitter to `delay`.
pub fn apply_jitter(delay: Duration) -> Duration {
    let delay_ms = delay.as_millis() as u64;
    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const MAX: Duration = Duration::from_millis(1000);

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(0, BASE, MAX), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, BASE, MAX), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, BASE, MAX), Duration::from_millis(800));
        assert_eq!(calculate_backoff(4, BASE, MAX), MAX);
        assert_eq!(calculate_backoff(u32::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn test_zero_base_is_immediate() {
        assert_eq!(calculate_backoff(5, Duration::ZERO, MAX), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = apply_jitter(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(1000));
            assert!(d < Duration::from_millis(1100));
        }
        assert_eq!(apply_jitter(Duration::from_millis(5)), Duration::from_millis(5));
    }
}
