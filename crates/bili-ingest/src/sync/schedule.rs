//! Inter-creator pacing.

use std::time::Duration;

/// Delay before the creator after `completed` of `total`.
///
/// Caution grows with progress: the base for the first 30% of the roster,
/// then ×1.5 up to 60%, ×2 up to 80% and ×3 for the remainder.
pub fn inter_creator_delay(base: Duration, completed: usize, total: usize) -> Duration {
    if total == 0 {
        return base;
    }
    let progress = completed as f64 / total as f64;
    let factor = if progress <= 0.3 {
        1.0
    } else if progress <= 0.6 {
        1.5
    } else if progress <= 0.8 {
        2.0
    } else {
        3.0
    };
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 10, 5000)]
    #[case(3, 10, 5000)]
    #[case(4, 10, 7500)]
    #[case(6, 10, 7500)]
    #[case(7, 10, 10_000)]
    #[case(8, 10, 10_000)]
    #[case(9, 10, 15_000)]
    fn test_delay_by_progress(#[case] completed: usize, #[case] total: usize, #[case] expected_ms: u64) {
        let delay = inter_creator_delay(Duration::from_millis(5000), completed, total);
        assert_eq!(delay, Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_huge_base_saturates() {
        let delay = inter_creator_delay(Duration::from_millis(u64::MAX), 10, 10);
        assert_eq!(delay, Duration::MAX);
    }

    #[test]
    fn test_delay_is_monotonic() {
        let base = Duration::from_millis(1000);
        let delays: Vec<_> = (1..=20).map(|i| inter_creator_delay(base, i, 20)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }
}
