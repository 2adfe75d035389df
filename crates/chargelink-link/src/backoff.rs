use std::time::Duration;

/// Exponential delay `initial * 2^attempt`, capped at `max`.
///
/// `attempt` is zero-based: the first retry waits `initial`.
pub fn exponential_delay(initial: Duration, attempt: u32, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(max)
}

/// Extra wait once `failures` consecutive reconnect rounds have failed.
///
/// Returns `None` below `threshold`; from there the wait doubles per further
/// failure, starting at `base` and never exceeding `cap`.
pub fn escalation_delay(
    failures: u32,
    threshold: u32,
    base: Duration,
    cap: Duration,
) -> Option<Duration> {
    if failures < threshold {
        return None;
    }
    Some(exponential_delay(base, failures - threshold, cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(exponential_delay(initial, 0, max), Duration::from_secs(1));
        assert_eq!(exponential_delay(initial, 1, max), Duration::from_secs(2));
        assert_eq!(exponential_delay(initial, 2, max), Duration::from_secs(4));
        assert_eq!(exponential_delay(initial, 5, max), Duration::from_secs(30));
    }

    #[test]
    fn huge_attempts_do_not_overflow() {
        let max = Duration::from_secs(30);
        assert_eq!(exponential_delay(Duration::from_secs(1), 400, max), max);
        assert_eq!(
            exponential_delay(Duration::from_millis(100), u32::MAX, max),
            max
        );
    }

    #[test]
    fn escalation_starts_at_threshold() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(300);
        assert_eq!(escalation_delay(9, 10, base, cap), None);
        assert_eq!(escalation_delay(10, 10, base, cap), Some(base));
        assert_eq!(
            escalation_delay(11, 10, base, cap),
            Some(Duration::from_secs(60))
        );
        assert_eq!(escalation_delay(14, 10, base, cap), Some(cap));
        assert_eq!(escalation_delay(60, 10, base, cap), Some(cap));
    }
}
