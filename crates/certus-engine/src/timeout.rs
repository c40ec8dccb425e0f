//! Deadline helpers shared by the loop and the verifier.

use std::time::{Duration, Instant};

pub(crate) fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => Instant::now() >= deadline,
        None => false,
    }
}

/// `0` means no limit.
pub(crate) fn overall_timeout_duration(timeout_secs: u64) -> Option<Duration> {
    if timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(timeout_secs))
    }
}

pub(crate) fn deadline_from_timeout_secs(timeout_secs: u64) -> Option<Instant> {
    overall_timeout_duration(timeout_secs).and_then(|t| Instant::now().checked_add(t))
}

pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Budget for one solver check: the per-check limit, cut short by the run deadline.
pub(crate) fn check_timeout(solver_timeout_secs: u64, deadline: Option<Instant>) -> Option<Duration> {
    match (overall_timeout_duration(solver_timeout_secs), remaining(deadline)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Whole seconds for backends that only take second granularity, never zero.
pub(crate) fn whole_secs_rounded_up(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    let rounded_up = if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    };
    rounded_up.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_exceeded_none_returns_false() {
        assert!(!deadline_exceeded(None));
    }

    #[test]
    fn deadline_exceeded_past_returns_true() {
        let past = Instant::now() - Duration::from_secs(1);
        assert!(deadline_exceeded(Some(past)));
        let future = Instant::now() + Duration::from_secs(60);
        assert!(!deadline_exceeded(Some(future)));
    }

    #[test]
    fn zero_timeout_means_no_deadline() {
        assert!(overall_timeout_duration(0).is_none());
        assert!(deadline_from_timeout_secs(0).is_none());
        assert_eq!(overall_timeout_duration(30), Some(Duration::from_secs(30)));
        assert!(deadline_from_timeout_secs(10).is_some_and(|d| d > Instant::now()));
    }

    #[test]
    fn check_timeout_takes_the_tighter_limit() {
        assert_eq!(check_timeout(0, None), None);
        assert_eq!(check_timeout(5, None), Some(Duration::from_secs(5)));
        let soon = Instant::now() + Duration::from_secs(2);
        let budget = check_timeout(60, Some(soon)).unwrap();
        assert!(budget <= Duration::from_secs(2));
        let past = Instant::now() - Duration::from_secs(1);
        assert_eq!(check_timeout(0, Some(past)), Some(Duration::ZERO));
    }

    #[test]
    fn whole_secs_round_up_and_never_hit_zero() {
        assert_eq!(whole_secs_rounded_up(Duration::from_millis(50)), 1);
        assert_eq!(whole_secs_rounded_up(Duration::from_secs(3)), 3);
        assert_eq!(whole_secs_rounded_up(Duration::from_millis(3001)), 4);
        assert_eq!(whole_secs_rounded_up(Duration::ZERO), 1);
    }
}
