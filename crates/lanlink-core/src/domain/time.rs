//! Monotonic millisecond timestamps.
//!
//! All time-based behaviour in a session (broadcast interval, ping interval,
//! bookmark staleness, lag threshold) is sampled against a [`Clock`] supplied
//! by the host environment.  Timestamps are unsigned and every comparison
//! saturates, so a reading taken "before" another one (for example an echoed
//! stamp from a confused peer) yields a zero duration instead of wrapping.

use std::time::Duration;

/// A reading of a monotonic millisecond clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Millis(pub u64);

impl Millis {
    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_since(self, earlier: Millis) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Returns `true` once at least `interval` has passed since `since`.
    pub fn has_elapsed(self, since: Millis, interval: Duration) -> bool {
        self.saturating_since(since) >= interval
    }
}

/// Source of monotonic time.
pub trait Clock {
    /// Returns the current reading.
    fn now(&self) -> Millis;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_since_never_underflows() {
        assert_eq!(Millis(100).saturating_since(Millis(250)), Duration::ZERO);
    }

    #[test]
    fn test_saturating_since_measures_forward_gap() {
        assert_eq!(
            Millis(1_750).saturating_since(Millis(350)),
            Duration::from_millis(1_400)
        );
    }

    #[test]
    fn test_has_elapsed_is_inclusive() {
        let start = Millis(1_000);
        assert!(!Millis(1_349).has_elapsed(start, Duration::from_millis(350)));
        assert!(Millis(1_350).has_elapsed(start, Duration::from_millis(350)));
    }
}
