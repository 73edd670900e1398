//! Sampling policy for progress writes to the journal

use std::time::{Duration, Instant};

/// Default minimum time between two forwarded progress updates
pub const MIN_TIME_UPDATE: Duration = Duration::from_secs(5);
/// Default minimum percent jump that forces an update
pub const MIN_PERCENT_UPDATE: i64 = 10;

/// Decides whether a progress update is worth a journal write.
///
/// The baseline only moves when an update is emitted, so a run of small
/// steps still adds up to an emission once the total jump reaches
/// `min_percent`.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    min_interval: Duration,
    min_percent: i64,
    last: Option<(Instant, i64)>,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(MIN_TIME_UPDATE, MIN_PERCENT_UPDATE)
    }
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration, min_percent: i64) -> Self {
        Self {
            min_interval,
            min_percent,
            last: None,
        }
    }

    /// Returns true when enough time passed or the percent jumped far enough,
    /// and records `(now, percent)` as the new baseline in that case.
    pub fn should_emit(&mut self, percent: i64, now: Instant) -> bool {
        if let Some((last_time, last_percent)) = self.last {
            let elapsed = now.saturating_duration_since(last_time);
            if elapsed < self.min_interval && percent - last_percent < self.min_percent {
                return false;
            }
        }
        self.last = Some((now, percent));
        true
    }

    /// Percent of the last emitted update, if any
    pub fn last_percent(&self) -> Option<i64> {
        self.last.map(|(_, percent)| percent)
    }
}

/// Integer percent of `current` over `max`, clamped to 0..=100; `None` when the total is unknown.
pub fn percent_of(current: i64, max: i64) -> Option<i64> {
    if max <= 0 {
        return None;
    }
    let percent = (i128::from(current) * 100 / i128::from(max)).clamp(0, 100);
    i64::try_from(percent).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn first_update_always_emits() {
        let mut throttle = ProgressThrottle::default();
        assert!(throttle.should_emit(0, Instant::now()));
        assert_eq!(throttle.last_percent(), Some(0));
    }

    #[test]
    fn small_steps_are_suppressed_until_the_jump_accumulates() {
        let base = Instant::now();
        let mut throttle = ProgressThrottle::default();

        let emitted: Vec<bool> = [(0, 0), (5, 1), (9, 2), (20, 3)]
            .into_iter()
            .map(|(percent, secs)| throttle.should_emit(percent, at(base, secs)))
            .collect();

        assert_eq!(emitted, vec![true, false, false, true]);
        assert_eq!(throttle.last_percent(), Some(20));
    }

    #[test]
    fn elapsed_time_alone_emits() {
        let base = Instant::now();
        let mut throttle = ProgressThrottle::default();
        assert!(throttle.should_emit(10, base));
        assert!(!throttle.should_emit(11, at(base, 4)));
        assert!(throttle.should_emit(12, at(base, 5)));
    }

    #[test]
    fn every_ten_percent_jump_emits_without_elapsed_time() {
        let base = Instant::now();
        let mut throttle = ProgressThrottle::default();
        for percent in (0..=100).step_by(10) {
            assert!(throttle.should_emit(percent, base), "percent {}", percent);
        }
    }

    #[test]
    fn custom_thresholds_are_honoured() {
        let base = Instant::now();
        let mut throttle = ProgressThrottle::new(Duration::from_secs(1), 50);
        assert!(throttle.should_emit(0, base));
        assert!(!throttle.should_emit(49, base));
        assert!(throttle.should_emit(50, base));
        assert!(throttle.should_emit(51, at(base, 1)));
    }

    #[test]
    fn percent_of_guards_unknown_totals() {
        assert_eq!(percent_of(50, 0), None);
        assert_eq!(percent_of(50, -1), None);
        assert_eq!(percent_of(50, 200), Some(25));
        assert_eq!(percent_of(200, 200), Some(100));
        assert_eq!(percent_of(i64::MAX, i64::MAX), Some(100));
    }

    #[test]
    fn percent_of_stays_within_bounds() {
        assert_eq!(percent_of(-50, 100), Some(0));
        assert_eq!(percent_of(i64::MIN, 1), Some(0));
        assert_eq!(percent_of(300, 100), Some(100));
        assert_eq!(percent_of(i64::MAX, 1), Some(100));
    }
}
