//! Ring of per-second event counters.
//!
//! Buckets are indexed by the wall-clock second of minute modulo the
//! ring length, so a slot is reused once per wrap and must be checked
//! for staleness before every write and every read. All state in here
//! is owned by the metric's aggregator task; nothing is synchronized.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Whole seconds since the Unix epoch; zero on a pre-epoch clock.
pub(crate) fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Event counts for a single one-second unit of the window.
#[derive(Debug, Clone)]
struct UnitCounter {
    success: u64,
    timeout: u64,
    failure: u64,
    fallback_success: u64,
    fallback_failure: u64,
    /// Wall-clock time of the most recent write into this unit.
    last_record: SystemTime,
}

impl UnitCounter {
    fn new(t: SystemTime) -> Self {
        Self {
            success: 0,
            timeout: 0,
            failure: 0,
            fallback_success: 0,
            fallback_failure: 0,
            last_record: t,
        }
    }
}

/// Snapshot of the window totals plus derived rates and last-event times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSummary {
    pub success: u64,
    pub timeout: u64,
    pub failure: u64,
    pub fallback_success: u64,
    pub fallback_failure: u64,

    /// `success + failure` over the window. Timeouts are counted into
    /// `failure` at record time, so they are part of the total.
    pub total: u64,
    /// `100 * failure / total`; zero when the window is empty.
    pub error_percentage: f64,

    pub last_execute: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_timeout: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
    pub last_reset: Option<SystemTime>,
}

/// The counter ring. Owned exclusively by one aggregator task.
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    time_window: Duration,
    units: Vec<Option<UnitCounter>>,

    last_execute: Option<SystemTime>,
    last_success: Option<SystemTime>,
    last_timeout: Option<SystemTime>,
    last_failure: Option<SystemTime>,
    last_reset: Option<SystemTime>,
}

impl SlidingWindow {
    /// `time_window` must already be validated to whole seconds in
    /// `[1s, 60s]`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(time_window: Duration) -> Self {
        let slots = time_window.as_secs() as usize;
        Self {
            time_window,
            units: vec![None; slots],
            last_execute: None,
            last_success: None,
            last_timeout: None,
            last_failure: None,
            last_reset: None,
        }
    }

    pub fn record_success(&mut self, t: SystemTime) {
        self.last_execute = Some(t);
        self.last_success = Some(t);
        self.unit_at(t).success += 1;
    }

    /// A timeout is also a failure; both counters move.
    pub fn record_timeout(&mut self, t: SystemTime) {
        self.last_execute = Some(t);
        self.last_timeout = Some(t);
        let unit = self.unit_at(t);
        unit.timeout += 1;
        unit.failure += 1;
    }

    pub fn record_failure(&mut self, t: SystemTime) {
        self.last_execute = Some(t);
        self.last_failure = Some(t);
        self.unit_at(t).failure += 1;
    }

    pub fn record_fallback_success(&mut self, t: SystemTime) {
        self.last_execute = Some(t);
        self.unit_at(t).fallback_success += 1;
    }

    pub fn record_fallback_failure(&mut self, t: SystemTime) {
        self.last_execute = Some(t);
        self.unit_at(t).fallback_failure += 1;
    }

    pub fn reset(&mut self, t: SystemTime) {
        self.last_reset = Some(t);
        for unit in &mut self.units {
            *unit = None;
        }
    }

    /// Sum every unit still inside the window into a summary.
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self, now: SystemTime) -> MetricSummary {
        let mut summary = MetricSummary {
            last_execute: self.last_execute,
            last_success: self.last_success,
            last_timeout: self.last_timeout,
            last_failure: self.last_failure,
            last_reset: self.last_reset,
            ..MetricSummary::default()
        };

        for unit in self.units.iter().flatten() {
            // Slots are reused in place, so age is checked per unit.
            let age = now.duration_since(unit.last_record).unwrap_or_default();
            if age > self.time_window {
                continue;
            }
            summary.success += unit.success;
            summary.timeout += unit.timeout;
            summary.failure += unit.failure;
            summary.fallback_success += unit.fallback_success;
            summary.fallback_failure += unit.fallback_failure;
        }

        summary.total = summary.success + summary.failure;
        if summary.total > 0 {
            summary.error_percentage = summary.failure as f64 / summary.total as f64 * 100.0;
        }
        summary
    }

    /// The unit for `t`, zeroed first if its slot held an older second.
    #[allow(clippy::cast_possible_truncation)]
    fn unit_at(&mut self, t: SystemTime) -> &mut UnitCounter {
        let secs = unix_seconds(t);
        let index = (secs % 60) as usize % self.units.len();

        let unit = self.units[index].get_or_insert_with(|| UnitCounter::new(t));
        if unix_seconds(unit.last_record) != secs {
            *unit = UnitCounter::new(t);
        }
        unit.last_record = t;
        unit
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Divisible by 60, so the base second lands in slot zero.
    const BASE_SECS: u64 = 1_700_000_040;

    fn at(offset_secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(BASE_SECS + offset_secs)
    }

    #[test]
    fn test_timeout_counts_into_failure() {
        let mut window = SlidingWindow::new(Duration::from_secs(5));
        window.record_timeout(at(0));
        window.record_failure(at(0));

        let summary = window.snapshot(at(0));
        assert_eq!(summary.timeout, 1);
        assert_eq!(summary.failure, 2);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.last_timeout, Some(at(0)));
        assert_eq!(summary.last_failure, Some(at(0)));
    }

    #[test]
    fn test_empty_window_has_zero_error_percentage() {
        let window = SlidingWindow::new(Duration::from_secs(5));
        let summary = window.snapshot(at(0));
        assert_eq!(summary.total, 0);
        assert!(summary.error_percentage.abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_percentage() {
        let mut window = SlidingWindow::new(Duration::from_secs(5));
        for _ in 0..3 {
            window.record_success(at(0));
        }
        window.record_failure(at(0));

        let summary = window.snapshot(at(0));
        assert_eq!(summary.total, 4);
        assert!((summary.error_percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_slot_reuse_zeroes_the_older_second() {
        let mut window = SlidingWindow::new(Duration::from_secs(5));
        window.record_success(at(0));
        // Five seconds later the same slot comes around again.
        window.record_failure(at(5));

        let summary = window.snapshot(at(5));
        assert_eq!(summary.success, 0);
        assert_eq!(summary.failure, 1);
    }

    #[test]
    fn test_units_outside_window_are_skipped() {
        let mut window = SlidingWindow::new(Duration::from_secs(3));
        window.record_success(at(0));

        assert_eq!(window.snapshot(at(3)).success, 1);
        let summary = window.snapshot(at(4));
        assert_eq!(summary.success, 0);
        // Last-event times survive the decay.
        assert_eq!(summary.last_success, Some(at(0)));
    }

    #[test]
    fn test_events_spread_over_multiple_slots() {
        let mut window = SlidingWindow::new(Duration::from_secs(5));
        window.record_success(at(0));
        window.record_success(at(1));
        window.record_success(at(2));

        assert_eq!(window.snapshot(at(2)).success, 3);
    }

    #[test]
    fn test_fallback_events_touch_only_last_execute() {
        let mut window = SlidingWindow::new(Duration::from_secs(5));
        window.record_fallback_success(at(0));
        window.record_fallback_failure(at(1));

        let summary = window.snapshot(at(1));
        assert_eq!(summary.fallback_success, 1);
        assert_eq!(summary.fallback_failure, 1);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.last_execute, Some(at(1)));
        assert_eq!(summary.last_success, None);
        assert_eq!(summary.last_failure, None);
    }

    #[test]
    fn test_reset_clears_every_unit() {
        let mut window = SlidingWindow::new(Duration::from_secs(5));
        window.record_success(at(0));
        window.record_failure(at(1));
        window.reset(at(1));

        let summary = window.snapshot(at(1));
        assert_eq!(summary.total, 0);
        assert_eq!(summary.last_reset, Some(at(1)));
        // Last-event times are bookkeeping, not window data.
        assert_eq!(summary.last_success, Some(at(0)));
    }
}
