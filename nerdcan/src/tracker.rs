use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Inter-arrival times per identifier, on the monotonic clock
#[derive(Default, Clone, Debug)]
pub struct CycleTimeTracker {
    last: HashMap<u32, Instant>,
}

impl CycleTimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and return the time since the previous recorded
    /// event for `id`. Suppressed echoes and out-of-order timestamps yield
    /// zero and leave the reference point untouched.
    pub fn record(&mut self, id: u32, time: Instant, suppressed: bool) -> Duration {
        if suppressed {
            return Duration::ZERO;
        }
        match self.last.get_mut(&id) {
            Some(last) => match time.checked_duration_since(*last) {
                Some(delta) => {
                    *last = time;
                    delta
                }
                None => Duration::ZERO,
            },
            None => {
                self.last.insert(id, time);
                Duration::ZERO
            }
        }
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_is_zero() {
        let mut tracker = CycleTimeTracker::new();
        assert_eq!(tracker.record(0x100, Instant::now(), false), Duration::ZERO);
    }

    #[test]
    fn delta_between_events() {
        let mut tracker = CycleTimeTracker::new();
        let t0 = Instant::now();
        tracker.record(0x100, t0, false);
        let delta = tracker.record(0x100, t0 + Duration::from_millis(100), false);
        assert_eq!(delta, Duration::from_millis(100));
        let delta = tracker.record(0x100, t0 + Duration::from_millis(150), false);
        assert_eq!(delta, Duration::from_millis(50));
    }

    #[test]
    fn identifiers_are_independent() {
        let mut tracker = CycleTimeTracker::new();
        let t0 = Instant::now();
        tracker.record(0x100, t0, false);
        assert_eq!(
            tracker.record(0x200, t0 + Duration::from_millis(10), false),
            Duration::ZERO
        );
    }

    #[test]
    fn suppressed_events_do_not_move_reference() {
        let mut tracker = CycleTimeTracker::new();
        let t0 = Instant::now();
        tracker.record(0x100, t0, false);
        let echo = tracker.record(0x100, t0 + Duration::from_millis(5), true);
        assert_eq!(echo, Duration::ZERO);
        let delta = tracker.record(0x100, t0 + Duration::from_millis(20), false);
        assert_eq!(delta, Duration::from_millis(20));
    }

    #[test]
    fn out_of_order_arrival() {
        let mut tracker = CycleTimeTracker::new();
        let t0 = Instant::now();
        tracker.record(0x100, t0 + Duration::from_millis(50), false);
        assert_eq!(tracker.record(0x100, t0, false), Duration::ZERO);
        let delta = tracker.record(0x100, t0 + Duration::from_millis(80), false);
        assert_eq!(delta, Duration::from_millis(30));
    }
}
