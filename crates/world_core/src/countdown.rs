//! Soft-deadline timers driven by simulated elapsed time.
//!
//! Every timer in the map subsystem (grid idle expiry, map unload delay,
//! dynamic-tree rebalance period, update/cleanup intervals) advances only
//! when the tick driver hands it an elapsed duration. Nothing here reads the
//! wall clock.

use serde::{Deserialize, Serialize};

/// Outcome of advancing a [`Countdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStatus {
    /// The countdown is not armed.
    Disabled,
    /// The deadline was reached during this tick. The countdown disarms itself.
    Elapsed,
    /// Milliseconds still left before the deadline.
    Remaining(u32),
}

/// A one-shot countdown.
///
/// Reaching the deadline is inclusive: a countdown armed with `n` elapses on
/// the tick that brings the total elapsed time to `n` or more.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    remaining: Option<u32>,
}

impl Countdown {
    /// A countdown that never fires until armed.
    pub const fn disabled() -> Self {
        Self { remaining: None }
    }

    pub const fn armed(duration_ms: u32) -> Self {
        Self { remaining: Some(duration_ms) }
    }

    /// (Re)starts the countdown, replacing any pending deadline.
    pub fn arm(&mut self, duration_ms: u32) {
        self.remaining = Some(duration_ms);
    }

    /// Cancels the countdown.
    pub fn cancel(&mut self) {
        self.remaining = None;
    }

    pub fn is_armed(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn tick(&mut self, elapsed_ms: u32) -> CountdownStatus {
        match self.remaining {
            None => CountdownStatus::Disabled,
            Some(left) if left <= elapsed_ms => {
                self.remaining = None;
                CountdownStatus::Elapsed
            }
            Some(left) => {
                let left = left - elapsed_ms;
                self.remaining = Some(left);
                CountdownStatus::Remaining(left)
            }
        }
    }
}

/// A repeating interval that accumulates elapsed time.
///
/// `advance` returns the whole accumulated time once the interval has been
/// reached, so that consumers see the real elapsed duration rather than the
/// nominal interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalTimer {
    interval: u32,
    current: u32,
}

impl IntervalTimer {
    pub const fn new(interval_ms: u32) -> Self {
        Self { interval: interval_ms, current: 0 }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval = interval_ms;
    }

    pub fn advance(&mut self, elapsed_ms: u32) -> Option<u32> {
        self.current = self.current.saturating_add(elapsed_ms);
        if self.current >= self.interval {
            let accumulated = self.current;
            self.current = 0;
            Some(accumulated)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_elapses_on_exact_deadline() {
        let mut countdown = Countdown::armed(300);
        assert_eq!(countdown.tick(100), CountdownStatus::Remaining(200));
        assert_eq!(countdown.tick(100), CountdownStatus::Remaining(100));
        assert_eq!(countdown.tick(100), CountdownStatus::Elapsed);
        assert_eq!(countdown.tick(100), CountdownStatus::Disabled);
    }

    #[test]
    fn test_countdown_cancel_disarms() {
        let mut countdown = Countdown::armed(50);
        countdown.cancel();
        assert!(!countdown.is_armed());
        assert_eq!(countdown.tick(1000), CountdownStatus::Disabled);
    }

    #[test]
    fn test_countdown_overshoot_still_elapses_once() {
        let mut countdown = Countdown::armed(10);
        assert_eq!(countdown.tick(500), CountdownStatus::Elapsed);
        assert!(countdown.remaining().is_none());
    }

    #[test]
    fn test_interval_timer_reports_accumulated_time() {
        let mut timer = IntervalTimer::new(100);
        assert_eq!(timer.advance(60), None);
        assert_eq!(timer.advance(60), Some(120));
        assert_eq!(timer.current(), 0);
        assert_eq!(timer.advance(100), Some(100));
    }
}
