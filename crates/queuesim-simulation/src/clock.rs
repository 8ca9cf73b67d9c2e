//! Simulated clock for deterministic time management

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use queuesim_core::SimTime;
use tracing::warn;

/// Simulated clock shared by the kernel and anyone holding a clone.
///
/// Time only moves forward; the kernel advances it to the instant of each
/// event it dispatches.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    current_time: Rc<Cell<SimTime>>,
}

impl SimulatedClock {
    /// Create a new simulated clock starting at the given instant
    pub fn new(start_time: SimTime) -> Self {
        Self {
            current_time: Rc::new(Cell::new(start_time)),
        }
    }

    /// Get the current simulated time
    pub fn now(&self) -> SimTime {
        self.current_time.get()
    }

    /// Advance the simulated time by the given duration
    pub fn advance(&self, duration: Duration) {
        self.current_time.set(self.now().add_duration(duration));
    }

    /// Move the clock to `target`. Earlier instants are ignored.
    pub fn advance_to(&self, target: SimTime) {
        let current = self.now();
        if target < current {
            warn!(current = %current, target = %target, "clock cannot run backwards, ignored");
            return;
        }
        self.current_time.set(target);
    }

    /// Check if a timeout has occurred
    pub fn is_timeout(&self, start_time: SimTime, timeout: Duration) -> bool {
        self.now().duration_since(start_time) >= timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_clock() {
        let clock = SimulatedClock::new(SimTime::from_secs(1000));

        assert_eq!(clock.now(), SimTime::from_secs(1000));

        clock.advance(Duration::from_secs(100));
        assert_eq!(clock.now(), SimTime::from_secs(1100));
    }

    #[test]
    fn test_clock_never_runs_backwards() {
        let clock = SimulatedClock::new(SimTime::from_secs(10));
        let shared = clock.clone();

        shared.advance_to(SimTime::from_secs(12));
        clock.advance_to(SimTime::from_secs(11));

        assert_eq!(clock.now(), SimTime::from_secs(12));
    }

    #[test]
    fn test_timeout_detection() {
        let clock = SimulatedClock::new(SimTime::from_secs(1000));
        let start = clock.now();

        assert!(!clock.is_timeout(start, Duration::from_secs(100)));

        clock.advance(Duration::from_secs(150));
        assert!(clock.is_timeout(start, Duration::from_secs(100)));
    }
}
