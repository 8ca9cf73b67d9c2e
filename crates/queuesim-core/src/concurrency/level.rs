// Unit level tracking
//
// Number of units available in a Bin, Stock or Res, together with its
// extremes and its time-weighted average.

use crate::time::SimTime;

#[derive(Debug, Clone)]
pub(crate) struct UnitLevel {
    avail: u64,
    initial: u64,
    maximum: u64,
    minimum: u64,
    /// Integral of `avail` over time since the last reset, in unit·seconds
    weighted: f64,
    last_change: SimTime,
    reset_at: SimTime,
}

impl UnitLevel {
    pub(crate) fn new(initial: u64, now: SimTime) -> Self {
        Self {
            avail: initial,
            initial,
            maximum: initial,
            minimum: initial,
            weighted: 0.0,
            last_change: now,
            reset_at: now,
        }
    }

    fn accumulate(&mut self, now: SimTime) {
        let dt = now.duration_since(self.last_change).as_secs_f64();
        self.weighted += self.avail as f64 * dt;
        self.last_change = now;
    }

    /// Add `n` units; returns false and leaves the level untouched on overflow
    pub(crate) fn add(&mut self, n: u64, now: SimTime) -> bool {
        let Some(avail) = self.avail.checked_add(n) else {
            return false;
        };
        self.accumulate(now);
        self.avail = avail;
        self.maximum = self.maximum.max(avail);
        true
    }

    pub(crate) fn remove(&mut self, n: u64, now: SimTime) {
        self.accumulate(now);
        self.avail = self.avail.saturating_sub(n);
        self.minimum = self.minimum.min(self.avail);
    }

    /// Force the level to `n`, making it the new extreme on both sides
    pub(crate) fn set(&mut self, n: u64, now: SimTime) {
        self.accumulate(now);
        self.avail = n;
        self.maximum = n;
        self.minimum = n;
    }

    pub(crate) fn reset(&mut self, now: SimTime) {
        self.weighted = 0.0;
        self.last_change = now;
        self.reset_at = now;
        self.maximum = self.avail;
        self.minimum = self.avail;
    }

    pub(crate) fn avail(&self) -> u64 {
        self.avail
    }

    pub(crate) fn initial(&self) -> u64 {
        self.initial
    }

    pub(crate) fn maximum(&self) -> u64 {
        self.maximum
    }

    pub(crate) fn minimum(&self) -> u64 {
        self.minimum
    }

    /// Time-weighted average since the last reset; `None` over an empty interval
    pub(crate) fn average(&self, now: SimTime) -> Option<f64> {
        let span = now.duration_since(self.reset_at).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        let pending = now.duration_since(self.last_change).as_secs_f64();
        Some((self.weighted + self.avail as f64 * pending) / span)
    }
}
