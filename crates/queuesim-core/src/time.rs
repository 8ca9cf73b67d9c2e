// Simulated time
//
// Instants on the simulation clock. Spans between instants are plain
// `std::time::Duration` values.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An instant of simulated time, in nanoseconds since the start of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of every simulation run
    pub const ZERO: SimTime = SimTime(0);

    /// Create an instant from nanoseconds since the start of the run
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create an instant from whole seconds since the start of the run
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Create an instant from fractional seconds; negative values clamp to zero
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs <= 0.0 || !secs.is_finite() {
            return Self::ZERO;
        }
        Self((secs * 1e9).round() as u64)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    /// Add a span to this instant
    pub fn add_duration(&self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Span between this instant and an earlier one (zero if `earlier` is later)
    pub fn duration_since(&self, earlier: SimTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}
