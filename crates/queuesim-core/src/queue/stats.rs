// Queue statistics
//
// Length and waiting-time statistics kept alongside every process queue.
// Lengths are integrated over simulated time; waiting times are collected
// once per process leaving the queue.

use std::time::Duration;

use serde::Serialize;

use crate::queue::QueueDiscipline;
use crate::time::SimTime;

/// Time-weighted length and waiting-time statistics of one queue
#[derive(Debug, Clone)]
pub struct QueueStats {
    length: usize,
    min_length: usize,
    min_length_at: SimTime,
    max_length: usize,
    max_length_at: SimTime,
    /// Integral of length over time since the last reset, in length·seconds
    weighted_length: f64,
    weighted_length_sq: f64,
    last_change: SimTime,
    reset_at: SimTime,
    observations: u64,
    zero_waits: u64,
    max_wait: Duration,
    max_wait_at: SimTime,
    /// Sum of waiting times in seconds
    sum_wait: f64,
    sum_wait_sq: f64,
    refused: u64,
}

impl QueueStats {
    pub fn new(now: SimTime) -> Self {
        Self {
            length: 0,
            min_length: 0,
            min_length_at: now,
            max_length: 0,
            max_length_at: now,
            weighted_length: 0.0,
            weighted_length_sq: 0.0,
            last_change: now,
            reset_at: now,
            observations: 0,
            zero_waits: 0,
            max_wait: Duration::ZERO,
            max_wait_at: now,
            sum_wait: 0.0,
            sum_wait_sq: 0.0,
            refused: 0,
        }
    }

    fn accumulate(&mut self, now: SimTime) {
        let dt = now.duration_since(self.last_change).as_secs_f64();
        let len = self.length as f64;
        self.weighted_length += len * dt;
        self.weighted_length_sq += len * len * dt;
        self.last_change = now;
    }

    /// A process entered the queue
    pub fn record_entry(&mut self, now: SimTime) {
        self.accumulate(now);
        self.length += 1;
        if self.length > self.max_length {
            self.max_length = self.length;
            self.max_length_at = now;
        }
    }

    /// A process that entered at `entered_at` left the queue
    pub fn record_exit(&mut self, entered_at: SimTime, now: SimTime) {
        self.accumulate(now);
        self.length = self.length.saturating_sub(1);
        if self.length < self.min_length {
            self.min_length = self.length;
            self.min_length_at = now;
        }

        let wait = now.duration_since(entered_at);
        self.observations += 1;
        if wait.is_zero() {
            self.zero_waits += 1;
        }
        let secs = wait.as_secs_f64();
        self.sum_wait += secs;
        self.sum_wait_sq += secs * secs;
        if wait > self.max_wait {
            self.max_wait = wait;
            self.max_wait_at = now;
        }
    }

    pub fn record_refusal(&mut self) {
        self.refused += 1;
    }

    /// Zero all counters. The current length is kept and reseeds min/max.
    pub fn reset(&mut self, now: SimTime) {
        *self = Self {
            length: self.length,
            min_length: self.length,
            max_length: self.length,
            ..Self::new(now)
        };
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn min_length_at(&self) -> SimTime {
        self.min_length_at
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn max_length_at(&self) -> SimTime {
        self.max_length_at
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn zero_waits(&self) -> u64 {
        self.zero_waits
    }

    pub fn refused(&self) -> u64 {
        self.refused
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub fn max_wait_at(&self) -> SimTime {
        self.max_wait_at
    }

    pub fn reset_at(&self) -> SimTime {
        self.reset_at
    }

    /// Time-weighted average length since the last reset. Over an empty
    /// interval this is the current length.
    pub fn average_length(&self, now: SimTime) -> f64 {
        let span = now.duration_since(self.reset_at).as_secs_f64();
        if span <= 0.0 {
            return self.length as f64;
        }
        let pending = now.duration_since(self.last_change).as_secs_f64();
        (self.weighted_length + self.length as f64 * pending) / span
    }

    /// Time-weighted standard deviation of the length since the last reset
    pub fn std_dev_length(&self, now: SimTime) -> Option<f64> {
        let span = now.duration_since(self.reset_at).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        let pending = now.duration_since(self.last_change).as_secs_f64();
        let len = self.length as f64;
        let mean = (self.weighted_length + len * pending) / span;
        let mean_sq = (self.weighted_length_sq + len * len * pending) / span;
        Some((mean_sq - mean * mean).max(0.0).sqrt())
    }

    /// Mean waiting time of the processes that left since the last reset
    pub fn average_wait_time(&self) -> Option<Duration> {
        if self.observations == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.sum_wait / self.observations as f64))
    }

    pub fn std_dev_wait_time(&self) -> Option<Duration> {
        if self.observations == 0 {
            return None;
        }
        let n = self.observations as f64;
        let mean = self.sum_wait / n;
        let variance = (self.sum_wait_sq / n - mean * mean).max(0.0);
        Some(Duration::from_secs_f64(variance.sqrt()))
    }

    /// Serializable view of the statistics at `now`
    pub fn snapshot(&self, name: &str, discipline: QueueDiscipline, now: SimTime) -> QueueSnapshot {
        QueueSnapshot {
            name: name.to_string(),
            discipline,
            length: self.length,
            min_length: self.min_length,
            max_length: self.max_length,
            average_length: self.average_length(now),
            std_dev_length: self.std_dev_length(now),
            observations: self.observations,
            zero_waits: self.zero_waits,
            refused: self.refused,
            max_wait_secs: self.max_wait.as_secs_f64(),
            average_wait_secs: self.average_wait_time().map(|d| d.as_secs_f64()),
            std_dev_wait_secs: self.std_dev_wait_time().map(|d| d.as_secs_f64()),
            reset_at: self.reset_at,
        }
    }
}

/// Read-only view of a queue's statistics, for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub discipline: QueueDiscipline,
    pub length: usize,
    pub min_length: usize,
    pub max_length: usize,
    pub average_length: f64,
    pub std_dev_length: Option<f64>,
    pub observations: u64,
    pub zero_waits: u64,
    pub refused: u64,
    pub max_wait_secs: f64,
    pub average_wait_secs: Option<f64>,
    pub std_dev_wait_secs: Option<f64>,
    pub reset_at: SimTime,
}
