//! Bounded, newest-first window of recent readings for one sensor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of readings kept per sensor and metric.
pub const MAX_WINDOW: usize = 30;

/// One timestamped numeric sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Stamp a value with the current wall-clock time.
    pub fn now(value: f64) -> Self {
        Self::new(Utc::now(), value)
    }
}

/// Readings ordered newest first, never longer than [`MAX_WINDOW`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorWindow {
    readings: VecDeque<Reading>,
}

impl SensorWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the head, dropping the oldest entries once at capacity.
    pub fn push(&mut self, reading: Reading) {
        while self.readings.len() >= MAX_WINDOW {
            self.readings.pop_back();
        }
        self.readings.push_front(reading);
    }

    /// Most recent reading (index 0).
    pub fn latest(&self) -> Option<&Reading> {
        self.readings.front()
    }

    /// Oldest reading still in the window.
    pub fn oldest(&self) -> Option<&Reading> {
        self.readings.back()
    }

    pub fn get(&self, index: usize) -> Option<&Reading> {
        self.readings.get(index)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }
}
