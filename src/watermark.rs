//! Per-shard event-time progress tracking.

use crate::types::EventTime;
use std::time::Duration;

/// Tracks the maximum event time seen and derives a monotonic watermark.
///
/// The watermark asserts that no more events at or before it are expected,
/// up to the allowed lateness bound.
#[derive(Clone, Debug)]
pub struct WatermarkTracker {
    allowed_lateness: Duration,
    max_event_time: Option<EventTime>,
    watermark: Option<EventTime>,
    observed: u64,
    observed_late: u64,
}

impl WatermarkTracker {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            allowed_lateness,
            max_event_time: None,
            watermark: None,
            observed: 0,
            observed_late: 0,
        }
    }

    /// Record an event time and return the (possibly unchanged) watermark.
    pub fn observe(&mut self, event_time: EventTime) -> EventTime {
        self.observed += 1;
        if self.is_late(event_time) {
            self.observed_late += 1;
        }

        let max = match self.max_event_time {
            Some(max) if max >= event_time => max,
            _ => event_time,
        };
        self.max_event_time = Some(max);

        let candidate = max.saturating_sub(self.allowed_lateness);
        let watermark = match self.watermark {
            Some(current) if current >= candidate => current,
            _ => candidate,
        };
        self.watermark = Some(watermark);
        watermark
    }

    /// Current watermark, `None` until the first observation.
    pub fn current(&self) -> Option<EventTime> {
        self.watermark
    }

    /// Whether the watermark has reached `event_time`.
    pub fn has_passed(&self, event_time: EventTime) -> bool {
        matches!(self.watermark, Some(w) if w >= event_time)
    }

    /// Whether `event_time` is strictly behind the watermark.
    pub fn is_late(&self, event_time: EventTime) -> bool {
        matches!(self.watermark, Some(w) if event_time < w)
    }

    pub fn max_event_time(&self) -> Option<EventTime> {
        self.max_event_time
    }

    pub fn allowed_lateness(&self) -> Duration {
        self.allowed_lateness
    }

    /// Number of observed event times.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Number of observed event times that were behind the watermark.
    pub fn observed_late(&self) -> u64 {
        self.observed_late
    }
}
