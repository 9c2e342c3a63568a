//! Lookups waiting for the watermark.

use crate::types::{Event, EventTime};
use std::collections::BTreeMap;

/// Buffered lookups ordered by `(event_time, arrival)`.
///
/// Ties on event time drain in arrival order.
#[derive(Debug, Default)]
pub struct LookupBuffer {
    pending: BTreeMap<(EventTime, u64), Event>,
    next_arrival: u64,
}

impl LookupBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.pending.insert((event.event_time, arrival), event);
    }

    /// Remove and return every lookup at or before `watermark`, oldest first.
    pub fn drain_ready(&mut self, watermark: EventTime) -> Vec<Event> {
        if self.next_due().map_or(true, |t| t > watermark) {
            return Vec::new();
        }
        let remaining = match watermark.0.checked_add(1) {
            Some(next) => self.pending.split_off(&(EventTime(next), 0)),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.pending, remaining)
            .into_values()
            .collect()
    }

    /// Remove and return every lookup, oldest first.
    pub fn drain_all(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Event time of the oldest pending lookup.
    pub fn next_due(&self) -> Option<EventTime> {
        self.pending.keys().next().map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
