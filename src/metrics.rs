//! Lock-free per-shard counters.
//!
//! Each shard writes its own [`ShardMetrics`]; the pipeline monitor reads
//! them from other threads via [`ShardMetrics::snapshot`].

use crate::types::{EventTime, ShardId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Live counters for one shard.
#[derive(Debug)]
pub struct ShardMetrics {
    shard: ShardId,
    events_received: AtomicU64,
    state_updates: AtomicU64,
    lookups_received: AtomicU64,
    lookups_pending: AtomicU64,
    lookups_resolved: AtomicU64,
    late_lookups: AtomicU64,
    explicit_resolutions: AtomicU64,
    state_resolutions: AtomicU64,
    fallback_resolutions: AtomicU64,
    mirrored_updates: AtomicU64,
    versions: AtomicU64,
    keys: AtomicU64,
    versions_pruned: AtomicU64,
    upserts_before_retained: AtomicU64,
    emitted: AtomicU64,
    sink_retries: AtomicU64,
    undeliverable: AtomicU64,
    watermark: AtomicI64,
    /// Set once `watermark` holds a value; every `i64` is a valid watermark.
    has_watermark: AtomicBool,
}

impl ShardMetrics {
    pub fn new(shard: ShardId) -> Self {
        Self {
            shard,
            events_received: AtomicU64::new(0),
            state_updates: AtomicU64::new(0),
            lookups_received: AtomicU64::new(0),
            lookups_pending: AtomicU64::new(0),
            lookups_resolved: AtomicU64::new(0),
            late_lookups: AtomicU64::new(0),
            explicit_resolutions: AtomicU64::new(0),
            state_resolutions: AtomicU64::new(0),
            fallback_resolutions: AtomicU64::new(0),
            mirrored_updates: AtomicU64::new(0),
            versions: AtomicU64::new(0),
            keys: AtomicU64::new(0),
            versions_pruned: AtomicU64::new(0),
            upserts_before_retained: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            sink_retries: AtomicU64::new(0),
            undeliverable: AtomicU64::new(0),
            watermark: AtomicI64::new(0),
            has_watermark: AtomicBool::new(false),
        }
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub(crate) fn record_event(&self, is_lookup: bool) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        if is_lookup {
            self.lookups_received.fetch_add(1, Ordering::Relaxed);
        } else {
            self.state_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_late_lookup(&self) {
        self.late_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resolution(&self, resolution: &crate::types::Resolution) {
        use crate::types::Resolution;
        let counter = match resolution {
            Resolution::Explicit => &self.explicit_resolutions,
            Resolution::State { .. } => &self.state_resolutions,
            Resolution::Fallback => &self.fallback_resolutions,
            Resolution::Mirrored => {
                self.mirrored_updates.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.lookups_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.lookups_pending.store(pending as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_state_size(&self, keys: usize, versions: usize) {
        self.keys.store(keys as u64, Ordering::Relaxed);
        self.versions.store(versions as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_pruned(&self, removed: usize) {
        self.versions_pruned
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_upsert_before_retained(&self) {
        self.upserts_before_retained.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sink_retry(&self) {
        self.sink_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_undeliverable(&self) {
        self.undeliverable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_watermark(&self, watermark: EventTime) {
        self.watermark.store(watermark.0, Ordering::Release);
        self.has_watermark.store(true, Ordering::Release);
    }

    /// Current shard watermark, if the shard has seen any event.
    pub fn watermark(&self) -> Option<EventTime> {
        if self.has_watermark.load(Ordering::Acquire) {
            Some(EventTime(self.watermark.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> ShardStats {
        ShardStats {
            shard: self.shard,
            events_received: self.events_received.load(Ordering::Relaxed),
            state_updates: self.state_updates.load(Ordering::Relaxed),
            lookups_received: self.lookups_received.load(Ordering::Relaxed),
            lookups_pending: self.lookups_pending.load(Ordering::Relaxed),
            lookups_resolved: self.lookups_resolved.load(Ordering::Relaxed),
            late_lookups: self.late_lookups.load(Ordering::Relaxed),
            explicit_resolutions: self.explicit_resolutions.load(Ordering::Relaxed),
            state_resolutions: self.state_resolutions.load(Ordering::Relaxed),
            fallback_resolutions: self.fallback_resolutions.load(Ordering::Relaxed),
            mirrored_updates: self.mirrored_updates.load(Ordering::Relaxed),
            keys: self.keys.load(Ordering::Relaxed),
            versions: self.versions.load(Ordering::Relaxed),
            versions_pruned: self.versions_pruned.load(Ordering::Relaxed),
            upserts_before_retained: self.upserts_before_retained.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
            watermark: self.watermark(),
        }
    }
}

/// Plain copy of a shard's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub shard: ShardId,
    pub events_received: u64,
    pub state_updates: u64,
    pub lookups_received: u64,
    /// Lookups currently waiting for the watermark.
    pub lookups_pending: u64,
    pub lookups_resolved: u64,
    /// Lookups that arrived behind the watermark.
    pub late_lookups: u64,
    pub explicit_resolutions: u64,
    pub state_resolutions: u64,
    pub fallback_resolutions: u64,
    pub mirrored_updates: u64,
    pub keys: u64,
    pub versions: u64,
    pub versions_pruned: u64,
    pub upserts_before_retained: u64,
    /// Output events accepted by the sink.
    pub emitted: u64,
    pub sink_retries: u64,
    /// Output events the sink never accepted.
    pub undeliverable: u64,
    pub watermark: Option<EventTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;

    #[test]
    fn test_watermark_starts_absent() {
        let metrics = ShardMetrics::new(ShardId(0));
        assert_eq!(metrics.watermark(), None);
        metrics.set_watermark(EventTime(42));
        assert_eq!(metrics.watermark(), Some(EventTime(42)));
    }

    #[test]
    fn test_minimum_watermark_is_reported() {
        let metrics = ShardMetrics::new(ShardId(0));
        metrics.set_watermark(EventTime::MIN);
        assert_eq!(metrics.watermark(), Some(EventTime::MIN));
        assert_eq!(metrics.snapshot().watermark, Some(EventTime::MIN));
    }

    #[test]
    fn test_resolution_counters() {
        let metrics = ShardMetrics::new(ShardId(3));
        metrics.record_event(true);
        metrics.record_event(false);
        metrics.record_resolution(&Resolution::Fallback);
        metrics.record_resolution(&Resolution::State {
            effective_time: EventTime(1),
        });
        metrics.record_resolution(&Resolution::Mirrored);

        let stats = metrics.snapshot();
        assert_eq!(stats.shard, ShardId(3));
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.lookups_received, 1);
        assert_eq!(stats.state_updates, 1);
        assert_eq!(stats.lookups_resolved, 2);
        assert_eq!(stats.fallback_resolutions, 1);
        assert_eq!(stats.state_resolutions, 1);
        assert_eq!(stats.mirrored_updates, 1);
    }
}
