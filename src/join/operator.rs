//! Per-shard temporal join.

use crate::config::{FallbackTemplate, PipelineConfig};
use crate::error::Result;
use crate::metrics::ShardMetrics;
use crate::state::{UpsertOutcome, VersionedStateStore};
use crate::types::{EnrichedEvent, Event, EventKind, EventTime, Resolution, ShardId};
use crate::watermark::WatermarkTracker;
use std::sync::Arc;
use tracing::debug;

use super::buffer::LookupBuffer;

/// Joins lookups against the shard's versioned state as of their event time.
///
/// Lookups are buffered until the shard watermark reaches their event time,
/// so the value they read cannot be changed by a state update that is still
/// within the allowed lateness. Lookups that arrive with the watermark already
/// at or past their event time resolve immediately.
#[derive(Debug)]
pub struct TemporalJoinOperator {
    shard: ShardId,
    store: VersionedStateStore,
    watermark: WatermarkTracker,
    buffer: LookupBuffer,
    fallback: FallbackTemplate,
    mirror_state_updates: bool,
    metrics: Arc<ShardMetrics>,
}

impl TemporalJoinOperator {
    pub fn new(shard: ShardId, config: &PipelineConfig) -> Self {
        Self::with_metrics(shard, config, Arc::new(ShardMetrics::new(shard)))
    }

    /// Create an operator that reports into shared `metrics`.
    pub fn with_metrics(
        shard: ShardId,
        config: &PipelineConfig,
        metrics: Arc<ShardMetrics>,
    ) -> Self {
        Self {
            shard,
            store: VersionedStateStore::new(config.retention_window),
            watermark: WatermarkTracker::new(config.allowed_lateness),
            buffer: LookupBuffer::new(),
            fallback: config.fallback_template.clone(),
            mirror_state_updates: config.mirror_state_updates,
            metrics,
        }
    }

    /// Apply one event, appending any output that became ready to `out`.
    ///
    /// Errors are limited to malformed events and state invariant violations.
    pub fn process(&mut self, event: Event, out: &mut Vec<EnrichedEvent>) -> Result<()> {
        event.validate()?;
        self.metrics.record_event(event.is_lookup());
        let event_time = event.event_time;

        match event.kind {
            EventKind::StateUpdate => self.apply_update(event, out)?,
            EventKind::Lookup => {
                if self.watermark.has_passed(event_time) {
                    let late = self.watermark.is_late(event_time);
                    if late {
                        self.metrics.record_late_lookup();
                        debug!(
                            shard = self.shard.0,
                            key = %event.key,
                            event_time = event_time.0,
                            "lookup behind watermark, resolving immediately"
                        );
                    }
                    self.emit(self.resolve(event, late), out);
                } else {
                    self.buffer.push(event);
                }
            }
        }

        let previous = self.watermark.current();
        let watermark = self.watermark.observe(event_time);
        if previous != Some(watermark) {
            self.metrics.set_watermark(watermark);
            for ready in self.buffer.drain_ready(watermark) {
                let enriched = self.resolve(ready, false);
                self.emit(enriched, out);
            }
            let removed = self.store.prune(watermark);
            if removed > 0 {
                self.metrics.record_pruned(removed);
            }
        }

        self.publish_sizes();
        Ok(())
    }

    /// Resolve every buffered lookup against the current state.
    pub fn flush(&mut self, out: &mut Vec<EnrichedEvent>) {
        let pending = self.buffer.drain_all();
        if !pending.is_empty() {
            debug!(
                shard = self.shard.0,
                count = pending.len(),
                "flushing buffered lookups"
            );
        }
        for event in pending {
            let enriched = self.resolve(event, false);
            self.emit(enriched, out);
        }
        self.publish_sizes();
    }

    /// Hand back buffered lookups unresolved. Used when the shard cannot
    /// trust its state any more.
    pub fn abandon(&mut self) -> Vec<Event> {
        let pending = self.buffer.drain_all();
        self.publish_sizes();
        pending
    }

    fn apply_update(&mut self, event: Event, out: &mut Vec<EnrichedEvent>) -> Result<()> {
        let Event {
            event_time,
            key,
            state_value,
            passthrough,
            ..
        } = event;
        // validate() guarantees a value for state updates.
        let value = state_value.unwrap_or_default();

        let outcome = self.store.upsert(&key, event_time, value.as_str())?;
        if outcome == UpsertOutcome::InsertedBeforeRetained {
            self.metrics.record_upsert_before_retained();
        }

        if self.mirror_state_updates {
            let mirrored = EnrichedEvent {
                event_time,
                key,
                result_value: value,
                resolution: Resolution::Mirrored,
                late: self.watermark.is_late(event_time),
                shard: self.shard,
                passthrough,
            };
            self.emit(mirrored, out);
        }
        Ok(())
    }

    /// Explicit value, then the version as of the event time, then the fallback.
    fn resolve(&self, event: Event, late: bool) -> EnrichedEvent {
        let Event {
            event_time,
            key,
            explicit_value,
            passthrough,
            ..
        } = event;

        let (result_value, resolution) = match explicit_value {
            Some(value) => (value, Resolution::Explicit),
            None => match self.store.as_of_version(&key, event_time) {
                Some(version) => (
                    version.value.clone(),
                    Resolution::State {
                        effective_time: version.effective_time,
                    },
                ),
                None => (self.fallback.render(&key), Resolution::Fallback),
            },
        };

        EnrichedEvent {
            event_time,
            key,
            result_value,
            resolution,
            late,
            shard: self.shard,
            passthrough,
        }
    }

    fn emit(&self, event: EnrichedEvent, out: &mut Vec<EnrichedEvent>) {
        self.metrics.record_resolution(&event.resolution);
        out.push(event);
    }

    fn publish_sizes(&self) {
        self.metrics.set_pending(self.buffer.len());
        self.metrics
            .set_state_size(self.store.key_count(), self.store.version_count());
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn watermark(&self) -> Option<EventTime> {
        self.watermark.current()
    }

    /// Number of lookups waiting for the watermark.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn store(&self) -> &VersionedStateStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<ShardMetrics> {
        &self.metrics
    }
}
