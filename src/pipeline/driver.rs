//! Pipeline driver: routes source events to shard threads and collects
//! the outcome.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::io::{EventSink, EventSource, SourcePoll};
use crate::metrics::ShardStats;
use crate::partition::Partitioner;
use crate::types::{Event, EventTime, ShardId};
use crossbeam_channel::{bounded, Receiver, SendError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::dead_letter::{DeadLetter, DeadLetterQueue};
use super::shard::{ShardHealth, ShardSlot, ShardWorker};

/// Cooperative stop signal for a running pipeline.
///
/// Once set, the feeder stops polling; every event already routed is still
/// processed and every buffered lookup is flushed.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Read-only view of shard progress, usable from any thread while the
/// pipeline runs.
#[derive(Clone, Debug)]
pub struct PipelineMonitor {
    shards: Arc<Vec<ShardSlot>>,
}

impl PipelineMonitor {
    /// Minimum watermark across shards that have seen at least one event.
    ///
    /// Shards that have not seen anything do not hold it back. Each shard
    /// still joins against its own watermark; this value is for reporting.
    pub fn global_watermark(&self) -> Option<EventTime> {
        self.shards
            .iter()
            .filter_map(|slot| slot.metrics.watermark())
            .min()
    }

    pub fn shard_stats(&self) -> Vec<ShardStats> {
        self.shards.iter().map(|slot| slot.metrics.snapshot()).collect()
    }

    pub fn shard_health(&self) -> Vec<ShardHealth> {
        self.shards.iter().map(ShardSlot::health).collect()
    }

    /// Lookups buffered across all shards.
    pub fn pending_lookups(&self) -> u64 {
        self.shard_stats().iter().map(|s| s.lookups_pending).sum()
    }
}

/// Final state of one shard.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardReport {
    pub shard: ShardId,
    pub health: ShardHealth,
    pub stats: ShardStats,
}

/// Outcome of [`Pipeline::run`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub pipeline_id: String,
    pub shards: Vec<ShardReport>,
    /// Events handed to a shard.
    pub events_routed: u64,
    /// Records rejected before routing.
    pub malformed: u64,
    /// Events routed to a shard that was no longer accepting input.
    pub unroutable: u64,
    /// Letters delivered to the dead-letter channel.
    pub dead_letters: u64,
    /// Letters lost because the dead-letter channel was full or closed.
    pub dead_letters_discarded: u64,
    /// Set when the run ended through a [`StopHandle`].
    pub stopped_early: bool,
    /// Error returned by the final sink flush, if any.
    pub sink_flush_error: Option<String>,
}

impl PipelineReport {
    pub fn is_healthy(&self) -> bool {
        self.failed_shards().is_empty() && self.sink_flush_error.is_none()
    }

    pub fn failed_shards(&self) -> Vec<ShardId> {
        self.shards
            .iter()
            .filter(|r| r.health.is_failed())
            .map(|r| r.shard)
            .collect()
    }

    /// Turn the first shard failure into an error.
    pub fn into_result(self) -> Result<Self> {
        let failed = self.shards.iter().find_map(|r| match &r.health {
            ShardHealth::Failed(reason) => Some((r.shard, reason.clone())),
            _ => None,
        });
        match failed {
            Some((shard, reason)) => Err(PipelineError::ShardFatal { shard, reason }),
            None => Ok(self),
        }
    }

    /// Counters summed over all shards.
    pub fn totals(&self) -> ShardStats {
        let mut total = ShardStats::default();
        for report in &self.shards {
            let s = &report.stats;
            total.events_received += s.events_received;
            total.state_updates += s.state_updates;
            total.lookups_received += s.lookups_received;
            total.lookups_pending += s.lookups_pending;
            total.lookups_resolved += s.lookups_resolved;
            total.late_lookups += s.late_lookups;
            total.explicit_resolutions += s.explicit_resolutions;
            total.state_resolutions += s.state_resolutions;
            total.fallback_resolutions += s.fallback_resolutions;
            total.mirrored_updates += s.mirrored_updates;
            total.keys += s.keys;
            total.versions += s.versions;
            total.versions_pruned += s.versions_pruned;
            total.upserts_before_retained += s.upserts_before_retained;
            total.emitted += s.emitted;
            total.sink_retries += s.sink_retries;
            total.undeliverable += s.undeliverable;
            total.watermark = match (total.watermark, s.watermark) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        total
    }
}

/// Sharded temporal join pipeline.
///
/// Each shard runs on its own thread with its own operator, fed through a
/// bounded queue. Events are routed by [`EventSource::partition_key`], so
/// every event of a key reaches the same shard in source order.
pub struct Pipeline {
    config: PipelineConfig,
    partitioner: Partitioner,
    shards: Arc<Vec<ShardSlot>>,
    stop: StopHandle,
    dead_letters: Arc<DeadLetterQueue>,
    dead_letter_rx: Receiver<DeadLetter>,
}

#[derive(Debug, Default)]
struct FeedStats {
    routed: u64,
    malformed: u64,
    unroutable: u64,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let partitioner = Partitioner::new(config.shard_count)?;
        let shards = (0..config.shard_count)
            .map(|i| ShardSlot::new(ShardId(i)))
            .collect();
        let (queue, dead_letter_rx) = DeadLetterQueue::new(config.dead_letter_capacity);

        Ok(Self {
            config,
            partitioner,
            shards: Arc::new(shards),
            stop: StopHandle::default(),
            dead_letters: Arc::new(queue),
            dead_letter_rx,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            shards: Arc::clone(&self.shards),
        }
    }

    /// Receiver for diverted events. Take it before calling [`Pipeline::run`]
    /// and drain it concurrently if more than `dead_letter_capacity` letters
    /// are possible.
    pub fn dead_letters(&self) -> Receiver<DeadLetter> {
        self.dead_letter_rx.clone()
    }

    /// Consume `source` until it is exhausted or stopped, then drain every
    /// shard and flush `sink`.
    ///
    /// Shard failures are reported in the returned [`PipelineReport`]; an
    /// `Err` means the pipeline could not start.
    pub fn run<S: EventSource>(self, mut source: S, sink: Arc<dyn EventSink>) -> Result<PipelineReport> {
        info!(
            pipeline_id = %self.config.pipeline_id,
            shards = self.config.shard_count,
            allowed_lateness = ?self.config.allowed_lateness,
            retention_window = ?self.config.retention_window,
            "starting pipeline"
        );

        let (senders, handles) = self.spawn_shards(&sink)?;
        let feed = self.feed(&mut source, &senders);
        drop(senders);

        let mut shard_reports = Vec::with_capacity(handles.len());
        for (i, handle) in handles.into_iter().enumerate() {
            let slot = &self.shards[i];
            if handle.join().is_err() {
                let reason = PipelineError::ShardPanicked(ShardId(i)).to_string();
                error!(shard = i, "{}", reason);
                slot.set_health(ShardHealth::Failed(reason));
            }
            shard_reports.push(ShardReport {
                shard: ShardId(i),
                health: slot.health(),
                stats: slot.metrics.snapshot(),
            });
        }

        let sink_flush_error = match sink.flush() {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "sink flush failed");
                Some(e.to_string())
            }
        };

        let report = PipelineReport {
            pipeline_id: self.config.pipeline_id.clone(),
            shards: shard_reports,
            events_routed: feed.routed,
            malformed: feed.malformed,
            unroutable: feed.unroutable,
            dead_letters: self.dead_letters.sent(),
            dead_letters_discarded: self.dead_letters.overflowed(),
            stopped_early: self.stop.is_stopped(),
            sink_flush_error,
        };

        let totals = report.totals();
        info!(
            pipeline_id = %report.pipeline_id,
            routed = report.events_routed,
            resolved = totals.lookups_resolved,
            emitted = totals.emitted,
            dead_letters = report.dead_letters,
            failed_shards = report.failed_shards().len(),
            "pipeline finished"
        );
        Ok(report)
    }

    fn spawn_shards(
        &self,
        sink: &Arc<dyn EventSink>,
    ) -> Result<(Vec<Sender<Event>>, Vec<JoinHandle<()>>)> {
        let mut senders = Vec::with_capacity(self.config.shard_count);
        let mut handles = Vec::with_capacity(self.config.shard_count);

        for (i, slot) in self.shards.iter().enumerate() {
            let (tx, rx) = bounded(self.config.shard_queue_capacity);
            let worker = ShardWorker::new(
                ShardId(i),
                &self.config,
                rx,
                Arc::clone(sink),
                slot.clone(),
                Arc::clone(&self.dead_letters),
            );
            let handle = thread::Builder::new()
                .name(format!("shard-{}", i))
                .spawn(move || worker.run())?;
            senders.push(tx);
            handles.push(handle);
        }
        Ok((senders, handles))
    }

    fn feed<S: EventSource>(
        &self,
        source: &mut S,
        senders: &[Sender<Event>],
    ) -> FeedStats {
        let mut stats = FeedStats::default();

        loop {
            if self.stop.is_stopped() {
                info!(routed = stats.routed, "stop requested, draining shards");
                break;
            }
            match source.poll_next(self.config.source_poll_interval) {
                SourcePoll::Event(event) => {
                    if let Err(malformed) = event.validate() {
                        debug!(error = %malformed, "rejecting malformed event");
                        stats.malformed += 1;
                        self.dead_letters.push(DeadLetter::Malformed { error: malformed });
                        continue;
                    }
                    let shard = self.partitioner.shard_for(source.partition_key(&event));
                    if let Err(SendError(event)) = senders[shard.0].send(event) {
                        warn!(shard = shard.0, key = %event.key, "shard unavailable");
                        stats.unroutable += 1;
                        self.dead_letters
                            .push(DeadLetter::ShardUnavailable { shard, event });
                        continue;
                    }
                    stats.routed += 1;
                }
                SourcePoll::Malformed(malformed) => {
                    debug!(error = %malformed, "rejecting malformed record");
                    stats.malformed += 1;
                    self.dead_letters.push(DeadLetter::Malformed { error: malformed });
                }
                SourcePoll::Idle => {}
                SourcePoll::Exhausted => {
                    info!(routed = stats.routed, "source exhausted");
                    break;
                }
            }
        }
        stats
    }
}

/// Run a pipeline with `config` over `source`, writing to `sink`.
///
/// Dead letters are only counted here: the receiver is not exposed, and
/// letters beyond `dead_letter_capacity` show up as
/// [`PipelineReport::dead_letters_discarded`]. Build a [`Pipeline`] and take
/// [`Pipeline::dead_letters`] to observe them.
pub fn run<S: EventSource>(
    source: S,
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
) -> Result<PipelineReport> {
    Pipeline::new(config)?.run(source, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{CollectingSink, IterSource};
    use std::time::Duration;

    fn config(shards: usize) -> PipelineConfig {
        PipelineConfig::default()
            .with_shard_count(shards)
            .with_allowed_lateness(Duration::from_millis(100))
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Pipeline::new(config(0)).is_err());
    }

    #[test]
    fn test_run_counts_unobserved_dead_letters() {
        let mut events = Vec::new();
        for i in 0..3 {
            let mut event = Event::state_update("u1", EventTime(i), "v");
            event.state_value = None;
            events.push(event);
        }
        events.push(Event::lookup("u1", EventTime(5)));
        let config = PipelineConfig {
            dead_letter_capacity: 2,
            ..config(1)
        };
        let sink = Arc::new(CollectingSink::new());
        let report = run(IterSource::new(events), sink.clone(), config).unwrap();

        assert_eq!(report.malformed, 3);
        assert_eq!(report.dead_letters, 2);
        assert_eq!(report.dead_letters_discarded, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_every_lookup_emitted_once() {
        let mut events = Vec::new();
        for user in 0..20 {
            let key = format!("user{}", user);
            events.push(Event::state_update(key.as_str(), EventTime(1_000), format!("s-{}", user)));
            events.push(Event::lookup(key.as_str(), EventTime(1_500)));
            events.push(Event::lookup(key.as_str(), EventTime(500)));
        }
        let sink = Arc::new(CollectingSink::new());
        let report = run(IterSource::new(events), sink.clone(), config(4)).unwrap();

        assert!(report.is_healthy());
        assert_eq!(report.events_routed, 60);
        assert_eq!(sink.len(), 40);
        assert_eq!(report.totals().lookups_resolved, 40);
        assert_eq!(report.totals().lookups_pending, 0);

        for event in sink.events() {
            let expected = if event.event_time == EventTime(1_500) {
                format!("s-{}", &event.key[4..])
            } else {
                format!("enriched-{}", event.key)
            };
            assert_eq!(event.result_value, expected);
        }
    }

    #[test]
    fn test_malformed_goes_to_dead_letters() {
        let pipeline = Pipeline::new(config(2)).unwrap();
        let dead = pipeline.dead_letters();
        let events = vec![Event::lookup("", EventTime(1)), Event::lookup("a", EventTime(1))];
        let sink = Arc::new(CollectingSink::new());
        let report = pipeline.run(IterSource::new(events), sink.clone()).unwrap();

        assert_eq!(report.malformed, 1);
        assert_eq!(report.dead_letters, 1);
        assert_eq!(sink.len(), 1);
        assert!(matches!(dead.try_recv().unwrap(), DeadLetter::Malformed { .. }));
    }

    #[test]
    fn test_stop_before_run_routes_nothing() {
        let pipeline = Pipeline::new(config(2)).unwrap();
        pipeline.stop_handle().stop();
        let sink = Arc::new(CollectingSink::new());
        let report = pipeline
            .run(IterSource::new(vec![Event::lookup("a", EventTime(1))]), sink.clone())
            .unwrap();

        assert!(report.stopped_early);
        assert_eq!(report.events_routed, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_monitor_global_watermark() {
        let pipeline = Pipeline::new(config(4)).unwrap();
        let monitor = pipeline.monitor();
        assert_eq!(monitor.global_watermark(), None);

        let events = vec![
            Event::state_update("a", EventTime(1_000), "x"),
            Event::state_update("b", EventTime(2_000), "y"),
        ];
        let report = pipeline
            .run(IterSource::new(events), Arc::new(CollectingSink::new()))
            .unwrap();

        let shard_a = Partitioner::new(4).unwrap().shard_for("a");
        let shard_b = Partitioner::new(4).unwrap().shard_for("b");
        let expected = if shard_a == shard_b {
            EventTime(1_900)
        } else {
            EventTime(900)
        };
        assert_eq!(monitor.global_watermark(), Some(expected));
        assert_eq!(report.totals().watermark, Some(expected));
        assert_eq!(monitor.pending_lookups(), 0);
    }
}
