//! Shard worker: one thread owning one join operator.

use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{PipelineError, Result};
use crate::io::EventSink;
use crate::join::TemporalJoinOperator;
use crate::metrics::ShardMetrics;
use crate::types::{EnrichedEvent, Event, ShardId};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use super::dead_letter::{DeadLetter, DeadLetterQueue};

/// Lifecycle of a shard as seen by the driver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ShardHealth {
    Starting,
    Running,
    /// Drained and exited normally.
    Stopped,
    /// Stopped processing after a fatal error.
    Failed(String),
}

impl ShardHealth {
    pub fn is_failed(&self) -> bool {
        matches!(self, ShardHealth::Failed(_))
    }
}

/// Health and metrics of one shard, shared between its worker and the driver.
#[derive(Clone, Debug)]
pub(crate) struct ShardSlot {
    pub(crate) metrics: Arc<ShardMetrics>,
    pub(crate) health: Arc<RwLock<ShardHealth>>,
}

impl ShardSlot {
    pub(crate) fn new(shard: ShardId) -> Self {
        Self {
            metrics: Arc::new(ShardMetrics::new(shard)),
            health: Arc::new(RwLock::new(ShardHealth::Starting)),
        }
    }

    pub(crate) fn set_health(&self, health: ShardHealth) {
        *self.health.write() = health;
    }

    pub(crate) fn health(&self) -> ShardHealth {
        self.health.read().clone()
    }
}

pub(crate) struct ShardWorker {
    shard: ShardId,
    operator: TemporalJoinOperator,
    receiver: Receiver<Event>,
    sink: Arc<dyn EventSink>,
    retry: RetryPolicy,
    slot: ShardSlot,
    dead_letters: Arc<DeadLetterQueue>,
}

impl ShardWorker {
    pub(crate) fn new(
        shard: ShardId,
        config: &PipelineConfig,
        receiver: Receiver<Event>,
        sink: Arc<dyn EventSink>,
        slot: ShardSlot,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            shard,
            operator: TemporalJoinOperator::with_metrics(shard, config, Arc::clone(&slot.metrics)),
            receiver,
            sink,
            retry: config.sink_retry.clone(),
            slot,
            dead_letters,
        }
    }

    /// Process until the queue closes, then flush every buffered lookup.
    ///
    /// A fatal error or a panic while processing an event fails the shard;
    /// everything it still holds or receives afterwards is dead-lettered.
    pub(crate) fn run(mut self) {
        self.slot.set_health(ShardHealth::Running);
        info!(shard = self.shard.0, "shard started");

        let mut resolved = Vec::new();
        let mut pending = VecDeque::new();
        while let Ok(event) = self.receiver.recv() {
            let step = panic::catch_unwind(AssertUnwindSafe(|| {
                self.step(event, &mut resolved, &mut pending)
            }));
            let reason = match step {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_reason(payload),
            };
            pending.extend(resolved.drain(..));
            return self.fail(reason, pending);
        }

        let drained = panic::catch_unwind(AssertUnwindSafe(|| {
            self.operator.flush(&mut resolved);
            pending.extend(resolved.drain(..));
            self.deliver(&mut pending);
        }));
        if let Err(payload) = drained {
            pending.extend(resolved.drain(..));
            return self.fail(panic_reason(payload), pending);
        }

        if let Err(e) = self.operator.store().verify() {
            error!(shard = self.shard.0, error = %e, "state check failed at shutdown");
            self.slot.set_health(ShardHealth::Failed(e.to_string()));
            return;
        }

        self.slot.set_health(ShardHealth::Stopped);
        info!(
            shard = self.shard.0,
            resolved = self.slot.metrics.snapshot().lookups_resolved,
            "shard stopped"
        );
    }

    fn step(
        &mut self,
        event: Event,
        resolved: &mut Vec<EnrichedEvent>,
        pending: &mut VecDeque<EnrichedEvent>,
    ) -> Result<()> {
        match self.operator.process(event, resolved) {
            Ok(()) => {
                pending.extend(resolved.drain(..));
                self.deliver(pending);
                Ok(())
            }
            Err(PipelineError::Malformed(malformed)) => {
                self.dead_letters.push(DeadLetter::Malformed { error: malformed });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Mark the shard failed and divert everything it still holds: resolved
    /// output not yet accepted by the sink, buffered lookups, and the queue.
    fn fail(mut self, reason: String, undelivered: VecDeque<EnrichedEvent>) {
        error!(shard = self.shard.0, reason = %reason, "shard failed");
        self.slot.set_health(ShardHealth::Failed(reason.clone()));

        for event in undelivered {
            self.slot.metrics.record_undeliverable();
            self.dead_letters.push(DeadLetter::Undeliverable {
                shard: self.shard,
                event,
                error: reason.clone(),
            });
        }
        for event in self.operator.abandon() {
            self.dead_letters.push(DeadLetter::ShardUnavailable {
                shard: self.shard,
                event,
            });
        }
        // Keep the queue open until the driver closes it so nothing routed
        // here is lost.
        for event in self.receiver.iter() {
            self.dead_letters.push(DeadLetter::ShardUnavailable {
                shard: self.shard,
                event,
            });
        }
    }

    /// Deliver in order. An event leaves `pending` only once the sink has
    /// accepted it or it was dead-lettered, so a panicking sink leaves the
    /// rest of the batch in place.
    fn deliver(&self, pending: &mut VecDeque<EnrichedEvent>) {
        while let Some(event) = pending.front() {
            let outcome = self.offer(event);
            let Some(event) = pending.pop_front() else {
                break;
            };
            if let Err(error) = outcome {
                self.slot.metrics.record_undeliverable();
                self.dead_letters.push(DeadLetter::Undeliverable {
                    shard: self.shard,
                    event,
                    error,
                });
            }
        }
    }

    /// Offer one event to the sink, backing off between attempts.
    fn offer(&self, event: &EnrichedEvent) -> std::result::Result<(), String> {
        let mut attempt = 1;
        loop {
            match self.sink.accept(event) {
                Ok(()) => {
                    self.slot.metrics.record_emitted();
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        shard = self.shard.0,
                        key = %event.key,
                        attempt,
                        ?backoff,
                        error = %e,
                        "sink rejected event, retrying"
                    );
                    self.slot.metrics.record_sink_retry();
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        shard = self.shard.0,
                        key = %event.key,
                        attempts = attempt,
                        error = %e,
                        "sink rejected event, giving up"
                    );
                    return Err(e.to_string());
                }
            }
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panicked: {}", message)
}
