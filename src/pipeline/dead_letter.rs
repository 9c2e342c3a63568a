//! Side channel for events the pipeline could not process normally.

use crate::error::MalformedEvent;
use crate::types::{EnrichedEvent, Event, ShardId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// An event diverted from the normal path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadLetter {
    /// Rejected before entering any shard.
    Malformed { error: MalformedEvent },
    /// Routed to a shard that had already failed.
    ShardUnavailable { shard: ShardId, event: Event },
    /// Resolved, but the sink refused it on every attempt.
    Undeliverable {
        shard: ShardId,
        event: EnrichedEvent,
        error: String,
    },
}

/// Bounded dead-letter channel shared by the feeder and all shards.
///
/// Letters that do not fit are counted and logged rather than blocking
/// the sender.
#[derive(Debug)]
pub(crate) struct DeadLetterQueue {
    sender: Sender<DeadLetter>,
    sent: AtomicU64,
    overflowed: AtomicU64,
}

impl DeadLetterQueue {
    pub(crate) fn new(capacity: usize) -> (Self, Receiver<DeadLetter>) {
        let (sender, receiver) = bounded(capacity);
        let queue = Self {
            sender,
            sent: AtomicU64::new(0),
            overflowed: AtomicU64::new(0),
        };
        (queue, receiver)
    }

    pub(crate) fn push(&self, letter: DeadLetter) {
        match self.sender.try_send(letter) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(letter)) | Err(TrySendError::Disconnected(letter)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                warn!(?letter, "dead-letter channel unavailable, letter discarded");
            }
        }
    }

    pub(crate) fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub(crate) fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }
}
