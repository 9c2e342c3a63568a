//! Shard-local versioned keyed state.

use crate::error::Result;
use crate::types::{EventTime, Version};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, trace};

use super::history::{UpsertOutcome, VersionHistory};

/// Counters kept by a [`VersionedStateStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateStats {
    pub key_count: usize,
    pub version_count: usize,
    pub upserts: u64,
    pub out_of_order_upserts: u64,
    pub upserts_before_retained: u64,
    pub versions_pruned: u64,
}

/// Per-key ordered histories of `(effective_time, value)` versions.
///
/// Owned by exactly one shard; never shared across threads.
#[derive(Debug)]
pub struct VersionedStateStore {
    histories: HashMap<String, VersionHistory>,
    /// `(next_prunable, key)` for every history holding more than one version.
    prunable: BTreeSet<(EventTime, String)>,
    retention_window: Duration,
    version_count: usize,
    upserts: u64,
    out_of_order_upserts: u64,
    upserts_before_retained: u64,
    versions_pruned: u64,
}

impl VersionedStateStore {
    pub fn new(retention_window: Duration) -> Self {
        Self {
            histories: HashMap::new(),
            prunable: BTreeSet::new(),
            retention_window,
            version_count: 0,
            upserts: 0,
            out_of_order_upserts: 0,
            upserts_before_retained: 0,
            versions_pruned: 0,
        }
    }

    /// Insert a version, replacing any version at the same effective time.
    ///
    /// Out-of-order effective times are inserted in sorted position, including
    /// times earlier than anything retained for the key.
    pub fn upsert(
        &mut self,
        key: &str,
        effective_time: EventTime,
        value: impl Into<String>,
    ) -> Result<UpsertOutcome> {
        let history = self.histories.entry(key.to_string()).or_default();
        let before = history.next_prunable();
        let outcome = history.upsert(effective_time, value.into());
        let after = history.next_prunable();
        if before != after {
            if let Some(time) = before {
                self.prunable.remove(&(time, key.to_string()));
            }
            if let Some(time) = after {
                self.prunable.insert((time, key.to_string()));
            }
        }
        history.check_neighbors(key, effective_time)?;

        self.upserts += 1;
        match outcome {
            UpsertOutcome::Appended => self.version_count += 1,
            UpsertOutcome::InsertedOutOfOrder => {
                self.version_count += 1;
                self.out_of_order_upserts += 1;
            }
            UpsertOutcome::InsertedBeforeRetained => {
                self.version_count += 1;
                self.out_of_order_upserts += 1;
                self.upserts_before_retained += 1;
                debug!(
                    key,
                    effective_time = effective_time.0,
                    "state update precedes retained history"
                );
            }
            UpsertOutcome::Replaced | UpsertOutcome::Unchanged => {}
        }

        Ok(outcome)
    }

    /// Value of the latest version effective at or before `timestamp`.
    pub fn as_of(&self, key: &str, timestamp: EventTime) -> Option<&str> {
        self.as_of_version(key, timestamp).map(|v| v.value.as_str())
    }

    /// Latest version effective at or before `timestamp`.
    pub fn as_of_version(&self, key: &str, timestamp: EventTime) -> Option<&Version> {
        self.histories.get(key)?.as_of(timestamp)
    }

    /// Remove versions no lookup at or after `watermark - retention_window` can need.
    ///
    /// Only histories with a version superseded before the cutoff are visited.
    pub fn prune(&mut self, watermark: EventTime) -> usize {
        let cutoff = watermark.saturating_sub(self.retention_window);
        let mut removed = 0;
        while self
            .prunable
            .first()
            .map_or(false, |(time, _)| *time < cutoff)
        {
            let Some((_, key)) = self.prunable.pop_first() else {
                break;
            };
            if let Some(history) = self.histories.get_mut(&key) {
                removed += history.prune_before(cutoff);
                if let Some(next) = history.next_prunable() {
                    self.prunable.insert((next, key));
                }
            }
        }
        if removed > 0 {
            self.version_count -= removed;
            self.versions_pruned += removed as u64;
            trace!(removed, cutoff = cutoff.0, "pruned versions");
        }
        removed
    }

    pub fn latest(&self, key: &str) -> Option<&Version> {
        self.histories.get(key)?.latest()
    }

    pub fn versions(&self, key: &str) -> Option<&[Version]> {
        self.histories.get(key).map(|h| h.versions())
    }

    pub fn history(&self, key: &str) -> Option<&VersionHistory> {
        self.histories.get(key)
    }

    /// Check ordering of every history.
    pub fn verify(&self) -> Result<()> {
        for (key, history) in &self.histories {
            history.verify(key)?;
        }
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        self.histories.len()
    }

    pub fn version_count(&self) -> usize {
        self.version_count
    }

    pub fn retention_window(&self) -> Duration {
        self.retention_window
    }

    pub fn stats(&self) -> StateStats {
        StateStats {
            key_count: self.key_count(),
            version_count: self.version_count,
            upserts: self.upserts,
            out_of_order_upserts: self.out_of_order_upserts,
            upserts_before_retained: self.upserts_before_retained,
            versions_pruned: self.versions_pruned,
        }
    }
}
