//! Version history for a single key.

use crate::error::{PipelineError, Result};
use crate::types::{EventTime, Version};

/// What an upsert did to a history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New latest version.
    Appended,
    /// Inserted between existing versions.
    InsertedOutOfOrder,
    /// Inserted before the earliest retained version of a pruned history.
    InsertedBeforeRetained,
    /// Replaced the value at an existing effective time.
    Replaced,
    /// Identical version already present.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the history changed.
    pub fn is_write(&self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

/// Versions of one key, strictly ordered by effective time.
#[derive(Clone, Debug, Default)]
pub struct VersionHistory {
    pub(crate) versions: Vec<Version>,
    /// Effective time of the newest version removed by pruning.
    pruned_through: Option<EventTime>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the version at `effective_time`.
    pub fn upsert(&mut self, effective_time: EventTime, value: String) -> UpsertOutcome {
        match self
            .versions
            .binary_search_by(|v| v.effective_time.cmp(&effective_time))
        {
            Ok(pos) => {
                let existing = &mut self.versions[pos];
                if existing.value == value {
                    UpsertOutcome::Unchanged
                } else {
                    existing.value = value;
                    UpsertOutcome::Replaced
                }
            }
            Err(pos) => {
                let len = self.versions.len();
                self.versions.insert(pos, Version::new(effective_time, value));
                if pos == len {
                    UpsertOutcome::Appended
                } else if pos == 0 && self.pruned_through.is_some() {
                    UpsertOutcome::InsertedBeforeRetained
                } else {
                    UpsertOutcome::InsertedOutOfOrder
                }
            }
        }
    }

    /// Latest version effective at or before `timestamp`.
    pub fn as_of(&self, timestamp: EventTime) -> Option<&Version> {
        let idx = self
            .versions
            .partition_point(|v| v.effective_time <= timestamp);
        idx.checked_sub(1).map(|i| &self.versions[i])
    }

    /// Drop versions whose successor became effective before `cutoff`.
    ///
    /// The latest version always survives.
    pub fn prune_before(&mut self, cutoff: EventTime) -> usize {
        let older = self.versions.partition_point(|v| v.effective_time < cutoff);
        let removable = older.saturating_sub(1);
        if removable > 0 {
            self.pruned_through = Some(self.versions[removable - 1].effective_time);
            self.versions.drain(..removable);
        }
        removable
    }

    /// Effective time at which the earliest version becomes prunable.
    ///
    /// `None` while the history has a single version.
    pub fn next_prunable(&self) -> Option<EventTime> {
        self.versions.get(1).map(|v| v.effective_time)
    }

    /// Check strict ordering around `effective_time`.
    pub fn check_neighbors(&self, key: &str, effective_time: EventTime) -> Result<()> {
        let pos = self
            .versions
            .partition_point(|v| v.effective_time < effective_time);
        let start = pos.saturating_sub(1);
        let end = (pos + 2).min(self.versions.len());
        self.check_range(key, start, end)
    }

    /// Check strict ordering across the whole history.
    pub fn verify(&self, key: &str) -> Result<()> {
        self.check_range(key, 0, self.versions.len())
    }

    fn check_range(&self, key: &str, start: usize, end: usize) -> Result<()> {
        if end <= start {
            return Ok(());
        }
        for pair in self.versions[start..end].windows(2) {
            if pair[0].effective_time >= pair[1].effective_time {
                return Err(PipelineError::InvariantViolation {
                    key: key.to_string(),
                    detail: format!(
                        "{:?} is not before {:?}",
                        pair[0].effective_time, pair[1].effective_time
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }

    pub fn earliest(&self) -> Option<&Version> {
        self.versions.first()
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn pruned_through(&self) -> Option<EventTime> {
        self.pruned_through
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
