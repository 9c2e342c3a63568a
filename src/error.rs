//! Error types for the enrichment pipeline.

use crate::types::{EventTime, ShardId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Malformed(#[from] MalformedEvent),

    #[error("Version ordering violated for key {key}: {detail}")]
    InvariantViolation { key: String, detail: String },

    #[error("Shard {shard} failed: {reason}")]
    ShardFatal { shard: ShardId, reason: String },

    #[error("Shard {0} panicked")]
    ShardPanicked(ShardId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            PipelineError::Deserialization(e.to_string())
        } else {
            PipelineError::Serialization(e.to_string())
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure reported by an [`EventSink`](crate::io::EventSink).
///
/// Every variant is treated as retryable by the shard worker.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink rejected event: {0}")]
    Rejected(String),

    #[error("Sink disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why an incoming record could not become an [`Event`](crate::types::Event).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    MissingKey,
    MissingEventTime,
    MissingStateValue,
    Unparseable,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MalformedReason::MissingKey => "missing key",
            MalformedReason::MissingEventTime => "missing event time",
            MalformedReason::MissingStateValue => "state update without a value",
            MalformedReason::Unparseable => "unparseable record",
        };
        f.write_str(text)
    }
}

/// A record rejected at the source boundary.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("Malformed event ({reason}): {detail}")]
pub struct MalformedEvent {
    pub reason: MalformedReason,
    /// Best-effort description of the offending record.
    pub detail: String,
    /// Event time, when one could be read.
    pub event_time: Option<EventTime>,
}

impl MalformedEvent {
    pub fn new(reason: MalformedReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            event_time: None,
        }
    }

    pub fn with_event_time(mut self, event_time: Option<EventTime>) -> Self {
        self.event_time = event_time;
        self
    }
}
