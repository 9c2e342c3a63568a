//! Core types for the enrichment pipeline.

use crate::error::{MalformedEvent, MalformedReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opaque fields carried unmodified from a lookup event to its output.
pub type Passthrough = serde_json::Map<String, serde_json::Value>;

/// Event time in milliseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EventTime(pub i64);

impl EventTime {
    pub const MIN: EventTime = EventTime(i64::MIN);
    pub const MAX: EventTime = EventTime(i64::MAX);

    /// Current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        EventTime(millis)
    }

    pub fn from_millis(millis: i64) -> Self {
        EventTime(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Move back by `duration`, clamping at [`EventTime::MIN`].
    pub fn saturating_sub(self, duration: Duration) -> Self {
        EventTime(self.0.saturating_sub(duration_millis(duration)))
    }

    /// Move forward by `duration`, clamping at [`EventTime::MAX`].
    pub fn saturating_add(self, duration: Duration) -> Self {
        EventTime(self.0.saturating_add(duration_millis(duration)))
    }
}

impl fmt::Debug for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTime({})", self.0)
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<i64> for EventTime {
    fn from(millis: i64) -> Self {
        EventTime(millis)
    }
}

/// Whole milliseconds in `duration`, saturating at `i64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Index of an independent processing shard.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ShardId(pub usize);

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({})", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of an event in the join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Upserts a new version of the key's state.
    StateUpdate,
    /// Asks for the key's state as of the event time.
    Lookup,
}

/// An immutable, validated input event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_time: EventTime,
    pub key: String,
    pub kind: EventKind,
    /// Value to upsert (state updates only).
    pub state_value: Option<String>,
    /// Value already carried by a lookup; wins over any state.
    pub explicit_value: Option<String>,
    #[serde(default)]
    pub passthrough: Passthrough,
}

impl Event {
    /// Create a state update event.
    pub fn state_update(
        key: impl Into<String>,
        event_time: EventTime,
        value: impl Into<String>,
    ) -> Self {
        Self {
            event_time,
            key: key.into(),
            kind: EventKind::StateUpdate,
            state_value: Some(value.into()),
            explicit_value: None,
            passthrough: Passthrough::new(),
        }
    }

    /// Create a lookup event.
    pub fn lookup(key: impl Into<String>, event_time: EventTime) -> Self {
        Self {
            event_time,
            key: key.into(),
            kind: EventKind::Lookup,
            state_value: None,
            explicit_value: None,
            passthrough: Passthrough::new(),
        }
    }

    /// Set the explicit value of a lookup.
    pub fn with_explicit_value(mut self, value: impl Into<String>) -> Self {
        self.explicit_value = Some(value.into());
        self
    }

    /// Add a passthrough field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.passthrough.insert(name.into(), value.into());
        self
    }

    pub fn is_lookup(&self) -> bool {
        self.kind == EventKind::Lookup
    }

    /// Check the fields every shard relies on.
    pub fn validate(&self) -> Result<(), MalformedEvent> {
        if self.key.is_empty() {
            return Err(MalformedEvent::new(MalformedReason::MissingKey, self.describe())
                .with_event_time(Some(self.event_time)));
        }
        if self.kind == EventKind::StateUpdate && self.state_value.is_none() {
            return Err(
                MalformedEvent::new(MalformedReason::MissingStateValue, self.describe())
                    .with_event_time(Some(self.event_time)),
            );
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{:?} key={:?} at {}", self.kind, self.key, self.event_time)
    }
}

/// How an output value was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Resolution {
    /// The lookup carried its own value.
    Explicit,
    /// The version effective at the lookup's event time.
    State { effective_time: EventTime },
    /// No version existed; the fallback template was applied.
    Fallback,
    /// A state update copied to output for auditing.
    Mirrored,
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback)
    }
}

/// Output of the join: the lookup's fields plus the resolved value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub event_time: EventTime,
    pub key: String,
    pub result_value: String,
    pub resolution: Resolution,
    /// Resolved after the watermark had already passed the event time.
    pub late: bool,
    pub shard: ShardId,
    #[serde(default)]
    pub passthrough: Passthrough,
}

/// A single entry in a key's version history.
///
/// The key is implied by the history that owns the version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub effective_time: EventTime,
    pub value: String,
}

impl Version {
    pub fn new(effective_time: EventTime, value: impl Into<String>) -> Self {
        Self {
            effective_time,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_time_saturation() {
        let t = EventTime(10);
        assert_eq!(t.saturating_sub(Duration::from_millis(4)), EventTime(6));
        assert_eq!(EventTime::MIN.saturating_sub(Duration::from_secs(1)), EventTime::MIN);
        assert_eq!(EventTime::MAX.saturating_add(Duration::from_secs(1)), EventTime::MAX);
    }

    #[test]
    fn test_lookup_builder() {
        let event = Event::lookup("u1", EventTime(42))
            .with_explicit_value("direct")
            .with_field("clickId", "c-1");

        assert!(event.is_lookup());
        assert_eq!(event.event_time, EventTime(42));
        assert_eq!(event.explicit_value.as_deref(), Some("direct"));
        assert_eq!(event.passthrough["clickId"], "c-1");
    }

    #[test]
    fn test_validate() {
        assert!(Event::lookup("u1", EventTime(1)).validate().is_ok());
        assert!(Event::state_update("u1", EventTime(1), "s1").validate().is_ok());

        let err = Event::lookup("", EventTime(1)).validate().unwrap_err();
        assert_eq!(err.reason, MalformedReason::MissingKey);

        let mut update = Event::state_update("u1", EventTime(1), "s1");
        update.state_value = None;
        let err = update.validate().unwrap_err();
        assert_eq!(err.reason, MalformedReason::MissingStateValue);
        assert_eq!(err.event_time, Some(EventTime(1)));
    }

    #[test]
    fn test_resolution_serialization() {
        let json = serde_json::to_value(Resolution::State {
            effective_time: EventTime(7),
        })
        .unwrap();
        assert_eq!(json["source"], "state");
        assert_eq!(json["effective_time"], 7);
    }
}
