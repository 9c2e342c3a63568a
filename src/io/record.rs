//! Click-stream record schema.
//!
//! Mirrors the `ClickEvent` / `EnrichedClickEvent` records of the upstream
//! topics: camelCase JSON with a millisecond `eventTime`.

use crate::error::{MalformedEvent, MalformedReason};
use crate::types::{EnrichedEvent, Event, EventKind, EventTime, Passthrough};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CLICK_ID: &str = "clickId";
const EVENT_TYPE: &str = "eventType";
const PRODUCT_ID: &str = "productId";
const QUERY: &str = "query";
const REFERRER: &str = "referrer";
const METADATA: &str = "metadata";

/// One click-stream record as it appears on the wire.
///
/// Every field is optional here so that incomplete records can be reported
/// instead of failing deserialization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickRecord {
    pub event_time: Option<i64>,
    pub user_id: Option<String>,
    pub click_id: Option<String>,
    pub event_type: Option<String>,
    pub search_id: Option<String>,
    pub product_id: Option<String>,
    pub query: Option<String>,
    pub referrer: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ClickRecord {
    /// Convert to an [`Event`].
    ///
    /// Records whose `eventType` equals `state_event_type` become state
    /// updates carrying their `searchId`; all others become lookups whose
    /// `searchId`, when present, is the explicit value.
    pub fn into_event(self, state_event_type: &str) -> Result<Event, MalformedEvent> {
        let event_time = match self.event_time {
            Some(t) => EventTime(t),
            None => {
                return Err(MalformedEvent::new(
                    MalformedReason::MissingEventTime,
                    self.describe(),
                ))
            }
        };
        let key = match self.user_id.as_deref() {
            Some(user) if !user.is_empty() => user.to_string(),
            _ => {
                return Err(
                    MalformedEvent::new(MalformedReason::MissingKey, self.describe())
                        .with_event_time(Some(event_time)),
                )
            }
        };

        let search_id = self.search_id.clone().filter(|s| !s.is_empty());
        let is_state = self.event_type.as_deref() == Some(state_event_type);
        if is_state && search_id.is_none() {
            return Err(
                MalformedEvent::new(MalformedReason::MissingStateValue, self.describe())
                    .with_event_time(Some(event_time)),
            );
        }

        let (kind, state_value, explicit_value) = if is_state {
            (EventKind::StateUpdate, search_id, None)
        } else {
            (EventKind::Lookup, None, search_id)
        };

        Ok(Event {
            event_time,
            key,
            kind,
            state_value,
            explicit_value,
            passthrough: self.into_passthrough(),
        })
    }

    /// Rebuild the wire record for an output event, with `searchId` set to
    /// the resolved value.
    pub fn from_enriched(event: &EnrichedEvent) -> Self {
        let field = |name: &str| {
            event
                .passthrough
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let metadata = event
            .passthrough
            .get(METADATA)
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            event_time: Some(event.event_time.0),
            user_id: Some(event.key.clone()),
            click_id: field(CLICK_ID),
            event_type: field(EVENT_TYPE),
            search_id: Some(event.result_value.clone()),
            product_id: field(PRODUCT_ID),
            query: field(QUERY),
            referrer: field(REFERRER),
            metadata,
        }
    }

    fn into_passthrough(self) -> Passthrough {
        let mut passthrough = Passthrough::new();
        let optional = [
            (CLICK_ID, self.click_id),
            (EVENT_TYPE, self.event_type),
            (PRODUCT_ID, self.product_id),
            (QUERY, self.query),
            (REFERRER, self.referrer),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                passthrough.insert(name.to_string(), value.into());
            }
        }
        let metadata: serde_json::Map<String, serde_json::Value> = self
            .metadata
            .into_iter()
            .map(|(k, v)| (k, v.into()))
            .collect();
        passthrough.insert(METADATA.to_string(), metadata.into());
        passthrough
    }

    fn describe(&self) -> String {
        format!(
            "clickId={} eventType={}",
            self.click_id.as_deref().unwrap_or("?"),
            self.event_type.as_deref().unwrap_or("?")
        )
    }
}
