//! Click-stream sample data and enrichment reporting.
//!
//! [`generate_click_stream`] produces the canonical sample session: one
//! search per user, followed by product clicks that carry no `searchId` and
//! must be enriched. [`EnrichmentSummary`] counts how many outputs were
//! enriched from state versus filled in by the fallback template.

use crate::config::FallbackTemplate;
use crate::io::ClickRecord;
use crate::types::{EnrichedEvent, EventTime, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// `eventType` of the session-opening record.
pub const SEARCH_EVENT_TYPE: &str = "search";
/// `eventType` of the records that need enrichment.
pub const PRODUCT_CLICK_EVENT_TYPE: &str = "product_click";
/// Product clicks generated per user.
pub const CLICKS_PER_SEARCH: usize = 4;
/// Gap between consecutive records of one user, in milliseconds.
pub const CLICK_INTERVAL_MS: i64 = 2_000;

fn sample_metadata() -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("browser".to_string(), "chrome".to_string());
    metadata.insert("device".to_string(), "desktop".to_string());
    metadata
}

/// Generate a sample session for each user, starting at `base_time`.
///
/// Per user: a `search` record at `base_time` with `searchId`
/// `search-{user}`, then [`CLICKS_PER_SEARCH`] `product_click` records
/// [`CLICK_INTERVAL_MS`] apart without a `searchId`. Output is grouped by
/// user in the order given.
pub fn generate_click_stream(users: &[&str], base_time: EventTime) -> Vec<ClickRecord> {
    let mut records = Vec::with_capacity(users.len() * (CLICKS_PER_SEARCH + 1));

    for user in users {
        records.push(ClickRecord {
            event_time: Some(base_time.0),
            user_id: Some(user.to_string()),
            click_id: Some(format!("click-{}-0", user)),
            event_type: Some(SEARCH_EVENT_TYPE.to_string()),
            search_id: Some(format!("search-{}", user)),
            product_id: None,
            query: Some(format!("search query for {}", user)),
            referrer: Some("google.com".to_string()),
            metadata: sample_metadata(),
        });

        for i in 1..=CLICKS_PER_SEARCH {
            records.push(ClickRecord {
                event_time: Some(click_time(base_time, i).0),
                user_id: Some(user.to_string()),
                click_id: Some(format!("click-{}-{}", user, i)),
                event_type: Some(PRODUCT_CLICK_EVENT_TYPE.to_string()),
                search_id: None,
                product_id: Some(format!("product_{}", i)),
                query: None,
                referrer: Some("search_results".to_string()),
                metadata: sample_metadata(),
            });
        }
    }
    records
}

fn click_time(base_time: EventTime, click: usize) -> EventTime {
    let offset = CLICK_INTERVAL_MS.unsigned_abs().saturating_mul(click as u64);
    base_time.saturating_add(Duration::from_millis(offset))
}

/// Enriched and fallback counts for one key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySummary {
    pub enriched: u64,
    pub fallback: u64,
}

/// Tally of a run's output.
///
/// An output is counted as a fallback when its value is exactly what the
/// fallback template renders for its key, so the tally also works on output
/// read back from the wire, where the resolution is not recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub total: u64,
    pub enriched: u64,
    pub fallback: u64,
    /// State updates echoed to the output; not part of the other counts.
    pub mirrored: u64,
    pub per_key: BTreeMap<String, KeySummary>,
}

impl EnrichmentSummary {
    pub fn from_events(events: &[EnrichedEvent], template: &FallbackTemplate) -> Self {
        let mut summary = Self::default();
        for event in events {
            if event.resolution == Resolution::Mirrored {
                summary.mirrored += 1;
                continue;
            }
            summary.record(&event.key, &event.result_value, template);
        }
        summary
    }

    /// Tally click records as written by a click-format sink. Records without
    /// a user or search id are skipped.
    pub fn from_records(records: &[ClickRecord], template: &FallbackTemplate) -> Self {
        let mut summary = Self::default();
        for record in records {
            if let (Some(user), Some(search_id)) = (&record.user_id, &record.search_id) {
                summary.record(user, search_id, template);
            }
        }
        summary
    }

    fn record(&mut self, key: &str, value: &str, template: &FallbackTemplate) {
        self.total += 1;
        let entry = self.per_key.entry(key.to_string()).or_default();
        if template.produced(key, value) {
            self.fallback += 1;
            entry.fallback += 1;
        } else {
            self.enriched += 1;
            entry.enriched += 1;
        }
    }

    /// Share of outputs enriched from state, or `None` with no output.
    pub fn enrichment_ratio(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.enriched as f64 / self.total as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, ShardId};

    #[test]
    fn test_generated_session_shape() {
        let records = generate_click_stream(&["user1", "user2"], EventTime(10_000));
        assert_eq!(records.len(), 10);

        let first = records[0].clone().into_event(SEARCH_EVENT_TYPE).unwrap();
        assert_eq!(first.kind, EventKind::StateUpdate);
        assert_eq!(first.state_value.as_deref(), Some("search-user1"));

        let clicks: Vec<_> = records[1..5]
            .iter()
            .map(|r| r.clone().into_event(SEARCH_EVENT_TYPE).unwrap())
            .collect();
        assert!(clicks.iter().all(|e| e.kind == EventKind::Lookup));
        assert!(clicks.iter().all(|e| e.explicit_value.is_none()));
        let times: Vec<i64> = clicks.iter().map(|e| e.event_time.0).collect();
        assert_eq!(times, vec![12_000, 14_000, 16_000, 18_000]);

        assert_eq!(records[5].user_id.as_deref(), Some("user2"));
        assert_eq!(records[5].event_time, Some(10_000));
    }

    #[test]
    fn test_generation_saturates_at_max_time() {
        let records = generate_click_stream(&["u"], EventTime(i64::MAX - 1));
        let times: Vec<i64> = records.iter().filter_map(|r| r.event_time).collect();
        assert_eq!(times.len(), 1 + CLICKS_PER_SEARCH);
        assert_eq!(times[0], i64::MAX - 1);
        assert!(times[1..].iter().all(|&t| t == i64::MAX));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate_click_stream(&["u"], EventTime(0));
        let b = generate_click_stream(&["u"], EventTime(0));
        assert_eq!(a, b);
        assert_eq!(a[2].click_id.as_deref(), Some("click-u-2"));
    }

    fn output(key: &str, value: &str, resolution: Resolution) -> EnrichedEvent {
        EnrichedEvent {
            event_time: EventTime(1),
            key: key.into(),
            result_value: value.into(),
            resolution,
            late: false,
            shard: ShardId(0),
            passthrough: Default::default(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let template = FallbackTemplate::default();
        let events = vec![
            output("user1", "search-user1", Resolution::State { effective_time: EventTime(0) }),
            output("user1", "search-user1", Resolution::State { effective_time: EventTime(0) }),
            output("user2", "enriched-user2", Resolution::Fallback),
            output("user2", "search-user2", Resolution::Mirrored),
        ];
        let summary = EnrichmentSummary::from_events(&events, &template);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.enriched, 2);
        assert_eq!(summary.fallback, 1);
        assert_eq!(summary.mirrored, 1);
        assert_eq!(summary.per_key["user1"].enriched, 2);
        assert_eq!(summary.per_key["user2"].fallback, 1);
        assert_eq!(summary.enrichment_ratio(), Some(2.0 / 3.0));
    }

    #[test]
    fn test_summary_from_records() {
        let template = FallbackTemplate::default();
        let records = vec![
            ClickRecord::from_enriched(&output("a", "s-a", Resolution::Explicit)),
            ClickRecord::from_enriched(&output("b", "enriched-b", Resolution::Fallback)),
            ClickRecord::default(),
        ];
        let summary = EnrichmentSummary::from_records(&records, &template);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.enriched, 1);
        assert_eq!(summary.fallback, 1);
        assert_eq!(EnrichmentSummary::default().enrichment_ratio(), None);
    }
}
