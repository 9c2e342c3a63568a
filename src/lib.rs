//! # Temporal Join
//!
//! An event-time stream enrichment engine. Lookup events are joined against
//! the versioned state of their key as it was at the lookup's event time,
//! not as it is when the lookup happens to arrive.
//!
//! ## Core Concepts
//!
//! - **Versioned state**: Every state update becomes a version of its key,
//!   searchable by effective time and pruned behind the watermark
//! - **Watermark**: `max(event time seen) - allowed_lateness` per shard;
//!   lookups wait until the watermark reaches them
//! - **Resolution**: explicit value, then state as of the event time, then a
//!   deterministic fallback rendered from the key
//! - **Shards**: keys are hashed to independent shards, each with its own
//!   thread, state and watermark
//!
//! ## Example
//!
//! ```ignore
//! use temporal_join::{
//!     generate_click_stream, run, ClickRecordSource, CollectingSink, EventTime, PipelineConfig,
//! };
//!
//! let records = generate_click_stream(&["user1", "user2"], EventTime::now());
//! let source = ClickRecordSource::new(records, "search");
//! let sink = Arc::new(CollectingSink::new());
//!
//! let report = run(source, sink.clone(), PipelineConfig::default())?;
//! assert!(report.is_healthy());
//!
//! for event in sink.events() {
//!     println!("{} -> {}", event.key, event.result_value);
//! }
//! ```

pub mod clickstream;
pub mod config;
pub mod error;
pub mod io;
pub mod join;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod state;
pub mod types;
pub mod watermark;

// Re-exports
pub use clickstream::{generate_click_stream, EnrichmentSummary, KeySummary};
pub use config::{FallbackTemplate, PipelineConfig, RetryPolicy};
pub use error::{MalformedEvent, MalformedReason, PipelineError, Result, SinkError};
pub use io::{
    ChannelSink, ChannelSource, ClickRecord, ClickRecordSource, CollectingSink, EventSink,
    EventSource, IterSource, JsonLinesSink, JsonLinesSource, OutputFormat, SourcePoll,
};
pub use join::TemporalJoinOperator;
pub use metrics::{ShardMetrics, ShardStats};
pub use partition::{key_hash, Partitioner};
pub use pipeline::{
    run, DeadLetter, Pipeline, PipelineMonitor, PipelineReport, ShardHealth, ShardReport,
    StopHandle,
};
pub use state::{StateStats, UpsertOutcome, VersionHistory, VersionedStateStore};
pub use types::*;
pub use watermark::WatermarkTracker;
