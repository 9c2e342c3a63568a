//! Boundaries of the pipeline.
//!
//! The pipeline reads from an [`EventSource`] and writes to an
//! [`EventSink`]. Transports and schemas live behind these two traits:
//! - In-memory sources and sinks for tests and embedding
//! - Channel adapters for feeding from or draining to other threads
//! - JSON-lines adapters using the click-stream record schema
//!
//! # Example
//!
//! ```ignore
//! let input = std::io::BufReader::new(std::fs::File::open("clicks.jsonl")?);
//! let source = JsonLinesSource::new(input, "search");
//! let sink = Arc::new(JsonLinesSink::new(std::io::stdout()));
//!
//! let report = run(source, sink, PipelineConfig::default())?;
//! ```

mod record;
mod sink;
mod source;

pub use record::ClickRecord;
pub use sink::{ChannelSink, CollectingSink, EventSink, JsonLinesSink, OutputFormat};
pub use source::{
    ChannelSource, ClickRecordSource, EventSource, IterSource, JsonLinesSource, SourcePoll,
};
