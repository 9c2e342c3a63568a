//! Temporal (as-of) join.
//!
//! A lookup moves through two states: buffered on receipt, resolved once
//! the shard watermark reaches its event time. Resolution prefers the value
//! the lookup already carries, then the state version effective at the
//! lookup's event time, then the configured fallback template.
//!
//! # Example
//!
//! ```ignore
//! let mut op = TemporalJoinOperator::new(ShardId(0), &PipelineConfig::default());
//! let mut out = Vec::new();
//!
//! op.process(Event::state_update("user1", EventTime(1_000), "search-1"), &mut out)?;
//! op.process(Event::lookup("user1", EventTime(3_000)), &mut out)?;
//! op.flush(&mut out);
//!
//! assert_eq!(out[0].result_value, "search-1");
//! ```

mod buffer;
mod operator;

pub use buffer::LookupBuffer;
pub use operator::TemporalJoinOperator;
