//! Sharded execution.
//!
//! The driver polls an [`EventSource`](crate::io::EventSource) on the
//! calling thread and routes each event by key hash to one of
//! `shard_count` worker threads. Each worker owns a
//! [`TemporalJoinOperator`](crate::join::TemporalJoinOperator) and writes
//! resolved events to the shared sink, retrying rejected writes with
//! backoff.
//!
//! Events that cannot be processed are never dropped silently; they are
//! published as [`DeadLetter`]s:
//! - Malformed records, rejected before routing
//! - Events routed to a shard that has failed
//! - Output the sink refused on every attempt
//!
//! A failed shard does not stop the others. Its failure shows up in the
//! [`PipelineReport`] returned by [`Pipeline::run`].

mod dead_letter;
mod driver;
mod shard;

pub use dead_letter::DeadLetter;
pub use driver::{
    run, Pipeline, PipelineMonitor, PipelineReport, ShardReport, StopHandle,
};
pub use shard::ShardHealth;
