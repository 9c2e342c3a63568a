//! Event source adapters.

use crate::error::{MalformedEvent, MalformedReason};
use crate::types::Event;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::{self, BufRead};
use std::time::Duration;

use super::record::ClickRecord;

/// Result of polling a source once.
#[derive(Clone, Debug, PartialEq)]
pub enum SourcePoll {
    Event(Event),
    /// A record that could not become an event.
    Malformed(MalformedEvent),
    /// Nothing arrived within the timeout.
    Idle,
    /// The source will never produce again.
    Exhausted,
}

/// Lazy, possibly unbounded producer of events.
///
/// Ordering is only assumed within a source partition; the pipeline routes
/// each event by [`EventSource::partition_key`].
pub trait EventSource {
    /// Wait up to `timeout` for the next record.
    fn poll_next(&mut self, timeout: Duration) -> SourcePoll;

    /// Key used to pick the shard for `event`.
    fn partition_key<'a>(&self, event: &'a Event) -> &'a str {
        &event.key
    }
}

/// Source over an in-memory iterator of events.
pub struct IterSource<I> {
    events: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Event>,
{
    pub fn new(events: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            events: events.into_iter(),
        }
    }
}

impl<I> EventSource for IterSource<I>
where
    I: Iterator<Item = Event>,
{
    fn poll_next(&mut self, _timeout: Duration) -> SourcePoll {
        match self.events.next() {
            Some(event) => SourcePoll::Event(event),
            None => SourcePoll::Exhausted,
        }
    }
}

/// Source over click-stream records, converted on the way in.
pub struct ClickRecordSource<I> {
    records: I,
    state_event_type: String,
}

impl<I> ClickRecordSource<I>
where
    I: Iterator<Item = ClickRecord>,
{
    pub fn new(
        records: impl IntoIterator<IntoIter = I>,
        state_event_type: impl Into<String>,
    ) -> Self {
        Self {
            records: records.into_iter(),
            state_event_type: state_event_type.into(),
        }
    }
}

impl<I> EventSource for ClickRecordSource<I>
where
    I: Iterator<Item = ClickRecord>,
{
    fn poll_next(&mut self, _timeout: Duration) -> SourcePoll {
        match self.records.next() {
            Some(record) => match record.into_event(&self.state_event_type) {
                Ok(event) => SourcePoll::Event(event),
                Err(malformed) => SourcePoll::Malformed(malformed),
            },
            None => SourcePoll::Exhausted,
        }
    }
}

/// Source fed by another thread through a channel.
///
/// Exhausted once every sender is dropped and the channel is empty.
pub struct ChannelSource {
    receiver: Receiver<Event>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<Event>) -> Self {
        Self { receiver }
    }
}

impl EventSource for ChannelSource {
    fn poll_next(&mut self, timeout: Duration) -> SourcePoll {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => SourcePoll::Event(event),
            Err(RecvTimeoutError::Timeout) => SourcePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Exhausted,
        }
    }
}

/// Source reading one JSON [`ClickRecord`] per line.
///
/// Blank lines are skipped; lines that are not UTF-8 or fail to parse are
/// reported as malformed. Only end of input or a read error ends the stream.
pub struct JsonLinesSource<R> {
    reader: R,
    state_event_type: String,
    line: Vec<u8>,
    line_number: u64,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R, state_event_type: impl Into<String>) -> Self {
        Self {
            reader,
            state_event_type: state_event_type.into(),
            line: Vec::new(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> EventSource for JsonLinesSource<R> {
    fn poll_next(&mut self, _timeout: Duration) -> SourcePoll {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return SourcePoll::Exhausted,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(line = self.line_number + 1, error = %e, "source read failed");
                    return SourcePoll::Exhausted;
                }
            }
            self.line_number += 1;

            let text = match std::str::from_utf8(&self.line) {
                Ok(text) => text.trim(),
                Err(e) => {
                    return SourcePoll::Malformed(MalformedEvent::new(
                        MalformedReason::Unparseable,
                        format!("line {}: {}", self.line_number, e),
                    ))
                }
            };
            if text.is_empty() {
                continue;
            }
            return match serde_json::from_str::<ClickRecord>(text) {
                Ok(record) => match record.into_event(&self.state_event_type) {
                    Ok(event) => SourcePoll::Event(event),
                    Err(malformed) => SourcePoll::Malformed(malformed),
                },
                Err(e) => SourcePoll::Malformed(MalformedEvent::new(
                    MalformedReason::Unparseable,
                    format!("line {}: {}", self.line_number, e),
                )),
            };
        }
    }
}
