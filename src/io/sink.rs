//! Event sink adapters.

use crate::error::SinkError;
use crate::types::EnrichedEvent;
use crossbeam_channel::{SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::Write;
use std::time::Duration;

use super::record::ClickRecord;

/// Destination for enriched events.
///
/// Called concurrently from every shard worker. A returned error is treated
/// as retryable; the same event is offered again after a backoff.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: &EnrichedEvent) -> Result<(), SinkError>;

    /// Flush buffered output. Called once by the pipeline after all shards stop.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps every accepted event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<EnrichedEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything accepted so far.
    pub fn events(&self) -> Vec<EnrichedEvent> {
        self.events.lock().clone()
    }

    /// Remove and return everything accepted so far.
    pub fn take(&self) -> Vec<EnrichedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for CollectingSink {
    fn accept(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events into a channel; a full channel is a retryable rejection.
pub struct ChannelSink {
    sender: Sender<EnrichedEvent>,
    send_timeout: Duration,
}

impl ChannelSink {
    pub fn new(sender: Sender<EnrichedEvent>, send_timeout: Duration) -> Self {
        Self {
            sender,
            send_timeout,
        }
    }
}

impl EventSink for ChannelSink {
    fn accept(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        match self.sender.send_timeout(event.clone(), self.send_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                Err(SinkError::Rejected("channel full".into()))
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(SinkError::Disconnected),
        }
    }
}

/// Line layout written by [`JsonLinesSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The click-stream schema with `searchId` set to the result.
    #[default]
    ClickRecord,
    /// The full [`EnrichedEvent`], including how it was resolved.
    Enriched,
}

/// Writes one JSON object per line; writes are serialized by a mutex.
///
/// A line cut short by a failed write is terminated before the next line is
/// written, so the retried event starts on a fresh line and readers see the
/// fragment as a single malformed line.
pub struct JsonLinesSink<W> {
    output: Mutex<LineOutput<W>>,
    format: OutputFormat,
}

struct LineOutput<W> {
    writer: W,
    /// The last write failed and may have left a partial line.
    torn: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self::with_format(writer, OutputFormat::default())
    }

    pub fn with_format(writer: W, format: OutputFormat) -> Self {
        Self {
            output: Mutex::new(LineOutput {
                writer,
                torn: false,
            }),
            format,
        }
    }

    pub fn into_inner(self) -> W {
        self.output.into_inner().writer
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn accept(&self, event: &EnrichedEvent) -> Result<(), SinkError> {
        let mut line = match self.format {
            OutputFormat::ClickRecord => serde_json::to_vec(&ClickRecord::from_enriched(event))?,
            OutputFormat::Enriched => serde_json::to_vec(event)?,
        };
        line.push(b'\n');

        let mut output = self.output.lock();
        if output.torn {
            output.writer.write_all(b"\n")?;
            output.torn = false;
        }
        if let Err(e) = output.writer.write_all(&line) {
            output.torn = true;
            return Err(e.into());
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.output.lock().writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventTime, Resolution, ShardId};
    use crossbeam_channel::bounded;

    fn enriched(key: &str, value: &str) -> EnrichedEvent {
        EnrichedEvent {
            event_time: EventTime(10),
            key: key.into(),
            result_value: value.into(),
            resolution: Resolution::Fallback,
            late: false,
            shard: ShardId(0),
            passthrough: Default::default(),
        }
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        sink.accept(&enriched("a", "x")).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_channel_sink_rejects_when_full() {
        let (tx, rx) = bounded(1);
        let sink = ChannelSink::new(tx, Duration::from_millis(5));
        sink.accept(&enriched("a", "x")).unwrap();
        assert!(matches!(
            sink.accept(&enriched("a", "y")),
            Err(SinkError::Rejected(_))
        ));

        drop(rx);
        assert!(matches!(
            sink.accept(&enriched("a", "z")),
            Err(SinkError::Disconnected)
        ));
    }

    #[test]
    fn test_json_lines_click_format() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.accept(&enriched("user1", "enriched-user1")).unwrap();
        sink.accept(&enriched("user2", "s-2")).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["userId"], "user1");
        assert_eq!(first["searchId"], "enriched-user1");
        assert_eq!(first["eventTime"], 10);
    }

    /// Accepts `fail_at` bytes, then fails one write.
    struct ShortWriter {
        buf: Vec<u8>,
        fail_at: Option<usize>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if let Some(limit) = self.fail_at {
                let room = limit.saturating_sub(self.buf.len());
                if room == 0 {
                    self.fail_at = None;
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
                }
                let n = room.min(data.len());
                self.buf.extend_from_slice(&data[..n]);
                return Ok(n);
            }
            self.buf.extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_retry_after_torn_write() {
        let sink = JsonLinesSink::new(ShortWriter {
            buf: Vec::new(),
            fail_at: Some(5),
        });
        assert!(matches!(
            sink.accept(&enriched("user1", "v1")),
            Err(SinkError::Io(_))
        ));
        sink.accept(&enriched("user1", "v1")).unwrap();
        sink.accept(&enriched("user2", "v2")).unwrap();

        let output = String::from_utf8(sink.into_inner().buf).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), 5);
        assert!(serde_json::from_str::<serde_json::Value>(lines[0]).is_err());

        let retried: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(retried["userId"], "user1");
        let next: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(next["userId"], "user2");
    }

    #[test]
    fn test_json_lines_enriched_format() {
        let sink = JsonLinesSink::with_format(Vec::new(), OutputFormat::Enriched);
        sink.accept(&enriched("user1", "v")).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: EnrichedEvent = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed, enriched("user1", "v"));
    }
}
