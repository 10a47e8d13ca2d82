//! Segment boundary metadata (the side channel).
//!
//! Each segment transition is announced as one newline-terminated JSON
//! record on the metadata sink:
//!
//! ```text
//! {"event":1,"offset":0}
//! {"event":2,"offset":331}
//! {"event":2,"offset":48213,"wall_time":1760780000123}
//! ```
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `event` | `1` = initialization segment start, `2` = media segment start |
//! | `offset` | first byte of the segment, relative to the start of the primary stream |
//! | `wall_time` | optional, Unix time in ms when the segment was started, for latency monitoring |
//!
//! Offsets are written as JSON integers, so values above 2^53 are carried
//! exactly by the encoding. Readers that parse into doubles must take care
//! themselves.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmuxError, Stage};

/// Kind of segment that starts at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventKind {
    InitializationStart = 1,
    MediaStart = 2,
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for EventKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::InitializationStart),
            2 => Ok(Self::MediaStart),
            other => Err(format!("unknown event kind {other}")),
        }
    }
}

/// One segment boundary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryEvent {
    pub event: EventKind,
    pub offset: u64,
    #[serde(rename = "wall_time", default, skip_serializing_if = "Option::is_none")]
    pub wall_time_ms: Option<i64>,
}

impl BoundaryEvent {
    pub fn new(event: EventKind, offset: u64) -> Self {
        Self {
            event,
            offset,
            wall_time_ms: None,
        }
    }

    /// Serialize as one self-delimited record (JSON + `\n`).
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line =
            serde_json::to_vec(self).map_err(|e| SegmuxError::Serializer(e.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parse one record, with or without its trailing newline.
    pub fn parse_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end())
            .map_err(|e| SegmuxError::InvalidEvent(format!("{e}: {line:?}")))
    }
}

/// Writes boundary events to the optional metadata sink.
///
/// Each [`emit`](Self::emit) is one write followed by one flush so a reader
/// following the side channel sees the event promptly. Without a sink,
/// `emit` only builds the event.
pub struct MetadataEmitter {
    sink: Option<Box<dyn Write + Send>>,
    wall_clock: bool,
    emitted: u64,
}

impl MetadataEmitter {
    pub fn new(sink: Option<Box<dyn Write + Send>>, wall_clock: bool) -> Self {
        Self {
            sink,
            wall_clock,
            emitted: 0,
        }
    }

    /// Emitter with no side channel.
    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn emit(&mut self, kind: EventKind, offset: u64) -> Result<BoundaryEvent> {
        let mut event = BoundaryEvent::new(kind, offset);
        if self.wall_clock {
            event.wall_time_ms = Some(chrono::Utc::now().timestamp_millis());
        }

        if let Some(sink) = self.sink.as_mut() {
            let line = event.to_line()?;
            sink.write_all(&line)
                .map_err(SegmuxError::write(Stage::Metadata))?;
            sink.flush().map_err(SegmuxError::write(Stage::Metadata))?;
        }

        self.emitted += 1;
        tracing::debug!(event = ?kind, offset, "boundary event emitted");
        Ok(event)
    }

    /// Flush and release the side channel.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.flush()
                .map_err(SegmuxError::write(Stage::CloseSession))?;
        }
        Ok(())
    }
}
