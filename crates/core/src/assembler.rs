//! Consumer side: re-splitting the primary stream with the boundary events.
//!
//! A relay that receives the media bytes and the metadata lines over two
//! separate connections cannot rely on them arriving in step. The
//! [`SegmentAssembler`] accepts both in any interleaving and yields each
//! segment once its end is known, i.e. once the next boundary event has
//! arrived and the media bytes have reached it.
//!
//! ```text
//! media:  [ header .......... | cluster ..... | cluster ...... ]
//! events:  1@0                 2@331           2@48213
//!          └─ Initialization ─┘└─ Media ──────┘└─ Media (finish)
//! ```
//!
//! The initialization segment is retained so that a late joiner can be
//! served the header followed by the next complete media segment.

use std::collections::VecDeque;

use crate::error::{Result, SegmuxError};
use crate::metadata::{BoundaryEvent, EventKind};

/// One complete segment recovered from the primary stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSegment {
    pub kind: EventKind,
    /// Offset of the first byte in the primary stream.
    pub start: u64,
    pub data: Vec<u8>,
}

impl AssembledSegment {
    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }
}

/// Splits the primary byte stream into segments using boundary events.
#[derive(Debug, Default)]
pub struct SegmentAssembler {
    /// Media bytes not yet assigned to a completed segment.
    buffer: Vec<u8>,
    /// Stream offset of `buffer[0]`.
    buffer_start: u64,
    /// Segment whose start is known and whose end is not.
    current: Option<BoundaryEvent>,
    /// Boundaries received ahead of the media.
    pending: VecDeque<BoundaryEvent>,
    last_offset: Option<u64>,
    init_segment: Option<Vec<u8>>,
}

impl SegmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total media bytes received.
    pub fn media_received(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    /// The initialization segment, once complete.
    pub fn init_segment(&self) -> Option<&[u8]> {
        self.init_segment.as_deref()
    }

    /// Append media bytes and return the segments they complete.
    pub fn push_media(&mut self, bytes: &[u8]) -> Vec<AssembledSegment> {
        self.buffer.extend_from_slice(bytes);
        self.drain()
    }

    /// Record a boundary and return the segments it completes.
    ///
    /// The first event must be an initialization start, every later one a
    /// media start, with non-decreasing offsets.
    pub fn push_event(&mut self, event: BoundaryEvent) -> Result<Vec<AssembledSegment>> {
        match (self.last_offset, event.event) {
            (None, EventKind::MediaStart) => {
                return Err(SegmuxError::InvalidEvent(format!(
                    "expected initialization start, got media start at {}",
                    event.offset
                )));
            }
            (Some(_), EventKind::InitializationStart) => {
                return Err(SegmuxError::InvalidEvent(format!(
                    "expected media start, got initialization start at {}",
                    event.offset
                )));
            }
            (Some(last), _) if event.offset < last => {
                return Err(SegmuxError::InvalidEvent(format!(
                    "expected offset >= {last}, got {}",
                    event.offset
                )));
            }
            _ => {}
        }
        self.last_offset = Some(event.offset);
        self.pending.push_back(event);
        Ok(self.drain())
    }

    /// Close the stream and return the trailing segment, if any.
    ///
    /// Fails if a boundary lies beyond the end of the received media.
    pub fn finish(mut self) -> Result<Option<AssembledSegment>> {
        if let Some(event) = self.pending.front() {
            return Err(SegmuxError::InvalidEvent(format!(
                "boundary at {} past end of media ({} bytes)",
                event.offset,
                self.media_received()
            )));
        }
        let Some(current) = self.current.take() else {
            if !self.buffer.is_empty() {
                tracing::warn!(bytes = self.buffer.len(), "media without boundary events dropped");
            }
            return Ok(None);
        };
        self.trim_to(current.offset);
        Ok(Some(AssembledSegment {
            kind: current.event,
            start: current.offset,
            data: std::mem::take(&mut self.buffer),
        }))
    }

    fn drain(&mut self) -> Vec<AssembledSegment> {
        let mut done = Vec::new();
        loop {
            if self.current.is_none() {
                match self.pending.pop_front() {
                    Some(event) => self.current = Some(event),
                    None => break,
                }
            }
            let Some(current) = self.current else { break };
            self.trim_to(current.offset);

            let Some(next) = self.pending.front().copied() else {
                break;
            };
            if self.media_received() < next.offset {
                break;
            }

            let len = (next.offset - current.offset) as usize;
            let rest = self.buffer.split_off(len);
            let data = std::mem::replace(&mut self.buffer, rest);
            self.buffer_start = next.offset;
            self.current = self.pending.pop_front();

            if current.event == EventKind::InitializationStart {
                self.init_segment = Some(data.clone());
            }
            tracing::debug!(kind = ?current.event, start = current.offset, bytes = len, "segment assembled");
            done.push(AssembledSegment {
                kind: current.event,
                start: current.offset,
                data,
            });
        }
        done
    }

    /// Discard buffered bytes that precede `offset`.
    fn trim_to(&mut self, offset: u64) {
        if self.buffer_start < offset {
            let n = (offset - self.buffer_start).min(self.buffer.len() as u64);
            self.buffer.drain(..n as usize);
            self.buffer_start += n;
        }
    }
}

/// Incremental tokenizer for the newline-delimited metadata channel.
///
/// Reads may end in the middle of a record; the partial line is held back
/// until its newline arrives.
#[derive(Debug, Default)]
pub struct InfoLineDecoder {
    partial: Vec<u8>,
}

impl InfoLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every complete record in `bytes`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<BoundaryEvent>> {
        self.partial.extend_from_slice(bytes);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        complete
            .split(|&b| b == b'\n')
            .filter_map(|line| decode_line(line).transpose())
            .collect()
    }

    /// Decode a final record that lacks its newline.
    pub fn finish(self) -> Result<Option<BoundaryEvent>> {
        decode_line(&self.partial)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<BoundaryEvent>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| SegmuxError::InvalidEvent(format!("metadata is not UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Ok(None);
    }
    BoundaryEvent::parse_line(text).map(Some)
}
