//! Output sink adapters for the primary media bytes.
//!
//! Two delivery models are supported:
//!
//! - **Continuous** ([`MediaOutput::Continuous`]): one append-only,
//!   non-seekable byte stream. A segment becomes visible incrementally as
//!   its bytes land.
//!
//! - **Discrete** ([`MediaOutput::Discrete`]): every segment is accumulated
//!   in a fresh in-memory buffer and handed to an [`ObjectSink`] as one
//!   complete object when it ends. The container header is delivered as the
//!   [`ObjectKey::Initialization`] object, so the object lengths add up to
//!   the byte count the continuous model would have produced.
//!
//! In both models [`MediaOutput::tell`] is the exact offset of the next byte
//! in the logical stream.

pub mod object;
pub mod stream;

use std::io::Write;

use crate::error::{Result, SegmuxError, Stage};

pub use object::{DirectoryObjectSink, MemoryObjectSink, ObjectKey, ObjectSink};
pub use stream::{CountingWriter, MemorySink, open_destination};

/// Primary output of a session.
pub enum MediaOutput {
    Continuous(CountingWriter<Box<dyn Write + Send>>),
    Discrete(DiscreteOutput),
}

impl MediaOutput {
    pub fn continuous(writer: Box<dyn Write + Send>) -> Self {
        Self::Continuous(CountingWriter::new(writer))
    }

    pub fn discrete(sink: Box<dyn ObjectSink>) -> Self {
        Self::Discrete(DiscreteOutput {
            sink,
            buffer: None,
            delivered: 0,
            objects: 0,
        })
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete(_))
    }

    /// Offset of the next byte in the logical output stream.
    pub fn tell(&self) -> u64 {
        match self {
            Self::Continuous(w) => w.tell(),
            Self::Discrete(d) => d.delivered + d.buffer.as_ref().map_or(0, |b| b.len() as u64),
        }
    }

    /// Current write target for the serializer.
    ///
    /// In the discrete model this is the open object buffer; writing with no
    /// object open is a lifecycle error.
    pub fn writer(&mut self) -> Result<&mut dyn Write> {
        match self {
            Self::Continuous(w) => Ok(w as &mut dyn Write),
            Self::Discrete(d) => match d.buffer.as_mut() {
                Some(buf) => Ok(buf as &mut dyn Write),
                None => Err(SegmuxError::InvalidState {
                    operation: "write",
                    state: "no open object",
                }),
            },
        }
    }

    /// Start a new object. No-op for the continuous model.
    pub fn begin_object(&mut self) -> Result<()> {
        if let Self::Discrete(d) = self {
            if d.buffer.is_some() {
                return Err(SegmuxError::InvalidState {
                    operation: "begin_object",
                    state: "object already open",
                });
            }
            d.buffer = Some(Vec::new());
        }
        Ok(())
    }

    /// Hand the open object to the object sink. No-op for the continuous model.
    pub fn finish_object(&mut self, key: ObjectKey) -> Result<()> {
        if let Self::Discrete(d) = self {
            let Some(buf) = d.buffer.take() else {
                return Err(SegmuxError::InvalidState {
                    operation: "finish_object",
                    state: "no open object",
                });
            };
            let len = buf.len() as u64;
            d.sink
                .put(key, buf)
                .map_err(SegmuxError::write(Stage::ObjectDelivery))?;
            d.delivered += len;
            d.objects += 1;
            tracing::debug!(%key, bytes = len, total = d.objects, "object delivered");
        }
        Ok(())
    }

    /// Push buffered bytes of a continuous stream towards the consumer.
    pub fn flush(&mut self, stage: Stage) -> Result<()> {
        if let Self::Continuous(w) = self {
            w.flush().map_err(SegmuxError::write(stage))?;
        }
        Ok(())
    }

    /// Flush and release the underlying sink.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Self::Continuous(w) => w.flush().map_err(SegmuxError::write(Stage::CloseSession)),
            Self::Discrete(d) => d
                .sink
                .close()
                .map_err(SegmuxError::write(Stage::CloseSession)),
        }
    }
}

/// State of the accumulating output model.
pub struct DiscreteOutput {
    sink: Box<dyn ObjectSink>,
    buffer: Option<Vec<u8>>,
    /// Total length of the objects already delivered.
    delivered: u64,
    objects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_tell_follows_writes() {
        let sink = MemorySink::new();
        let mut out = MediaOutput::continuous(Box::new(sink.clone()));
        out.begin_object().unwrap();
        out.writer().unwrap().write_all(b"12345").unwrap();
        out.finish_object(ObjectKey::Media(0)).unwrap();
        assert_eq!(out.tell(), 5);
        assert_eq!(sink.contents(), b"12345");
    }

    #[test]
    fn discrete_tell_spans_objects() {
        let store = MemoryObjectSink::new();
        let mut out = MediaOutput::discrete(Box::new(store.clone()));

        out.begin_object().unwrap();
        out.writer().unwrap().write_all(b"head").unwrap();
        assert_eq!(out.tell(), 4);
        out.finish_object(ObjectKey::Initialization).unwrap();

        out.begin_object().unwrap();
        assert_eq!(out.tell(), 4);
        out.writer().unwrap().write_all(b"media").unwrap();
        assert_eq!(out.tell(), 9);
        out.finish_object(ObjectKey::Media(0)).unwrap();

        // Nothing is visible before an object is finished
        let objects = store.objects();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1], (ObjectKey::Media(0), b"media".to_vec()));
    }

    #[test]
    fn discrete_write_without_object_fails() {
        let mut out = MediaOutput::discrete(Box::new(MemoryObjectSink::new()));
        assert!(matches!(
            out.writer(),
            Err(SegmuxError::InvalidState { .. })
        ));
        assert!(out.finish_object(ObjectKey::Media(0)).is_err());
    }

    #[test]
    fn discrete_double_begin_fails() {
        let mut out = MediaOutput::discrete(Box::new(MemoryObjectSink::new()));
        out.begin_object().unwrap();
        assert!(out.begin_object().is_err());
    }

    #[test]
    fn discrete_close_closes_sink() {
        let store = MemoryObjectSink::new();
        let mut out = MediaOutput::discrete(Box::new(store.clone()));
        out.close().unwrap();
        assert!(store.is_closed());
    }
}
