//! Container serialization.
//!
//! This module provides the [`ContainerSerializer`] trait, the contract the
//! chunk coordinator drives across segment transitions, and [`WebmSerializer`],
//! a live-profile WebM implementation of it.
//!
//! ## Lifecycle
//!
//! ```text
//! begin(streams, options)   -> serializer
//! write_header(out)           once, initialization segment
//! write_packet(out, pkt)*     into the open cluster (opened on demand)
//! flush_cluster(out)          closes the open cluster (segment end)
//! write_trailer(out)          closes the stream
//! drop                        end
//! ```
//!
//! The write target is passed on every call and may change between segments:
//! discrete delivery hands in a fresh buffer per segment. Implementations
//! never seek on `out`.

pub mod ebml;
pub mod webm;

use std::io::Write;
use std::sync::Arc;

use crate::error::{ConfigErrorKind, Result, SegmuxError};
use crate::stream::StreamDescriptor;

pub use webm::WebmSerializer;

/// Typed options for the container serializer, validated once at session open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerOptions {
    /// Write cluster bytes as packets arrive instead of buffering each
    /// cluster until it is flushed.
    pub is_low_latency: bool,
    /// Upper bound on a single cluster's duration. The serializer opens a
    /// new cluster on its own once a block would start past this limit.
    pub cluster_duration_ms: Option<u32>,
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            is_low_latency: true,
            cluster_duration_ms: None,
        }
    }
}

impl SerializerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.cluster_duration_ms == Some(0) {
            return Err(SegmuxError::config(ConfigErrorKind::ZeroClusterDuration));
        }
        Ok(())
    }
}

/// A packet as handed to the serializer: timestamps already normalized to
/// milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct MuxPacket<'a> {
    pub stream_index: usize,
    pub pts_ms: i64,
    pub keyframe: bool,
    pub data: &'a [u8],
}

/// Container format writer driven by the chunk coordinator.
///
/// I/O failures are reported as [`SegmuxError::SinkWrite`] tagged with the
/// lifecycle stage of the call; container invariant violations as
/// [`SegmuxError::Serializer`].
pub trait ContainerSerializer: Send {
    /// Create a serializer for an immutable snapshot of the session's streams.
    fn begin(streams: Arc<[StreamDescriptor]>, options: &SerializerOptions) -> Result<Self>
    where
        Self: Sized;

    /// Write the initialization segment (container header).
    fn write_header(&mut self, out: &mut dyn Write) -> Result<()>;

    /// Write one packet into the current cluster, opening one if needed.
    fn write_packet(&mut self, out: &mut dyn Write, packet: &MuxPacket<'_>) -> Result<()>;

    /// Close the current cluster so no data of it leaks into the next
    /// segment. Writes nothing if no cluster is open.
    fn flush_cluster(&mut self, out: &mut dyn Write) -> Result<()>;

    /// Finish the container stream.
    fn write_trailer(&mut self, out: &mut dyn Write) -> Result<()>;
}
