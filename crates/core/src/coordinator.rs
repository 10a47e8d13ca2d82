//! Chunk coordinator: segment transitions over a single ingestion path.
//!
//! The coordinator owns the container serializer, the primary output and the
//! metadata emitter for one session, and keeps them in lockstep:
//!
//! ```text
//! packet ─▶ policy ─▶ (end segment: flush cluster, deliver object)
//!                     (start segment: tell() ─▶ MEDIA_START event)
//!        ─▶ serializer.write_packet ─▶ primary output
//! ```
//!
//! ## Session lifecycle
//!
//! ```text
//! open_session   NotStarted -> HeaderWritten     (INITIALIZATION_START @ 0)
//! ingest         HeaderWritten -> MediaOpen      (MEDIA_START @ header size)
//! ingest         MediaOpen -> MediaClosed -> MediaOpen   (on each boundary)
//! close_session  * -> Finished                   (trailer, sinks released)
//! any failure    * -> Failed                     (all further calls rejected)
//! ```
//!
//! Every boundary event is emitted before any byte of its segment is
//! written, and its offset is the exact number of bytes in the primary
//! output at that moment. The output is never rewound.
//!
//! Ingestion is strictly sequential; the coordinator is `Send` but not meant
//! to be shared between threads.

use std::io::Write;
use std::sync::Arc;

use crate::config::{ChunkerConfig, Delivery};
use crate::container::{ContainerSerializer, MuxPacket, WebmSerializer};
use crate::error::{Result, SegmuxError, Stage};
use crate::metadata::{BoundaryEvent, EventKind, MetadataEmitter};
use crate::policy::{DurationAccumulator, PolicyState, SegmentPolicy};
use crate::sink::{DirectoryObjectSink, MediaOutput, ObjectKey, open_destination};
use crate::stream::{Packet, StreamDescriptor, TimeBase};

/// Session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    /// Header written, no media segment started yet.
    HeaderWritten,
    /// A media segment is open and receiving packets.
    MediaOpen,
    /// Between segments: the previous one ended, the next has not started.
    MediaClosed,
    Finished,
    /// A call failed; the output position is no longer trustworthy.
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::HeaderWritten => "header-written",
            Self::MediaOpen => "media-open",
            Self::MediaClosed => "media-closed",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Whether packets may be ingested in this state.
    pub fn accepts_packets(&self) -> bool {
        matches!(
            self,
            Self::HeaderWritten | Self::MediaOpen | Self::MediaClosed
        )
    }
}

/// Totals reported by [`ChunkCoordinator::close_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub segments: u64,
    pub packets: u64,
    pub bytes: u64,
}

/// Coordinator driving the WebM serializer.
pub type WebmChunker = ChunkCoordinator<WebmSerializer>;

/// Segment-boundary engine for one session.
pub struct ChunkCoordinator<S: ContainerSerializer = WebmSerializer> {
    /// Time bases the incoming packet timestamps are expressed in.
    source_time_bases: Vec<TimeBase>,
    /// Snapshot handed to the serializer, normalized to milliseconds.
    streams: Arc<[StreamDescriptor]>,
    policy: SegmentPolicy,
    serializer: S,
    output: Option<MediaOutput>,
    metadata: MetadataEmitter,
    accumulator: DurationAccumulator,
    state: SessionState,
    low_latency: bool,
    segments_started: u64,
    packets_written: u64,
    last_event: Option<BoundaryEvent>,
}

impl<S: ContainerSerializer> ChunkCoordinator<S> {
    /// Open destinations from `config`, write the container header and emit
    /// the initialization boundary.
    ///
    /// Configuration is validated before any destination is opened.
    pub fn open_session(config: &ChunkerConfig, streams: Vec<StreamDescriptor>) -> Result<Self> {
        let policy = config.validate(&streams)?;

        let output = match &config.delivery {
            Delivery::Continuous => {
                let url = config.stream_url.as_deref().unwrap_or_default();
                MediaOutput::continuous(open_destination(url)?)
            }
            Delivery::Discrete { dir, prefix } => {
                MediaOutput::discrete(Box::new(DirectoryObjectSink::new(dir, prefix)?))
            }
        };
        let metadata = config
            .info_url
            .as_deref()
            .map(open_destination)
            .transpose()?;

        Self::start(config, streams, policy, output, metadata)
    }

    /// Like [`open_session`](Self::open_session), with caller-supplied sinks.
    /// The destination fields of `config` are ignored.
    pub fn open_with_sinks(
        config: &ChunkerConfig,
        streams: Vec<StreamDescriptor>,
        output: MediaOutput,
        metadata: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        config.serializer.validate()?;
        let policy = SegmentPolicy::resolve(&config.policy, &streams)?;
        Self::start(config, streams, policy, output, metadata)
    }

    /// Build the session from validated settings and write the header.
    fn start(
        config: &ChunkerConfig,
        streams: Vec<StreamDescriptor>,
        policy: SegmentPolicy,
        output: MediaOutput,
        metadata: Option<Box<dyn Write + Send>>,
    ) -> Result<Self> {
        let source_time_bases = streams.iter().map(|s| s.time_base).collect();
        let streams: Arc<[StreamDescriptor]> = streams
            .into_iter()
            .map(|s| StreamDescriptor {
                time_base: TimeBase::MILLIS,
                ..s
            })
            .collect();

        let serializer = S::begin(streams.clone(), &config.serializer)?;

        let mut coordinator = Self {
            source_time_bases,
            streams,
            policy,
            serializer,
            output: Some(output),
            metadata: MetadataEmitter::new(metadata, config.wall_clock),
            accumulator: DurationAccumulator::new(),
            state: SessionState::NotStarted,
            low_latency: config.serializer.is_low_latency,
            segments_started: 0,
            packets_written: 0,
            last_event: None,
        };
        coordinator.write_initialization()?;

        tracing::info!(
            tracks = coordinator.streams.len(),
            policy = ?coordinator.policy,
            discrete = coordinator.output_ref().is_some_and(MediaOutput::is_discrete),
            metadata = coordinator.metadata.is_enabled(),
            header_bytes = coordinator.bytes_written(),
            "session opened"
        );
        Ok(coordinator)
    }

    /// Write one packet, starting a new segment first if the policy says so.
    ///
    /// Any error leaves the session in [`SessionState::Failed`]; every later
    /// call is rejected instead of resuming on an output of unknown position.
    pub fn ingest(&mut self, packet: &Packet) -> Result<()> {
        if !self.state.accepts_packets() {
            return Err(SegmuxError::InvalidState {
                operation: "ingest",
                state: self.state.name(),
            });
        }
        let result = self.ingest_packet(packet);
        if result.is_err() {
            self.state = SessionState::Failed;
        }
        result
    }

    /// Finish the session: make sure a media segment exists (possibly
    /// empty), write the trailer, deliver the last segment and release both
    /// sinks.
    ///
    /// Not idempotent: a second call is rejected with
    /// [`SegmuxError::InvalidState`].
    pub fn close_session(&mut self) -> Result<SessionSummary> {
        if !self.state.accepts_packets() {
            return Err(SegmuxError::InvalidState {
                operation: "close_session",
                state: self.state.name(),
            });
        }
        let result = self.finish();
        match &result {
            Ok(summary) => {
                tracing::info!(
                    segments = summary.segments,
                    packets = summary.packets,
                    bytes = summary.bytes,
                    events = self.metadata.emitted(),
                    "session closed"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "session close failed");
                self.state = SessionState::Failed;
                self.output = None;
            }
        }
        result
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn policy(&self) -> SegmentPolicy {
        self.policy
    }

    /// Streams as seen by the serializer (millisecond time base).
    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Exact size of the primary output so far.
    pub fn bytes_written(&self) -> u64 {
        self.output_ref().map_or(0, MediaOutput::tell)
    }

    /// Number of media segments started.
    pub fn segments_started(&self) -> u64 {
        self.segments_started
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn last_event(&self) -> Option<BoundaryEvent> {
        self.last_event
    }

    fn output_ref(&self) -> Option<&MediaOutput> {
        self.output.as_ref()
    }

    fn write_initialization(&mut self) -> Result<()> {
        let output = open_output(&mut self.output)?;
        output.begin_object()?;
        let offset = output.tell();
        self.last_event = Some(self.metadata.emit(EventKind::InitializationStart, offset)?);

        self.serializer.write_header(output.writer()?)?;
        output.finish_object(ObjectKey::Initialization)?;
        output.flush(Stage::OpenSession)?;

        self.state = SessionState::HeaderWritten;
        Ok(())
    }

    fn ingest_packet(&mut self, packet: &Packet) -> Result<()> {
        let index = packet.stream_index;
        let stream = self
            .streams
            .get(index)
            .ok_or(SegmuxError::UnknownStream(index))?;
        let pts_ms = self.source_time_bases[index]
            .rescale_to_millis(packet.pts)
            .ok_or_else(|| {
                SegmuxError::Serializer(format!(
                    "timestamp {} of stream {index} not representable in ms",
                    packet.pts
                ))
            })?;

        if self.policy.reference_stream() == Some(index) {
            self.accumulator.observe(pts_ms);
        }

        let policy_state = PolicyState {
            segment_open: self.state == SessionState::MediaOpen,
            elapsed_ms: self.accumulator.elapsed_ms(),
        };
        if self
            .policy
            .should_start_new_segment(packet, stream, &policy_state)
        {
            if self.state == SessionState::MediaOpen {
                self.end_segment(true)?;
            }
            self.start_segment()?;
            self.accumulator.reset();
        }

        let output = open_output(&mut self.output)?;
        let mux_packet = MuxPacket {
            stream_index: index,
            pts_ms,
            keyframe: packet.keyframe,
            data: &packet.data,
        };
        self.serializer.write_packet(output.writer()?, &mux_packet)?;
        if self.low_latency {
            output.flush(Stage::Ingest)?;
        }

        self.packets_written += 1;
        tracing::trace!(
            stream = index,
            pts_ms,
            keyframe = packet.keyframe,
            bytes = packet.data.len(),
            "packet written"
        );
        Ok(())
    }

    fn start_segment(&mut self) -> Result<()> {
        let output = open_output(&mut self.output)?;
        output.begin_object()?;
        let offset = output.tell();
        self.last_event = Some(self.metadata.emit(EventKind::MediaStart, offset)?);

        self.segments_started += 1;
        self.state = SessionState::MediaOpen;
        tracing::debug!(segment = self.segments_started - 1, offset, "media segment started");
        Ok(())
    }

    /// End the open segment. `flush` forces the serializer to close its
    /// cluster; the final segment end after the trailer does not need it.
    fn end_segment(&mut self, flush: bool) -> Result<()> {
        let output = open_output(&mut self.output)?;
        if flush {
            self.serializer.flush_cluster(output.writer()?)?;
        }
        output.finish_object(ObjectKey::Media(self.segments_started - 1))?;
        output.flush(Stage::SegmentEnd)?;

        self.state = SessionState::MediaClosed;
        tracing::debug!(
            segment = self.segments_started - 1,
            end = output.tell(),
            "media segment ended"
        );
        Ok(())
    }

    fn finish(&mut self) -> Result<SessionSummary> {
        if self.state != SessionState::MediaOpen {
            self.start_segment()?;
        }

        let output = open_output(&mut self.output)?;
        self.serializer.write_trailer(output.writer()?)?;
        self.end_segment(false)?;

        let bytes = self.bytes_written();
        if let Some(mut output) = self.output.take() {
            output.close()?;
        }
        self.metadata.close()?;
        self.state = SessionState::Finished;

        Ok(SessionSummary {
            segments: self.segments_started,
            packets: self.packets_written,
            bytes,
        })
    }
}

impl<S: ContainerSerializer> Drop for ChunkCoordinator<S> {
    fn drop(&mut self) {
        if self.state.accepts_packets() {
            tracing::warn!(
                state = self.state.name(),
                bytes = self.bytes_written(),
                "session dropped without close_session, output has no trailer"
            );
        }
    }
}

fn open_output(output: &mut Option<MediaOutput>) -> Result<&mut MediaOutput> {
    output.as_mut().ok_or(SegmuxError::InvalidState {
        operation: "write",
        state: "sinks released",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::sink::{MemoryObjectSink, MemorySink};
    use crate::stream::{Codec, TimeBase};

    fn video_streams() -> Vec<StreamDescriptor> {
        vec![StreamDescriptor::video(
            Codec::Vp8,
            320,
            240,
            TimeBase::MILLIS,
        )]
    }

    fn memory_session(config: &ChunkerConfig) -> (WebmChunker, MemorySink, MemorySink) {
        let media = MemorySink::new();
        let info = MemorySink::new();
        let chunker = WebmChunker::open_with_sinks(
            config,
            video_streams(),
            MediaOutput::continuous(Box::new(media.clone())),
            Some(Box::new(info.clone())),
        )
        .unwrap();
        (chunker, media, info)
    }

    fn events(info: &MemorySink) -> Vec<BoundaryEvent> {
        String::from_utf8(info.contents())
            .unwrap()
            .lines()
            .map(|l| BoundaryEvent::parse_line(l).unwrap())
            .collect()
    }

    #[test]
    fn open_writes_header_and_init_event() {
        let (chunker, media, info) = memory_session(&ChunkerConfig::default());
        assert_eq!(chunker.state(), SessionState::HeaderWritten);
        assert!(!media.is_empty());
        assert_eq!(chunker.bytes_written(), media.len() as u64);
        assert_eq!(
            events(&info),
            vec![BoundaryEvent::new(EventKind::InitializationStart, 0)]
        );
    }

    #[test]
    fn serializer_sees_millisecond_time_bases() {
        let streams = vec![StreamDescriptor::video(
            Codec::Vp9,
            640,
            480,
            TimeBase::new(1, 90_000),
        )];
        let chunker = WebmChunker::open_with_sinks(
            &ChunkerConfig::default(),
            streams,
            MediaOutput::continuous(Box::new(MemorySink::new())),
            None,
        )
        .unwrap();
        assert_eq!(chunker.streams()[0].time_base, TimeBase::MILLIS);
    }

    #[test]
    fn first_packet_opens_media_segment_at_header_size() {
        let (mut chunker, _media, info) = memory_session(&ChunkerConfig::default());
        let header = chunker.bytes_written();

        chunker.ingest(&Packet::new(0, 0, false, vec![1; 10])).unwrap();
        assert_eq!(chunker.state(), SessionState::MediaOpen);
        assert_eq!(chunker.segments_started(), 1);
        assert_eq!(
            events(&info)[1],
            BoundaryEvent::new(EventKind::MediaStart, header)
        );
    }

    #[test]
    fn ingest_after_close_is_rejected() {
        let (mut chunker, _media, _info) = memory_session(&ChunkerConfig::default());
        chunker.close_session().unwrap();
        assert_eq!(chunker.state(), SessionState::Finished);

        let err = chunker
            .ingest(&Packet::new(0, 0, true, vec![0]))
            .unwrap_err();
        assert!(matches!(
            err,
            SegmuxError::InvalidState {
                operation: "ingest",
                state: "finished"
            }
        ));
        assert!(chunker.close_session().is_err());
    }

    #[test]
    fn unknown_stream_fails_session() {
        let (mut chunker, _media, _info) = memory_session(&ChunkerConfig::default());
        let err = chunker
            .ingest(&Packet::new(3, 0, true, vec![0]))
            .unwrap_err();
        assert!(matches!(err, SegmuxError::UnknownStream(3)));
        assert_eq!(chunker.state(), SessionState::Failed);
    }

    #[test]
    fn config_errors_precede_io() {
        let config = ChunkerConfig {
            policy: PolicyConfig::Duration {
                chunk_duration_ms: None,
                reference_stream: None,
                keyframe_aligned: false,
            },
            ..ChunkerConfig::keyframe("/nonexistent/dir/out.webm")
        };
        let err = WebmChunker::open_session(&config, video_streams())
            .err()
            .expect("open should fail");
        assert!(err.is_config());
    }

    #[test]
    fn open_with_sinks_rejects_policy_before_header() {
        let media = MemorySink::new();
        let config = ChunkerConfig {
            policy: PolicyConfig::Duration {
                chunk_duration_ms: None,
                reference_stream: None,
                keyframe_aligned: false,
            },
            ..ChunkerConfig::default()
        };
        let err = WebmChunker::open_with_sinks(
            &config,
            video_streams(),
            MediaOutput::continuous(Box::new(media.clone())),
            None,
        )
        .err()
        .expect("open should fail");
        assert!(err.is_config());
        assert!(media.is_empty());
    }

    #[test]
    fn discrete_output_delivers_header_object() {
        let store = MemoryObjectSink::new();
        let chunker = WebmChunker::open_with_sinks(
            &ChunkerConfig::default(),
            video_streams(),
            MediaOutput::discrete(Box::new(store.clone())),
            None,
        )
        .unwrap();

        let objects = store.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].0, ObjectKey::Initialization);
        assert_eq!(objects[0].1.len() as u64, chunker.bytes_written());
    }

    #[test]
    fn low_latency_bytes_visible_before_segment_end() {
        let (mut chunker, media, _info) = memory_session(&ChunkerConfig::default());
        let header = media.len();
        chunker.ingest(&Packet::new(0, 0, true, vec![9; 100])).unwrap();
        assert!(media.len() > header + 100);
    }

    #[test]
    fn buffered_bytes_visible_at_segment_end() {
        let mut config = ChunkerConfig::default();
        config.serializer.is_low_latency = false;
        let (mut chunker, media, _info) = memory_session(&config);
        let header = media.len();

        chunker.ingest(&Packet::new(0, 0, true, vec![9; 100])).unwrap();
        assert_eq!(media.len(), header);

        chunker.ingest(&Packet::new(0, 33, true, vec![9; 100])).unwrap();
        assert!(media.len() > header + 100);
        assert_eq!(chunker.serializer().clusters_written(), 1);
    }
}
