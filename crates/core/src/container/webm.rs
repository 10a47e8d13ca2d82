use std::io::Write;
use std::sync::Arc;

use super::ebml;
use super::{ContainerSerializer, MuxPacket, SerializerOptions};
use crate::error::{Result, SegmuxError, Stage};
use crate::stream::{MediaKind, StreamDescriptor};

const MUXING_APP: &str = concat!("segmux-", env!("CARGO_PKG_VERSION"));

/// Timecode scale in nanoseconds per tick: 1 ms, the de-facto WebM default.
const TIMECODE_SCALE_NS: u64 = 1_000_000;

/// SimpleBlock flag: the frame is a random access point.
const FLAG_KEYFRAME: u8 = 0x80;

/// Live-profile WebM writer.
///
/// Emits a Matroska stream restricted to the WebM subset, laid out for a
/// non-seekable output:
///
/// ```text
/// EBML header
/// Segment (unknown size)
///   Info    TimecodeScale = 1 ms, MuxingApp, WritingApp
///   Tracks  one TrackEntry per stream, TrackNumber = index + 1
///   Cluster Timecode, SimpleBlock, SimpleBlock, ...
///   Cluster ...
/// ```
///
/// No Cues or SeekHead are written since the output cannot be patched.
///
/// ## Cluster modes
///
/// - **Low latency** ([`SerializerOptions::is_low_latency`]): the Cluster
///   header is written with unknown size as soon as the first block arrives,
///   and each SimpleBlock is written immediately. A reader sees media bytes
///   while the cluster is still being produced. The cluster ends implicitly
///   where the next Cluster element (or end of stream) begins.
///
/// - **Buffered**: blocks accumulate in memory and the whole cluster is
///   written with a known size on [`flush_cluster`](ContainerSerializer::flush_cluster).
///
/// ## Cluster splitting
///
/// A block's timecode is stored as a signed 16-bit offset from its cluster's
/// timecode. When a packet would fall outside that range, or past
/// [`SerializerOptions::cluster_duration_ms`], a new cluster is opened inside
/// the current segment.
#[derive(Debug)]
pub struct WebmSerializer {
    streams: Arc<[StreamDescriptor]>,
    options: SerializerOptions,
    track_uids: Vec<u64>,
    cluster: Option<OpenCluster>,
    clusters_written: u64,
}

#[derive(Debug)]
struct OpenCluster {
    timecode: i64,
    /// Cluster body in buffered mode; always empty in low-latency mode.
    body: Vec<u8>,
    blocks: u32,
}

impl WebmSerializer {
    /// Number of clusters closed so far.
    pub fn clusters_written(&self) -> u64 {
        self.clusters_written
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);

        ebml::write_master(&mut buf, ebml::EBML_HEADER, |b| {
            ebml::write_uint(b, ebml::EBML_VERSION, 1);
            ebml::write_uint(b, ebml::EBML_READ_VERSION, 1);
            ebml::write_uint(b, ebml::EBML_MAX_ID_LENGTH, 4);
            ebml::write_uint(b, ebml::EBML_MAX_SIZE_LENGTH, 8);
            ebml::write_string(b, ebml::DOC_TYPE, "webm");
            ebml::write_uint(b, ebml::DOC_TYPE_VERSION, 4);
            ebml::write_uint(b, ebml::DOC_TYPE_READ_VERSION, 2);
        });

        ebml::write_id(&mut buf, ebml::SEGMENT);
        buf.extend_from_slice(&ebml::UNKNOWN_SIZE);

        ebml::write_master(&mut buf, ebml::INFO, |b| {
            ebml::write_uint(b, ebml::TIMECODE_SCALE, TIMECODE_SCALE_NS);
            ebml::write_string(b, ebml::MUXING_APP, MUXING_APP);
            ebml::write_string(b, ebml::WRITING_APP, MUXING_APP);
        });

        ebml::write_master(&mut buf, ebml::TRACKS, |b| {
            for (index, stream) in self.streams.iter().enumerate() {
                self.write_track_entry(b, index, stream);
            }
        });

        buf
    }

    fn write_track_entry(&self, buf: &mut Vec<u8>, index: usize, stream: &StreamDescriptor) {
        ebml::write_master(buf, ebml::TRACK_ENTRY, |b| {
            ebml::write_uint(b, ebml::TRACK_NUMBER, index as u64 + 1);
            // Fixed 8-byte width keeps the header size independent of the UIDs.
            ebml::write_binary(b, ebml::TRACK_UID, &self.track_uids[index].to_be_bytes());
            match stream.kind() {
                MediaKind::Video => {
                    ebml::write_uint(b, ebml::TRACK_TYPE, ebml::TRACK_TYPE_VIDEO)
                }
                MediaKind::Audio => {
                    ebml::write_uint(b, ebml::TRACK_TYPE, ebml::TRACK_TYPE_AUDIO)
                }
            }
            ebml::write_string(b, ebml::CODEC_ID, stream.codec.codec_id());
            if let Some(private) = &stream.codec_private {
                ebml::write_binary(b, ebml::CODEC_PRIVATE, private);
            }
            match stream.kind() {
                MediaKind::Video => ebml::write_master(b, ebml::VIDEO, |v| {
                    ebml::write_uint(v, ebml::PIXEL_WIDTH, stream.width as u64);
                    ebml::write_uint(v, ebml::PIXEL_HEIGHT, stream.height as u64);
                }),
                MediaKind::Audio => ebml::write_master(b, ebml::AUDIO, |a| {
                    ebml::write_float(a, ebml::SAMPLING_FREQUENCY, stream.sample_rate as f64);
                    ebml::write_uint(a, ebml::CHANNELS, stream.channels as u64);
                }),
            }
        });
    }

    /// Whether `pts_ms` can still be stored in the open cluster.
    fn fits_open_cluster(&self, cluster: &OpenCluster, pts_ms: i64) -> bool {
        let relative = pts_ms - cluster.timecode;
        if relative < i16::MIN as i64 || relative > i16::MAX as i64 {
            return false;
        }
        match self.options.cluster_duration_ms {
            Some(limit) if cluster.blocks > 0 => relative < limit as i64,
            _ => true,
        }
    }

    fn open_cluster(&mut self, out: &mut dyn Write, timecode: i64) -> Result<()> {
        if timecode < 0 {
            return Err(SegmuxError::Serializer(format!(
                "cluster timecode must not be negative, got {timecode} ms"
            )));
        }

        let mut timecode_element = Vec::with_capacity(10);
        ebml::write_uint(&mut timecode_element, ebml::TIMECODE, timecode as u64);

        let body = if self.options.is_low_latency {
            let mut head = Vec::with_capacity(4 + 8 + timecode_element.len());
            ebml::write_id(&mut head, ebml::CLUSTER);
            head.extend_from_slice(&ebml::UNKNOWN_SIZE);
            head.extend_from_slice(&timecode_element);
            out.write_all(&head).map_err(SegmuxError::write(Stage::Ingest))?;
            Vec::new()
        } else {
            timecode_element
        };

        tracing::trace!(timecode, "cluster opened");
        self.cluster = Some(OpenCluster {
            timecode,
            body,
            blocks: 0,
        });
        Ok(())
    }

    fn close_cluster(&mut self, out: &mut dyn Write, stage: Stage) -> Result<()> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };

        if !self.options.is_low_latency {
            let mut buf = Vec::with_capacity(12 + cluster.body.len());
            ebml::write_header(&mut buf, ebml::CLUSTER, cluster.body.len() as u64);
            buf.extend_from_slice(&cluster.body);
            out.write_all(&buf).map_err(SegmuxError::write(stage))?;
        }

        self.clusters_written += 1;
        tracing::trace!(
            timecode = cluster.timecode,
            blocks = cluster.blocks,
            "cluster closed"
        );
        Ok(())
    }
}

impl ContainerSerializer for WebmSerializer {
    fn begin(streams: Arc<[StreamDescriptor]>, options: &SerializerOptions) -> Result<Self> {
        options.validate()?;
        if streams.len() > 126 {
            return Err(SegmuxError::Serializer(format!(
                "at most 126 tracks supported, got {}",
                streams.len()
            )));
        }

        // TrackUID must be non-zero.
        let track_uids = (0..streams.len())
            .map(|_| rand::random::<u64>().max(1))
            .collect();

        tracing::debug!(
            tracks = streams.len(),
            low_latency = options.is_low_latency,
            "WebM serializer created"
        );

        Ok(Self {
            streams,
            options: *options,
            track_uids,
            cluster: None,
            clusters_written: 0,
        })
    }

    fn write_header(&mut self, out: &mut dyn Write) -> Result<()> {
        let header = self.header_bytes();
        out.write_all(&header)
            .map_err(SegmuxError::write(Stage::OpenSession))?;
        tracing::debug!(bytes = header.len(), "WebM header written");
        Ok(())
    }

    fn write_packet(&mut self, out: &mut dyn Write, packet: &MuxPacket<'_>) -> Result<()> {
        let is_audio = self
            .streams
            .get(packet.stream_index)
            .ok_or(SegmuxError::UnknownStream(packet.stream_index))?
            .is_audio();

        let fits = self
            .cluster
            .as_ref()
            .is_some_and(|c| self.fits_open_cluster(c, packet.pts_ms));
        if !fits {
            self.close_cluster(out, Stage::Ingest)?;
            self.open_cluster(out, packet.pts_ms)?;
        }

        let low_latency = self.options.is_low_latency;
        let Some(cluster) = self.cluster.as_mut() else {
            return Err(SegmuxError::Serializer("no open cluster".into()));
        };

        let relative = (packet.pts_ms - cluster.timecode) as i16;
        // Audio frames are always random access points.
        let flags = if packet.keyframe || is_audio {
            FLAG_KEYFRAME
        } else {
            0
        };

        let mut block = Vec::with_capacity(4 + packet.data.len());
        ebml::write_size(&mut block, packet.stream_index as u64 + 1);
        block.extend_from_slice(&relative.to_be_bytes());
        block.push(flags);
        block.extend_from_slice(packet.data);

        let mut element = Vec::with_capacity(9 + block.len());
        ebml::write_binary(&mut element, ebml::SIMPLE_BLOCK, &block);

        if low_latency {
            out.write_all(&element)
                .map_err(SegmuxError::write(Stage::Ingest))?;
        } else {
            cluster.body.extend_from_slice(&element);
        }
        cluster.blocks += 1;
        Ok(())
    }

    fn flush_cluster(&mut self, out: &mut dyn Write) -> Result<()> {
        self.close_cluster(out, Stage::SegmentEnd)
    }

    fn write_trailer(&mut self, out: &mut dyn Write) -> Result<()> {
        self.close_cluster(out, Stage::CloseSession)?;
        out.flush().map_err(SegmuxError::write(Stage::CloseSession))?;
        tracing::debug!(clusters = self.clusters_written, "WebM trailer written");
        Ok(())
    }
}
