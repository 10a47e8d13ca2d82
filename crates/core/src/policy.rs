//! Segment boundary policy.
//!
//! Decides, packet by packet, whether a new media segment must start before
//! the packet is written. The decision itself is a pure function of the
//! packet, its stream and a [`PolicyState`] snapshot; the coordinator owns
//! the mutable bookkeeping ([`DurationAccumulator`]) and applies the result.
//!
//! ## Policies
//!
//! | Policy | New segment when |
//! |--------|------------------|
//! | [`Keyframe`](SegmentPolicy::Keyframe) | packet is a keyframe on the designated video stream |
//! | [`Duration`](SegmentPolicy::Duration) | time elapsed on the reference stream reached the threshold |
//!
//! Under both policies a packet arriving while no segment is open always
//! starts one. Conditions are disjunctive: a packet starts at most one
//! segment no matter how many of them hold.
//!
//! With the duration policy only the reference stream is consulted, and the
//! threshold alone triggers. Keyframes on other streams never trigger a
//! boundary. With `keyframe_aligned` set, a video reference stream defers the
//! boundary to its next keyframe.

use crate::config::PolicyConfig;
use crate::error::{ConfigErrorKind, Result, SegmuxError};
use crate::stream::{Packet, StreamDescriptor};

/// Resolved boundary policy, with concrete stream indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentPolicy {
    Keyframe { video_stream: usize },
    Duration {
        threshold_ms: u64,
        reference_stream: usize,
        /// Defer boundaries on a video reference stream to its next keyframe.
        keyframe_aligned: bool,
    },
}

/// Snapshot of coordinator state the decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyState {
    pub segment_open: bool,
    /// Milliseconds accumulated on the reference stream since the current
    /// segment started (duration policy only).
    pub elapsed_ms: u64,
}

impl SegmentPolicy {
    /// Resolve a policy configuration against the session's streams.
    ///
    /// Picks the first video stream for the keyframe policy, and the first
    /// audio stream (falling back to stream 0) as the duration reference,
    /// unless an index is configured explicitly.
    pub fn resolve(config: &PolicyConfig, streams: &[StreamDescriptor]) -> Result<Self> {
        if streams.is_empty() {
            return Err(SegmuxError::config(ConfigErrorKind::NoStreams));
        }

        match *config {
            PolicyConfig::Keyframe { video_stream } => {
                let video_stream = match video_stream {
                    Some(index) => {
                        let stream = streams
                            .get(index)
                            .ok_or(SegmuxError::config(ConfigErrorKind::StreamOutOfRange(index)))?;
                        if !stream.is_video() {
                            return Err(SegmuxError::config(ConfigErrorKind::NotVideo(index)));
                        }
                        index
                    }
                    None => streams
                        .iter()
                        .position(StreamDescriptor::is_video)
                        .ok_or(SegmuxError::config(ConfigErrorKind::NoVideoStream))?,
                };
                Ok(Self::Keyframe { video_stream })
            }
            PolicyConfig::Duration {
                chunk_duration_ms,
                reference_stream,
                keyframe_aligned,
            } => {
                let threshold_ms = match chunk_duration_ms {
                    None => return Err(SegmuxError::config(ConfigErrorKind::MissingChunkDuration)),
                    Some(0) => return Err(SegmuxError::config(ConfigErrorKind::ZeroChunkDuration)),
                    Some(ms) => ms as u64,
                };
                let reference_stream = match reference_stream {
                    Some(index) if index >= streams.len() => {
                        return Err(SegmuxError::config(ConfigErrorKind::StreamOutOfRange(index)));
                    }
                    Some(index) => index,
                    None => streams
                        .iter()
                        .position(StreamDescriptor::is_audio)
                        .unwrap_or(0),
                };
                Ok(Self::Duration {
                    threshold_ms,
                    reference_stream,
                    keyframe_aligned,
                })
            }
        }
    }

    /// Stream whose timestamps feed the [`DurationAccumulator`], if any.
    pub fn reference_stream(&self) -> Option<usize> {
        match self {
            Self::Keyframe { .. } => None,
            Self::Duration {
                reference_stream, ..
            } => Some(*reference_stream),
        }
    }

    /// Whether `packet` must be preceded by a new segment.
    ///
    /// Pure: `state` must already include this packet's contribution to the
    /// elapsed time.
    pub fn should_start_new_segment(
        &self,
        packet: &Packet,
        stream: &StreamDescriptor,
        state: &PolicyState,
    ) -> bool {
        if !state.segment_open {
            return true;
        }

        match *self {
            Self::Keyframe { video_stream } => {
                packet.stream_index == video_stream && packet.keyframe
            }
            Self::Duration {
                threshold_ms,
                reference_stream,
                keyframe_aligned,
            } => {
                packet.stream_index == reference_stream
                    && state.elapsed_ms >= threshold_ms
                    && (!keyframe_aligned || !stream.is_video() || packet.keyframe)
            }
        }
    }
}

/// Milliseconds elapsed on the reference stream since the last segment start.
///
/// Driven by presentation-timestamp deltas between consecutive reference
/// packets. Backwards steps contribute nothing.
#[derive(Debug, Clone, Default)]
pub struct DurationAccumulator {
    elapsed_ms: u64,
    prev_pts_ms: Option<i64>,
}

impl DurationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a reference-stream packet and return the new total.
    pub fn observe(&mut self, pts_ms: i64) -> u64 {
        if let Some(prev) = self.prev_pts_ms {
            let delta = pts_ms.saturating_sub(prev);
            if delta > 0 {
                self.elapsed_ms = self.elapsed_ms.saturating_add(delta as u64);
            } else if delta < 0 {
                tracing::warn!(prev, pts_ms, "reference timestamp went backwards");
            }
        }
        self.prev_pts_ms = Some(pts_ms);
        self.elapsed_ms
    }

    /// Zero the elapsed time at a segment start. The last timestamp is kept
    /// so the next delta is measured from the boundary packet.
    pub fn reset(&mut self) {
        self.elapsed_ms = 0;
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Codec, TimeBase};

    fn video() -> StreamDescriptor {
        StreamDescriptor::video(Codec::Vp8, 320, 240, TimeBase::MILLIS)
    }

    fn audio() -> StreamDescriptor {
        StreamDescriptor::audio(Codec::Opus, 48_000, 2, TimeBase::MILLIS)
    }

    fn open(elapsed_ms: u64) -> PolicyState {
        PolicyState {
            segment_open: true,
            elapsed_ms,
        }
    }

    const CLOSED: PolicyState = PolicyState {
        segment_open: false,
        elapsed_ms: 0,
    };

    #[test]
    fn resolve_keyframe_picks_first_video() {
        let streams = [audio(), video()];
        let policy =
            SegmentPolicy::resolve(&PolicyConfig::Keyframe { video_stream: None }, &streams)
                .unwrap();
        assert_eq!(policy, SegmentPolicy::Keyframe { video_stream: 1 });
        assert_eq!(policy.reference_stream(), None);
    }

    #[test]
    fn resolve_keyframe_without_video_fails() {
        let err = SegmentPolicy::resolve(&PolicyConfig::Keyframe { video_stream: None }, &[audio()])
            .unwrap_err();
        assert!(matches!(
            err,
            SegmuxError::Config {
                kind: ConfigErrorKind::NoVideoStream
            }
        ));

        let err = SegmentPolicy::resolve(
            &PolicyConfig::Keyframe {
                video_stream: Some(0),
            },
            &[audio(), video()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SegmuxError::Config {
                kind: ConfigErrorKind::NotVideo(0)
            }
        ));
    }

    #[test]
    fn resolve_duration_defaults_to_audio_reference() {
        let streams = [video(), audio()];
        let policy = SegmentPolicy::resolve(
            &PolicyConfig::Duration {
                chunk_duration_ms: Some(2000),
                reference_stream: None,
                keyframe_aligned: false,
            },
            &streams,
        )
        .unwrap();
        assert_eq!(
            policy,
            SegmentPolicy::Duration {
                threshold_ms: 2000,
                reference_stream: 1,
                keyframe_aligned: false,
            }
        );

        let video_only = SegmentPolicy::resolve(
            &PolicyConfig::Duration {
                chunk_duration_ms: Some(2000),
                reference_stream: None,
                keyframe_aligned: false,
            },
            &[video()],
        )
        .unwrap();
        assert_eq!(video_only.reference_stream(), Some(0));
    }

    #[test]
    fn resolve_duration_validates() {
        let cases = [
            (None, None, ConfigErrorKind::MissingChunkDuration),
            (Some(0), None, ConfigErrorKind::ZeroChunkDuration),
            (Some(1000), Some(5), ConfigErrorKind::StreamOutOfRange(5)),
        ];
        for (chunk_duration_ms, reference_stream, expected) in cases {
            let err = SegmentPolicy::resolve(
                &PolicyConfig::Duration {
                    chunk_duration_ms,
                    reference_stream,
                    keyframe_aligned: false,
                },
                &[audio()],
            )
            .unwrap_err();
            match err {
                SegmuxError::Config { kind } => assert_eq!(kind, expected),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn resolve_without_streams_fails() {
        let err = SegmentPolicy::resolve(&PolicyConfig::Keyframe { video_stream: None }, &[])
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn first_packet_always_starts_segment() {
        let kf = SegmentPolicy::Keyframe { video_stream: 0 };
        let delta = Packet::new(0, 0, false, vec![]);
        assert!(kf.should_start_new_segment(&delta, &video(), &CLOSED));

        let dur = SegmentPolicy::Duration {
            threshold_ms: 2000,
            reference_stream: 0,
            keyframe_aligned: false,
        };
        assert!(dur.should_start_new_segment(&delta, &audio(), &CLOSED));
    }

    #[test]
    fn keyframe_policy_only_follows_designated_stream() {
        let policy = SegmentPolicy::Keyframe { video_stream: 0 };
        let key = Packet::new(0, 0, true, vec![]);
        let delta = Packet::new(0, 33, false, vec![]);
        let other_key = Packet::new(1, 33, true, vec![]);

        assert!(policy.should_start_new_segment(&key, &video(), &open(0)));
        assert!(!policy.should_start_new_segment(&delta, &video(), &open(0)));
        assert!(!policy.should_start_new_segment(&other_key, &audio(), &open(0)));
    }

    #[test]
    fn duration_policy_threshold_is_inclusive() {
        let policy = SegmentPolicy::Duration {
            threshold_ms: 2000,
            reference_stream: 0,
            keyframe_aligned: false,
        };
        let pkt = Packet::new(0, 0, false, vec![]);
        assert!(!policy.should_start_new_segment(&pkt, &audio(), &open(1999)));
        assert!(policy.should_start_new_segment(&pkt, &audio(), &open(2000)));
        assert!(policy.should_start_new_segment(&pkt, &audio(), &open(2500)));
    }

    #[test]
    fn duration_policy_ignores_non_reference_keyframes() {
        let policy = SegmentPolicy::Duration {
            threshold_ms: 2000,
            reference_stream: 1,
            keyframe_aligned: false,
        };
        let video_key = Packet::new(0, 0, true, vec![]);
        assert!(!policy.should_start_new_segment(&video_key, &video(), &open(5000)));
    }

    #[test]
    fn duration_policy_with_video_reference_ignores_keyframe_flag() {
        let policy = SegmentPolicy::Duration {
            threshold_ms: 1000,
            reference_stream: 0,
            keyframe_aligned: false,
        };
        let delta = Packet::new(0, 0, false, vec![]);
        assert!(policy.should_start_new_segment(&delta, &video(), &open(1000)));
        assert!(!policy.should_start_new_segment(&delta, &video(), &open(999)));
    }

    #[test]
    fn keyframe_aligned_duration_waits_for_keyframe() {
        let policy = SegmentPolicy::Duration {
            threshold_ms: 1000,
            reference_stream: 0,
            keyframe_aligned: true,
        };
        let delta = Packet::new(0, 0, false, vec![]);
        let key = Packet::new(0, 0, true, vec![]);
        assert!(!policy.should_start_new_segment(&delta, &video(), &open(1500)));
        assert!(policy.should_start_new_segment(&key, &video(), &open(1500)));
        assert!(!policy.should_start_new_segment(&key, &video(), &open(500)));
        // Audio references are never held back
        assert!(policy.should_start_new_segment(&delta, &audio(), &open(1500)));
    }

    #[test]
    fn accumulator_sums_deltas() {
        let mut acc = DurationAccumulator::new();
        assert_eq!(acc.observe(1000), 0);
        assert_eq!(acc.observe(1500), 500);
        assert_eq!(acc.observe(2020), 1020);
        acc.reset();
        assert_eq!(acc.elapsed_ms(), 0);
        // Delta measured from the last timestamp, not from the reset
        assert_eq!(acc.observe(2520), 500);
    }

    #[test]
    fn accumulator_ignores_backwards_steps() {
        let mut acc = DurationAccumulator::new();
        acc.observe(1000);
        assert_eq!(acc.observe(900), 0);
        assert_eq!(acc.observe(1400), 500);
    }
}
