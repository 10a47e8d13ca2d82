use std::path::PathBuf;

use crate::container::SerializerOptions;
use crate::error::{ConfigErrorKind, Result, SegmuxError};
use crate::policy::SegmentPolicy;
use crate::stream::StreamDescriptor;

/// Default file name prefix for discrete chunks.
pub const DEFAULT_CHUNK_PREFIX: &str = "chunk";

/// Which boundary policy to run, before it is resolved against the streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyConfig {
    /// Segment at keyframes of a video stream (first video stream when `None`).
    Keyframe { video_stream: Option<usize> },
    /// Segment every `chunk_duration_ms` of reference-stream time (first
    /// audio stream, else stream 0, when `reference_stream` is `None`).
    Duration {
        chunk_duration_ms: Option<u32>,
        reference_stream: Option<usize>,
        /// Hold a due boundary on a video reference stream until its next
        /// keyframe. Off by default.
        keyframe_aligned: bool,
    },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::Keyframe { video_stream: None }
    }
}

/// How the primary output is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Delivery {
    /// One continuous byte stream at [`ChunkerConfig::stream_url`].
    #[default]
    Continuous,
    /// One file per segment in `dir`, named `<prefix>_init.hdr` and
    /// `<prefix>_<index>.chk`.
    Discrete { dir: PathBuf, prefix: String },
}

/// Session configuration, consumed once at session open.
#[derive(Debug, Clone, Default)]
pub struct ChunkerConfig {
    /// Destination of the media stream (`-`, `tcp://host:port` or a path).
    /// Required for [`Delivery::Continuous`].
    pub stream_url: Option<String>,
    /// Destination of the boundary metadata. Optional.
    pub info_url: Option<String>,
    pub policy: PolicyConfig,
    pub delivery: Delivery,
    pub serializer: SerializerOptions,
    /// Stamp boundary events with the wall-clock time.
    pub wall_clock: bool,
}

impl ChunkerConfig {
    /// Continuous keyframe-segmented stream to `stream_url`.
    pub fn keyframe(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: Some(stream_url.into()),
            ..Self::default()
        }
    }

    /// Continuous duration-segmented stream to `stream_url`.
    pub fn duration(stream_url: impl Into<String>, chunk_duration_ms: u32) -> Self {
        Self {
            stream_url: Some(stream_url.into()),
            policy: PolicyConfig::Duration {
                chunk_duration_ms: Some(chunk_duration_ms),
                reference_stream: None,
                keyframe_aligned: false,
            },
            ..Self::default()
        }
    }

    pub fn with_info_url(mut self, info_url: impl Into<String>) -> Self {
        self.info_url = Some(info_url.into());
        self
    }

    pub fn with_discrete_output(mut self, dir: impl Into<PathBuf>, prefix: &str) -> Self {
        self.delivery = Delivery::Discrete {
            dir: dir.into(),
            prefix: prefix.to_string(),
        };
        self
    }

    /// Check the configuration against the declared streams and resolve the
    /// boundary policy. Performs no I/O.
    pub fn validate(&self, streams: &[StreamDescriptor]) -> Result<SegmentPolicy> {
        if self.delivery == Delivery::Continuous
            && self.stream_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(SegmuxError::config(ConfigErrorKind::MissingStreamUrl));
        }
        self.serializer.validate()?;
        SegmentPolicy::resolve(&self.policy, streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Codec, TimeBase};

    fn streams() -> Vec<StreamDescriptor> {
        vec![StreamDescriptor::video(
            Codec::Vp9,
            1280,
            720,
            TimeBase::MILLIS,
        )]
    }

    #[test]
    fn default_is_continuous_keyframe() {
        let config = ChunkerConfig::default();
        assert_eq!(config.policy, PolicyConfig::Keyframe { video_stream: None });
        assert_eq!(config.delivery, Delivery::Continuous);
        assert!(config.serializer.is_low_latency);
        assert!(!config.wall_clock);
    }

    #[test]
    fn missing_stream_url_is_rejected() {
        let err = ChunkerConfig::default().validate(&streams()).unwrap_err();
        assert!(matches!(
            err,
            SegmuxError::Config {
                kind: ConfigErrorKind::MissingStreamUrl
            }
        ));

        let err = ChunkerConfig::keyframe("").validate(&streams()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn discrete_output_needs_no_stream_url() {
        let config = ChunkerConfig::default().with_discrete_output("/tmp/chunks", "cam");
        assert!(config.validate(&streams()).is_ok());
    }

    #[test]
    fn validate_resolves_policy() {
        let policy = ChunkerConfig::duration("out.webm", 2000)
            .validate(&streams())
            .unwrap();
        assert_eq!(
            policy,
            SegmentPolicy::Duration {
                threshold_ms: 2000,
                reference_stream: 0,
                keyframe_aligned: false,
            }
        );
    }

    #[test]
    fn validate_checks_serializer_options() {
        let mut config = ChunkerConfig::keyframe("out.webm").with_info_url("out.info");
        config.serializer.cluster_duration_ms = Some(0);
        assert!(config.validate(&streams()).unwrap_err().is_config());
    }
}
