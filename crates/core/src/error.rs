//! Error types for the segmented muxer.

use std::fmt;

/// Errors that can occur while writing a segmented stream.
///
/// Variants map to the stage that failed:
///
/// - **Configuration**: [`Config`](Self::Config), reported before any I/O.
/// - **Transport**: [`SinkOpen`](Self::SinkOpen), [`SinkWrite`](Self::SinkWrite).
///   Fatal to the session and never retried here, since segment offsets
///   depend on exact byte positions.
/// - **Container**: [`Serializer`](Self::Serializer), a container invariant
///   was violated.
/// - **Lifecycle**: [`InvalidState`](Self::InvalidState),
///   [`UnknownStream`](Self::UnknownStream).
/// - **Reader side**: [`InvalidEvent`](Self::InvalidEvent), malformed or
///   out-of-order boundary metadata.
#[derive(Debug, thiserror::Error)]
pub enum SegmuxError {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {kind}")]
    Config { kind: ConfigErrorKind },

    /// A destination could not be opened.
    #[error("failed to open sink {destination}: {source}")]
    SinkOpen {
        destination: String,
        #[source]
        source: std::io::Error,
    },

    /// A write, flush or close on a sink failed.
    #[error("sink write failed during {stage}: {source}")]
    SinkWrite {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    /// The container serializer rejected its input.
    #[error("serializer error: {0}")]
    Serializer(String),

    /// The operation is not accepted in the session's current state.
    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// A packet referenced a stream that was not declared at session open.
    #[error("unknown stream index: {0}")]
    UnknownStream(usize),

    /// A boundary metadata record was malformed or out of order.
    #[error("invalid boundary event: {0}")]
    InvalidEvent(String),
}

impl SegmuxError {
    pub(crate) fn config(kind: ConfigErrorKind) -> Self {
        Self::Config { kind }
    }

    pub(crate) fn write(stage: Stage) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::SinkWrite { stage, source }
    }

    /// Whether this error was raised before any I/O took place.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Specific kind of configuration failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// No primary stream destination was given.
    MissingStreamUrl,
    /// The duration policy was selected without a chunk duration.
    MissingChunkDuration,
    /// Chunk duration must be greater than zero.
    ZeroChunkDuration,
    /// Serializer cluster duration must be greater than zero when set.
    ZeroClusterDuration,
    /// At least one stream must be declared.
    NoStreams,
    /// The keyframe policy needs a video stream to follow.
    NoVideoStream,
    /// A configured stream index does not exist.
    StreamOutOfRange(usize),
    /// The configured stream exists but has the wrong media kind.
    NotVideo(usize),
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStreamUrl => write!(f, "no output stream url provided"),
            Self::MissingChunkDuration => {
                write!(f, "duration policy requires a chunk duration")
            }
            Self::ZeroChunkDuration => write!(f, "chunk duration must be > 0 ms"),
            Self::ZeroClusterDuration => write!(f, "cluster duration must be > 0 ms"),
            Self::NoStreams => write!(f, "no streams declared"),
            Self::NoVideoStream => write!(f, "keyframe policy requires a video stream"),
            Self::StreamOutOfRange(index) => write!(f, "stream {index} does not exist"),
            Self::NotVideo(index) => write!(f, "stream {index} is not a video stream"),
        }
    }
}

/// Step of the session lifecycle in which an I/O failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OpenSession,
    Ingest,
    SegmentEnd,
    CloseSession,
    Metadata,
    ObjectDelivery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenSession => "open_session",
            Self::Ingest => "ingest",
            Self::SegmentEnd => "segment end",
            Self::CloseSession => "close_session",
            Self::Metadata => "metadata emit",
            Self::ObjectDelivery => "object delivery",
        };
        f.write_str(name)
    }
}

/// Convenience alias for `Result<T, SegmuxError>`.
pub type Result<T> = std::result::Result<T, SegmuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = SegmuxError::config(ConfigErrorKind::MissingStreamUrl);
        assert_eq!(
            err.to_string(),
            "configuration error: no output stream url provided"
        );
        assert!(err.is_config());
    }

    #[test]
    fn sink_write_names_stage() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = SegmuxError::write(Stage::SegmentEnd)(io);
        assert_eq!(
            err.to_string(),
            "sink write failed during segment end: pipe closed"
        );
        assert!(!err.is_config());
    }

    #[test]
    fn invalid_state_display() {
        let err = SegmuxError::InvalidState {
            operation: "ingest",
            state: "finished",
        };
        assert_eq!(err.to_string(), "ingest not allowed in state finished");
    }
}
