//! Stream descriptors and encoded packets.
//!
//! A session declares its tracks once, at open time, as a list of
//! [`StreamDescriptor`]s. The list is immutable afterwards: the coordinator
//! hands the container serializer an owned snapshot rather than a live
//! reference into session state.

/// Media type of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Codecs accepted in a WebM container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Vp8,
    Vp9,
    Av1,
    Opus,
    Vorbis,
}

impl Codec {
    /// Matroska `CodecID` string.
    pub fn codec_id(&self) -> &'static str {
        match self {
            Self::Vp8 => "V_VP8",
            Self::Vp9 => "V_VP9",
            Self::Av1 => "V_AV1",
            Self::Opus => "A_OPUS",
            Self::Vorbis => "A_VORBIS",
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self {
            Self::Vp8 | Self::Vp9 | Self::Av1 => MediaKind::Video,
            Self::Opus | Self::Vorbis => MediaKind::Audio,
        }
    }
}

/// Rational time base: one tick lasts `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// Millisecond precision, the WebM default timecode scale.
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a timestamp in this time base to milliseconds.
    ///
    /// Rounds to nearest (half away from zero). Timestamps are carried as
    /// 64-bit values and never wrap; `None` means the result does not fit
    /// in an `i64` or the time base has a zero denominator.
    pub fn rescale_to_millis(&self, ts: i64) -> Option<i64> {
        if self.den == 0 {
            return None;
        }
        if *self == Self::MILLIS {
            return Some(ts);
        }
        let n = ts as i128 * self.num as i128 * 1000;
        let d = self.den as i128;
        let q = if n >= 0 { (n + d / 2) / d } else { (n - d / 2) / d };
        i64::try_from(q).ok()
    }
}

/// Immutable description of one logical track.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub codec: Codec,
    /// Time base the packet timestamps of this stream are expressed in.
    pub time_base: TimeBase,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u8,
    /// Codec-specific initialization data (Matroska `CodecPrivate`).
    pub codec_private: Option<Vec<u8>>,
}

impl StreamDescriptor {
    pub fn video(codec: Codec, width: u32, height: u32, time_base: TimeBase) -> Self {
        Self {
            codec,
            time_base,
            width,
            height,
            sample_rate: 0,
            channels: 0,
            codec_private: None,
        }
    }

    pub fn audio(codec: Codec, sample_rate: u32, channels: u8, time_base: TimeBase) -> Self {
        Self {
            codec,
            time_base,
            width: 0,
            height: 0,
            sample_rate,
            channels,
            codec_private: None,
        }
    }

    pub fn with_codec_private(mut self, data: Vec<u8>) -> Self {
        self.codec_private = Some(data);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.codec.media_kind()
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == MediaKind::Audio
    }
}

/// One encoded access unit as produced by an upstream encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// Presentation timestamp in the stream's declared time base.
    pub pts: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(stream_index: usize, pts: i64, keyframe: bool, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts,
            keyframe,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_is_identity() {
        assert_eq!(TimeBase::MILLIS.rescale_to_millis(123_456), Some(123_456));
        assert_eq!(TimeBase::MILLIS.rescale_to_millis(i64::MAX), Some(i64::MAX));
    }

    #[test]
    fn rescale_90khz() {
        let tb = TimeBase::new(1, 90_000);
        assert_eq!(tb.rescale_to_millis(90_000), Some(1000));
        assert_eq!(tb.rescale_to_millis(3000), Some(33));
        assert_eq!(tb.rescale_to_millis(-3000), Some(-33));
    }

    #[test]
    fn rescale_rounds_to_nearest() {
        let tb = TimeBase::new(1, 48_000);
        // 960 samples = 20 ms exactly, 1000 samples = 20.83 ms
        assert_eq!(tb.rescale_to_millis(960), Some(20));
        assert_eq!(tb.rescale_to_millis(1000), Some(21));
    }

    #[test]
    fn rescale_frame_rate_time_base() {
        // IVF-style 1/30 time base: frame index -> ms
        let tb = TimeBase::new(1, 30);
        assert_eq!(tb.rescale_to_millis(30), Some(1000));
        assert_eq!(tb.rescale_to_millis(1), Some(33));
    }

    #[test]
    fn rescale_overflow_and_zero_den() {
        assert_eq!(TimeBase::new(1000, 1).rescale_to_millis(i64::MAX), None);
        assert_eq!(TimeBase::new(1, 0).rescale_to_millis(1), None);
    }

    #[test]
    fn codec_kinds() {
        assert_eq!(Codec::Vp9.media_kind(), MediaKind::Video);
        assert_eq!(Codec::Opus.media_kind(), MediaKind::Audio);
        assert_eq!(Codec::Av1.codec_id(), "V_AV1");
    }
}
