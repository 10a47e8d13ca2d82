//! EBML (Extensible Binary Meta Language) element writer.
//!
//! Matroska/WebM is a tree of EBML elements, each encoded as:
//!
//! ```text
//! +-------------+----------------+----------------------+
//! | Element ID  | Data size      | Data                 |
//! | 1-4 bytes   | 1-8 bytes vint | `size` bytes         |
//! +-------------+----------------+----------------------+
//! ```
//!
//! Data sizes use the leading-1 variable-size integer encoding:
//! - 1 byte:  `1xxx xxxx`                (7 data bits)
//! - 2 bytes: `01xx xxxx xxxx xxxx`      (14 data bits)
//! - ...
//! - 8 bytes: `0000 0001 xxxx ...`       (56 data bits)
//!
//! The all-ones value of each width is reserved for "unknown size", used by
//! live streams for the Segment and Cluster masters whose length is not known
//! when their header is written.
//!
//! All integers are big-endian. Element bodies are assembled in memory and
//! emitted in one piece, so nothing here ever needs to seek back and patch a
//! size.

pub const EBML_HEADER: u32 = 0x1A45DFA3;
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

pub const SEGMENT: u32 = 0x18538067;

pub const INFO: u32 = 0x1549A966;
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;

pub const TRACKS: u32 = 0x1654AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
pub const VIDEO: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const AUDIO: u32 = 0xE1;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;

pub const CLUSTER: u32 = 0x1F43B675;
pub const TIMECODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Matroska `TrackType` values.
pub const TRACK_TYPE_VIDEO: u64 = 1;
pub const TRACK_TYPE_AUDIO: u64 = 2;

/// 8-byte "unknown size" marker.
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Largest value a data size vint can carry (8 bytes, minus the reserved all-ones value).
pub const MAX_SIZE: u64 = (1u64 << 56) - 2;

/// Append an element ID. IDs keep their marker bit, so the raw bytes are
/// written without leading zeros.
pub fn write_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = (id.leading_zeros() / 8).min(3) as usize;
    buf.extend_from_slice(&bytes[skip..]);
}

/// Number of bytes needed to encode `value` as a data size vint.
pub fn vint_width(value: u64) -> usize {
    (1..=8)
        .find(|&w| value < (1u64 << (7 * w)) - 1)
        .unwrap_or(8)
}

/// Append a data size in its shortest vint encoding.
///
/// Values above [`MAX_SIZE`] cannot be represented; callers keep element
/// bodies far below that bound.
pub fn write_size(buf: &mut Vec<u8>, value: u64) {
    let width = vint_width(value);
    let marked = value | (1u64 << (7 * width));
    buf.extend_from_slice(&marked.to_be_bytes()[8 - width..]);
}

/// Append an element header (ID + size).
pub fn write_header(buf: &mut Vec<u8>, id: u32, size: u64) {
    write_id(buf, id);
    write_size(buf, size);
}

/// Append an unsigned integer element in its shortest big-endian form.
pub fn write_uint(buf: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = ((value.leading_zeros() / 8) as usize).min(7);
    write_header(buf, id, (8 - skip) as u64);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Append an 8-byte float element.
pub fn write_float(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_header(buf, id, 8);
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_string(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_binary(buf, id, value.as_bytes());
}

pub fn write_binary(buf: &mut Vec<u8>, id: u32, value: &[u8]) {
    write_header(buf, id, value.len() as u64);
    buf.extend_from_slice(value);
}

/// Append a master element whose children are produced by `build`.
pub fn write_master(buf: &mut Vec<u8>, id: u32, build: impl FnOnce(&mut Vec<u8>)) {
    let mut body = Vec::new();
    build(&mut body);
    write_binary(buf, id, &body);
}
