//! Minimal IVF reader.
//!
//! IVF is the raw VP8/VP9/AV1 elementary stream wrapper written by libvpx
//! and libaom tools:
//!
//! ```text
//! file header (32 bytes, little endian)
//!   0  "DKIF"
//!   4  version u16, header length u16
//!   8  fourcc (VP80 / VP90 / AV01)
//!  12  width u16, height u16
//!  16  rate u32, scale u32      (time base = scale / rate seconds)
//!  24  frame count u32, unused u32
//! frame header (12 bytes)
//!   0  frame size u32
//!   4  pts u64
//! ```

use std::io::{self, Read};

use segmux::{Codec, TimeBase};

const SIGNATURE: &[u8; 4] = b"DKIF";
const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

/// Frames above this size are treated as corruption.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// AV1 sequence header OBU type.
const OBU_SEQUENCE_HEADER: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub codec: Codec,
    pub width: u16,
    pub height: u16,
    pub time_base: TimeBase,
    pub frame_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFrame {
    pub pts: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

pub struct IvfReader<R> {
    inner: R,
    header: IvfHeader,
}

impl<R: Read> IvfReader<R> {
    /// Read and check the file header.
    pub fn new(mut inner: R) -> io::Result<Self> {
        let mut buf = [0u8; FILE_HEADER_LEN];
        inner.read_exact(&mut buf)?;

        if &buf[0..4] != SIGNATURE {
            return Err(invalid("not an IVF file"));
        }
        let header_len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        let codec = match &buf[8..12] {
            b"VP80" => Codec::Vp8,
            b"VP90" => Codec::Vp9,
            b"AV01" => Codec::Av1,
            other => {
                return Err(invalid(&format!(
                    "unsupported fourcc {}",
                    String::from_utf8_lossy(other)
                )));
            }
        };
        let rate = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let scale = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);
        if rate == 0 || scale == 0 {
            return Err(invalid("zero frame rate or scale"));
        }

        // Skip any header extension
        if header_len > FILE_HEADER_LEN {
            io::copy(
                &mut (&mut inner).take((header_len - FILE_HEADER_LEN) as u64),
                &mut io::sink(),
            )?;
        }

        let header = IvfHeader {
            codec,
            width: u16::from_le_bytes([buf[12], buf[13]]),
            height: u16::from_le_bytes([buf[14], buf[15]]),
            time_base: TimeBase::new(scale, rate),
            frame_count: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
        };
        tracing::debug!(?header, "IVF header read");
        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    /// Next frame, or `None` at a clean end of file.
    pub fn next_frame(&mut self) -> io::Result<Option<IvfFrame>> {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        if !read_or_eof(&mut self.inner, &mut buf)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(invalid(&format!("frame of {len} bytes")));
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&buf[4..12]);
        let pts = i64::from_le_bytes(ts);

        let mut data = vec![0u8; len];
        self.inner.read_exact(&mut data)?;

        Ok(Some(IvfFrame {
            pts,
            keyframe: is_keyframe(self.header.codec, &data),
            data,
        }))
    }
}

/// Fill `buf`, or return `false` if the reader is already at end of file.
fn read_or_eof(r: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Whether a frame is a random access point for its codec.
pub fn is_keyframe(codec: Codec, data: &[u8]) -> bool {
    match codec {
        // Frame tag bit 0: 0 = key frame
        Codec::Vp8 => data.first().is_some_and(|b| b & 0x01 == 0),
        Codec::Vp9 => vp9_is_keyframe(data),
        Codec::Av1 => av1_has_sequence_header(data),
        Codec::Opus | Codec::Vorbis => true,
    }
}

/// Parse the start of the VP9 uncompressed header.
fn vp9_is_keyframe(data: &[u8]) -> bool {
    let Some(&b) = data.first() else {
        return false;
    };
    if b >> 6 != 0b10 {
        return false;
    }
    let profile = (((b >> 4) & 1) << 1) | ((b >> 5) & 1);
    // Profile 3 has a reserved zero bit before show_existing_frame
    let shift = if profile == 3 { 2 } else { 3 };
    let show_existing_frame = (b >> shift) & 1 == 1;
    let frame_type = (b >> (shift - 1)) & 1;
    !show_existing_frame && frame_type == 0
}

/// Scan the OBUs of a temporal unit for a sequence header.
fn av1_has_sequence_header(data: &[u8]) -> bool {
    let mut pos = 0;
    while pos < data.len() {
        let header = data[pos];
        let obu_type = (header >> 3) & 0x0F;
        if obu_type == OBU_SEQUENCE_HEADER {
            return true;
        }
        let has_extension = header & 0x04 != 0;
        let has_size = header & 0x02 != 0;
        if !has_size {
            // Last OBU of the unit
            return false;
        }
        pos += 1 + usize::from(has_extension);
        let Some((size, len)) = read_leb128(&data[pos.min(data.len())..]) else {
            return false;
        };
        pos = pos.saturating_add(len).saturating_add(size);
    }
    false
}

fn read_leb128(data: &[u8]) -> Option<(usize, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(8).enumerate() {
        value |= u64::from(byte & 0x7F) << (i * 7);
        if byte & 0x80 == 0 {
            return Some((usize::try_from(value).ok()?, i + 1));
        }
    }
    None
}
