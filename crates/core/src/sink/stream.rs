use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SegmuxError};

/// Append-only writer that tracks the exact number of bytes accepted by the
/// inner sink.
///
/// [`tell`](Self::tell) is the primary output offset reported in boundary
/// events. It only counts bytes the inner writer has acknowledged, so it is
/// never an estimate.
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Total bytes written so far.
    pub fn tell(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Shared, growable in-memory byte sink.
///
/// Clones share the same buffer, so a caller can keep one handle to inspect
/// what a session wrote through another.
#[derive(Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Resolve a destination identifier to a byte sink.
///
/// | Identifier | Sink |
/// |------------|------|
/// | `-` | standard output |
/// | `tcp://host:port` | connected TCP stream (Nagle disabled) |
/// | `file://path` or `path` | newly created (truncated) file |
pub fn open_destination(id: &str) -> Result<Box<dyn Write + Send>> {
    let open_err = |source: io::Error| SegmuxError::SinkOpen {
        destination: id.to_string(),
        source,
    };

    if id == "-" {
        tracing::debug!("destination is stdout");
        return Ok(Box::new(io::stdout()));
    }

    if let Some(addr) = id.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr).map_err(open_err)?;
        stream.set_nodelay(true).map_err(open_err)?;
        tracing::debug!(addr, "destination is TCP");
        return Ok(Box::new(stream));
    }

    let path = id.strip_prefix("file://").unwrap_or(id);
    let file = File::create(path).map_err(open_err)?;
    tracing::debug!(path, "destination is file");
    Ok(Box::new(BufWriter::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_writer_tracks_bytes() {
        let mut w = CountingWriter::new(Vec::new());
        w.write_all(b"hello").unwrap();
        w.write_all(b" world").unwrap();
        assert_eq!(w.tell(), 11);
        assert_eq!(w.into_inner(), b"hello world");
    }

    #[test]
    fn counting_writer_counts_partial_writes() {
        /// Accepts at most 3 bytes per call.
        struct Trickle(Vec<u8>);
        impl Write for Trickle {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                let n = buf.len().min(3);
                self.0.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut w = CountingWriter::new(Trickle(Vec::new()));
        w.write_all(&[7u8; 10]).unwrap();
        assert_eq!(w.tell(), 10);
        assert_eq!(w.into_inner().0.len(), 10);
    }

    #[test]
    fn memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write_all(b"abc").unwrap();
        assert_eq!(sink.contents(), b"abc");
        assert_eq!(sink.len(), 3);
        assert!(!sink.is_empty());
    }

    #[test]
    fn open_file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.webm");
        let id = path.to_str().unwrap();

        let mut sink = open_destination(id).unwrap();
        sink.write_all(b"data").unwrap();
        sink.flush().unwrap();
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn open_file_url_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.jsonl");
        let id = format!("file://{}", path.display());

        let mut sink = open_destination(&id).unwrap();
        sink.write_all(b"{}\n").unwrap();
        sink.flush().unwrap();
        drop(sink);

        assert_eq!(std::fs::read(&path).unwrap(), b"{}\n");
    }

    #[test]
    fn open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.webm");
        let err = open_destination(path.to_str().unwrap())
            .err()
            .expect("open should fail");
        assert!(matches!(err, SegmuxError::SinkOpen { .. }));
    }

    #[test]
    fn open_tcp_destination() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let id = format!("tcp://{addr}");

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            io::Read::read_to_end(&mut stream, &mut received).unwrap();
            received
        });

        let mut sink = open_destination(&id).unwrap();
        sink.write_all(b"segment").unwrap();
        sink.flush().unwrap();
        drop(sink);

        assert_eq!(handle.join().unwrap(), b"segment");
    }
}
