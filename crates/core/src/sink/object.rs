use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SegmuxError};

/// Identity of one discrete object produced by the accumulating output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// The container header.
    Initialization,
    /// The n-th media segment, counted from 0.
    Media(u64),
}

impl ObjectKey {
    /// File name for this object: `<prefix>_init.hdr` or `<prefix>_<index>.chk`.
    pub fn file_name(&self, prefix: &str) -> String {
        match self {
            Self::Initialization => format!("{prefix}_init.hdr"),
            Self::Media(index) => format!("{prefix}_{index:05}.chk"),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialization => write!(f, "init"),
            Self::Media(index) => write!(f, "media#{index}"),
        }
    }
}

/// Destination for complete, independently delivered objects.
///
/// Each [`put`](Self::put) hands over one finished segment. Implementations
/// must make the object visible to consumers only once it is complete.
pub trait ObjectSink: Send {
    fn put(&mut self, key: ObjectKey, data: Vec<u8>) -> io::Result<()>;

    /// Release any resources. Called once, at session close.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each object as a file in a directory.
///
/// Objects are written to a hidden temporary file and renamed into place,
/// so a directory watcher never observes a partially written chunk.
#[derive(Debug)]
pub struct DirectoryObjectSink {
    dir: PathBuf,
    prefix: String,
}

impl DirectoryObjectSink {
    /// Create the sink, creating `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| SegmuxError::SinkOpen {
            destination: dir.display().to_string(),
            source,
        })?;
        tracing::debug!(dir = %dir.display(), prefix, "directory object sink opened");
        Ok(Self {
            dir,
            prefix: prefix.to_string(),
        })
    }

    /// Final path of an object.
    pub fn path_for(&self, key: ObjectKey) -> PathBuf {
        self.dir.join(key.file_name(&self.prefix))
    }
}

impl ObjectSink for DirectoryObjectSink {
    fn put(&mut self, key: ObjectKey, data: Vec<u8>) -> io::Result<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", key.file_name(&self.prefix)));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "object written");
        Ok(())
    }
}

/// Shared in-memory object store. Clones share the same object list.
#[derive(Clone, Default)]
pub struct MemoryObjectSink {
    objects: Arc<Mutex<Vec<(ObjectKey, Vec<u8>)>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemoryObjectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the delivered objects, in delivery order.
    pub fn objects(&self) -> Vec<(ObjectKey, Vec<u8>)> {
        self.objects.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl ObjectSink for MemoryObjectSink {
    fn put(&mut self, key: ObjectKey, data: Vec<u8>) -> io::Result<()> {
        self.objects.lock().push((key, data));
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}
