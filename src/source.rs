//! `DataSource`: the polymorphic input side of the engine. A record's
//! payload comes from a file path, an already-open file handle (with an
//! optional offset+length window), or an in-memory buffer; the source
//! owns or borrows that storage according to the contract fixed at
//! construction time.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::thread::ThreadFormat;

/// An owned closure run when a `Buffer` source is dropped, matching the
/// "free-on-close callback" in the design notes. Boxed so `DataSource`
/// stays `Send`-agnostic and simple to construct.
pub type FreeCallback = Box<dyn FnOnce(Vec<u8>)>;

enum Storage {
    FilePath(PathBuf),
    OpenFile { file: File, offset: u64, length: Option<u64> },
    Buffer { bytes: Vec<u8>, free_cb: Option<FreeCallback> },
}

/// A source of data to be added or used to update a thread.
pub struct DataSource {
    storage: Storage,
    /// The uncompressed length, when known up front (used for pre-sized
    /// thread checks and progress reporting).
    other_len: Option<u64>,
    /// Whether the bytes handed to the engine are already compressed
    /// (verbatim-copy) or plain data to run through a codec.
    format: ThreadFormat,
}

impl DataSource {
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<DataSource> {
        let len = std::fs::metadata(path.as_ref())?.len();
        Ok(DataSource {
            storage: Storage::FilePath(path.as_ref().to_path_buf()),
            other_len: Some(len),
            format: ThreadFormat::Uncompressed,
        })
    }

    pub fn from_open_file(file: File, offset: u64, length: Option<u64>) -> DataSource {
        DataSource {
            storage: Storage::OpenFile { file, offset, length },
            other_len: length,
            format: ThreadFormat::Uncompressed,
        }
    }

    pub fn from_buffer(bytes: Vec<u8>) -> DataSource {
        let len = bytes.len() as u64;
        DataSource {
            storage: Storage::Buffer { bytes, free_cb: None },
            other_len: Some(len),
            format: ThreadFormat::Uncompressed,
        }
    }

    pub fn from_buffer_with_free(bytes: Vec<u8>, free_cb: FreeCallback) -> DataSource {
        let len = bytes.len() as u64;
        DataSource {
            storage: Storage::Buffer { bytes, free_cb: Some(free_cb) },
            other_len: Some(len),
            format: ThreadFormat::Uncompressed,
        }
    }

    /// Marks this source's bytes as already compressed in `format`, so
    /// the engine copies them verbatim rather than running a codec.
    pub fn as_precompressed(mut self, format: ThreadFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> ThreadFormat {
        self.format
    }

    pub fn other_len(&self) -> Option<u64> {
        self.other_len
    }

    /// Open (or re-derive) a `Read + Seek` handle positioned at the
    /// start of this source's data, consuming a fresh `File` open for
    /// path-backed sources.
    pub fn reader(&mut self) -> Result<Box<dyn ReadSeek + '_>> {
        match &mut self.storage {
            Storage::FilePath(path) => {
                let file = File::open(path)?;
                Ok(Box::new(file))
            }
            Storage::OpenFile { file, offset, length } => {
                file.seek(SeekFrom::Start(*offset))?;
                Ok(Box::new(Windowed { file, remaining: *length }))
            }
            Storage::Buffer { bytes, .. } => Ok(Box::new(io::Cursor::new(bytes.clone()))),
        }
    }

    /// The length actually on disk/in memory right now, used to verify
    /// an Update mod still fits a pre-sized thread's reserved space at
    /// flush time (file-backed sources are checked lazily, per spec).
    pub fn current_len(&self) -> io::Result<u64> {
        match &self.storage {
            Storage::FilePath(path) => Ok(std::fs::metadata(path)?.len()),
            Storage::OpenFile { file, length, .. } => match length {
                Some(l) => Ok(*l),
                None => Ok(file.metadata()?.len()),
            },
            Storage::Buffer { bytes, .. } => Ok(bytes.len() as u64),
        }
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        if let Storage::Buffer { bytes, free_cb } = &mut self.storage {
            if let Some(cb) = free_cb.take() {
                cb(std::mem::take(bytes));
            }
        }
    }
}

pub trait ReadSeek: Read {}
impl ReadSeek for File {}
impl<T: AsRef<[u8]>> ReadSeek for io::Cursor<T> {}
impl<'a> ReadSeek for Windowed<'a> {}

/// A view over an open file limited to `remaining` bytes from the
/// current position (or unbounded, for an offset-only window).
struct Windowed<'a> {
    file: &'a mut File,
    remaining: Option<u64>,
}

impl<'a> Read for Windowed<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.remaining {
            None => self.file.read(buf),
            Some(0) => Ok(0),
            Some(remaining) => {
                let cap = (*remaining).min(buf.len() as u64) as usize;
                let n = self.file.read(&mut buf[..cap])?;
                *remaining -= n as u64;
                Ok(n)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;

    #[test]
    fn buffer_source_reads_back_bytes() {
        let mut src = DataSource::from_buffer(vec![1, 2, 3, 4]);
        let mut r = src.reader().unwrap();
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn free_callback_runs_on_drop() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        let src = DataSource::from_buffer_with_free(
            vec![9],
            Box::new(move |_| flag2.store(true, Ordering::SeqCst)),
        );
        drop(src);
        assert!(flag.load(Ordering::SeqCst));
    }
}
