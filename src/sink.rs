//! `DataSink`: the polymorphic output side of the engine. Extracted
//! thread data lands in a file path, an already-open file handle, an
//! in-memory buffer, or is discarded entirely (used by `test`, which
//! wants the codec/CRC pipeline exercised without materializing bytes).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::HandleExisting;
use crate::error::Result;
use crate::funnel::EolTarget;

enum Target {
    FilePath { path: PathBuf, existing: HandleExisting },
    OpenFile(File),
    Buffer(Vec<u8>),
    Void,
}

/// Where extracted (uncompressed) thread data is written, plus the
/// per-extraction EOL-conversion and high-ASCII-stripping flags that
/// drive the [`crate::funnel::Funnel`] wrapped around it. `eol_target`
/// is the already-resolved conversion (see
/// [`crate::config::Config::effective_eol_target`]), not the raw mode,
/// so the codec layer never needs a `Config` in scope.
pub struct DataSink {
    target: Target,
    pub eol_target: EolTarget,
    pub strip_high_ascii: bool,
    written: u64,
}

impl DataSink {
    pub fn to_path(path: impl AsRef<Path>, existing: HandleExisting) -> DataSink {
        DataSink {
            target: Target::FilePath { path: path.as_ref().to_path_buf(), existing },
            eol_target: EolTarget::None,
            strip_high_ascii: false,
            written: 0,
        }
    }

    pub fn to_open_file(file: File) -> DataSink {
        DataSink {
            target: Target::OpenFile(file),
            eol_target: EolTarget::None,
            strip_high_ascii: false,
            written: 0,
        }
    }

    pub fn to_buffer() -> DataSink {
        DataSink {
            target: Target::Buffer(Vec::new()),
            eol_target: EolTarget::None,
            strip_high_ascii: false,
            written: 0,
        }
    }

    /// A sink that discards everything written to it; used by `test()`
    /// to run the full expand+CRC pipeline without producing output.
    pub fn void() -> DataSink {
        DataSink { target: Target::Void, eol_target: EolTarget::None, strip_high_ascii: false, written: 0 }
    }

    pub fn with_eol(mut self, target: EolTarget) -> Self {
        self.eol_target = target;
        self
    }

    pub fn with_strip_high_ascii(mut self, strip: bool) -> Self {
        self.strip_high_ascii = strip;
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Open the underlying `Write` target, checking the `HandleExisting`
    /// policy for path-backed sinks before any bytes are produced so a
    /// conflict surfaces before the extraction pipeline starts running.
    pub fn writer(&mut self) -> Result<Box<dyn Write + '_>> {
        match &mut self.target {
            Target::FilePath { path, existing } => {
                let exists = path.exists();
                if exists && *existing == HandleExisting::NeverOverwrite {
                    return Err(crate::error::NufxError::FileExists(path.display().to_string()));
                }
                if !exists && *existing == HandleExisting::MustOverwrite {
                    return Err(crate::error::NufxError::FileNotFound(path.display().to_string()));
                }
                let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
                Ok(Box::new(file))
            }
            Target::OpenFile(file) => Ok(Box::new(file)),
            Target::Buffer(buf) => Ok(Box::new(buf)),
            Target::Void => Ok(Box::new(io::sink())),
        }
    }

    /// Record how many bytes the funnel actually pushed through this
    /// sink, for callers that want a final byte count.
    pub fn note_written(&mut self, n: u64) {
        self.written += n;
    }

    /// Consume the sink and return its accumulated bytes, only valid
    /// for a `Buffer` sink.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self.target {
            Target::Buffer(buf) => Some(buf),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_accumulates_writes() {
        let mut sink = DataSink::to_buffer();
        {
            let mut w = sink.writer().unwrap();
            w.write_all(b"hello").unwrap();
        }
        assert_eq!(sink.into_buffer().unwrap(), b"hello");
    }

    #[test]
    fn void_sink_discards() {
        let mut sink = DataSink::void();
        let mut w = sink.writer().unwrap();
        w.write_all(b"ignored").unwrap();
    }

    #[test]
    fn never_overwrite_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, b"pre-existing").unwrap();
        let mut sink = DataSink::to_path(&path, HandleExisting::NeverOverwrite);
        assert!(sink.writer().is_err());
    }
}
