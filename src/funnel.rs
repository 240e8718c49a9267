//! Funnel / Straw: buffered conduits sitting between a codec and the
//! caller's sink or source.
//!
//! A `Funnel` sits between a codec's expand step and a [`crate::sink::DataSink`]:
//! it applies EOL conversion, optional high-ASCII stripping, and calls
//! the registered progress callback every [`PROGRESS_CHUNK`] bytes,
//! including a final `Done` update. A `Straw` is the write-side mirror,
//! sitting between a [`crate::source::DataSource`] and a codec's compress step.

use std::io::{self, Write};

use crate::callback::{ProgressCallback, ProgressState};

/// How often (in bytes) the progress callback fires during a long
/// codec operation.
pub const PROGRESS_CHUNK: u64 = 16 * 1024;

/// The concrete line-ending conversion to apply, already resolved from
/// the sink's `ConvertEol` mode and the archive's configured `EolStyle`
/// target (see [`crate::config::Config::effective_eol_target`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EolTarget {
    None,
    Lf,
    Cr,
    CrLf,
}

/// Wraps a sink, converting line endings and/or stripping high-ASCII as
/// bytes are written through it, and reporting progress.
pub struct Funnel<'a, W> {
    inner: W,
    eol: EolTarget,
    strip_high_ascii: bool,
    last_was_cr: bool,
    written: u64,
    total: u64,
    last_report: u64,
    progress: Option<&'a mut dyn ProgressCallback>,
}

impl<'a, W: Write> Funnel<'a, W> {
    pub fn new(
        inner: W,
        eol: EolTarget,
        strip_high_ascii: bool,
        total: u64,
        progress: Option<&'a mut dyn ProgressCallback>,
    ) -> Self {
        Funnel {
            inner,
            eol,
            strip_high_ascii,
            last_was_cr: false,
            written: 0,
            total,
            last_report: 0,
            progress,
        }
    }

    fn maybe_report(&mut self, state: ProgressState) -> io::Result<()> {
        let should = state == ProgressState::Done || self.written - self.last_report >= PROGRESS_CHUNK;
        if should {
            self.last_report = self.written;
            if let Some(cb) = self.progress.as_deref_mut() {
                if cb.on_progress(self.written, self.total, state) == crate::callback::ProgressAction::Abort {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "aborted by caller"));
                }
            }
        }
        Ok(())
    }

    /// Push one chunk of already-expanded (uncompressed) data through
    /// EOL conversion / high-ASCII stripping and into the sink.
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        let mut out = Vec::with_capacity(chunk.len());
        for &b in chunk {
            let b = if self.strip_high_ascii { b & 0x7F } else { b };
            match self.eol {
                EolTarget::None => out.push(b),
                EolTarget::Lf => {
                    if b != b'\r' {
                        out.push(b);
                    } else {
                        out.push(b'\n');
                    }
                }
                EolTarget::Cr => {
                    if b != b'\n' {
                        out.push(b);
                    } else {
                        out.push(b'\r');
                    }
                }
                EolTarget::CrLf => {
                    if b == b'\r' {
                        out.push(b'\r');
                        out.push(b'\n');
                        self.last_was_cr = true;
                        continue;
                    }
                    if b == b'\n' && self.last_was_cr {
                        self.last_was_cr = false;
                        continue;
                    }
                    if b == b'\n' {
                        out.push(b'\r');
                        out.push(b'\n');
                        continue;
                    }
                    out.push(b);
                    self.last_was_cr = false;
                }
            }
        }
        self.inner.write_all(&out)?;
        self.written += chunk.len() as u64;
        self.maybe_report(ProgressState::InProgress)?;
        Ok(())
    }

    /// Consume the funnel, returning the wrapped writer and the total
    /// (post-conversion) byte count pushed through it.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.maybe_report(ProgressState::Done)?;
        Ok((self.inner, self.written))
    }
}

impl<'a, W: Write> Write for Funnel<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The write-side (compress) counterpart: reads chunks from a source
/// and reports progress, with no EOL handling (compression always
/// operates on the raw bytes supplied by the caller).
pub struct Straw<'a> {
    read: u64,
    total: u64,
    last_report: u64,
    progress: Option<&'a mut dyn ProgressCallback>,
}

impl<'a> Straw<'a> {
    pub fn new(total: u64, progress: Option<&'a mut dyn ProgressCallback>) -> Self {
        Straw { read: 0, total, last_report: 0, progress }
    }

    pub fn advance(&mut self, n: u64) -> io::Result<()> {
        self.read += n;
        if self.read - self.last_report >= PROGRESS_CHUNK {
            self.last_report = self.read;
            if let Some(cb) = self.progress.as_deref_mut() {
                if cb.on_progress(self.read, self.total, ProgressState::InProgress)
                    == crate::callback::ProgressAction::Abort
                {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "aborted by caller"));
                }
            }
        }
        Ok(())
    }

    pub fn finish(mut self) {
        if let Some(cb) = self.progress.as_deref_mut() {
            let _ = cb.on_progress(self.read, self.total, ProgressState::Done);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_cr_to_lf() {
        let mut out = Vec::new();
        {
            let mut funnel = Funnel::new(&mut out, EolTarget::Lf, false, 3, None);
            funnel.push(b"a\rb").unwrap();
            let (_, n) = funnel.finish().unwrap();
            assert_eq!(n, 3);
        }
        assert_eq!(out, b"a\nb");
    }

    #[test]
    fn strips_high_ascii() {
        let mut out = Vec::new();
        {
            let mut funnel = Funnel::new(&mut out, EolTarget::None, true, 1, None);
            funnel.push(&[0xC1]).unwrap();
            funnel.finish().unwrap();
        }
        assert_eq!(out, vec![0x41]);
    }
}
