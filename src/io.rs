//! Little-endian primitive I/O with an optional running CRC fold.
//!
//! All multi-byte fields in NuFX archives are little-endian. Every
//! header reader/writer in [`crate::master_header`], [`crate::record`],
//! and [`crate::thread`] goes through these helpers so the CRC
//! accumulation can never be forgotten for one field and not another.

use std::io::{self, Read, Write};

use crate::crc::RunningCrc;

/// Wraps a reader and optionally folds every byte read into a running
/// CRC-16. Also latches a "header I/O failed" flag on any short read,
/// which callers check at record/thread boundaries (see spec: a torn
/// read must never be mistaken for a valid short record).
pub struct CrcReader<'a, R> {
    inner: &'a mut R,
    crc: Option<&'a mut RunningCrc>,
    pub failed: bool,
}

impl<'a, R: Read> CrcReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        CrcReader { inner, crc: None, failed: false }
    }

    pub fn with_crc(inner: &'a mut R, crc: &'a mut RunningCrc) -> Self {
        CrcReader { inner, crc: Some(crc), failed: false }
    }

    fn read_exact_folding(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                if let Some(crc) = self.crc.as_deref_mut() {
                    crc.update(buf);
                }
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact_folding(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact_folding(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_folding(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_folding(&mut buf)?;
        Ok(buf)
    }
}

/// Symmetric writer counterpart of [`CrcReader`].
pub struct CrcWriter<'a, W> {
    inner: &'a mut W,
    crc: Option<&'a mut RunningCrc>,
}

impl<'a, W: Write> CrcWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        CrcWriter { inner, crc: None }
    }

    pub fn with_crc(inner: &'a mut W, crc: &'a mut RunningCrc) -> Self {
        CrcWriter { inner, crc: Some(crc) }
    }

    fn write_all_folding(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        if let Some(crc) = self.crc.as_deref_mut() {
            crc.update(buf);
        }
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.write_all_folding(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> io::Result<()> {
        self.write_all_folding(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> io::Result<()> {
        self.write_all_folding(&v.to_le_bytes())
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all_folding(buf)
    }
}

/// Scan `haystack` for `needle`, byte by byte, up to `max_skip` bytes in.
/// Used by the wrapper engine's junk-skip and is small enough to not
/// need a proper substring-search algorithm.
pub fn find_signature(haystack: &[u8], needle: &[u8], max_skip: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    let last = (haystack.len() - needle.len()).min(max_skip);
    (0..=last).find(|&offset| &haystack[offset..offset + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives_with_crc() {
        let mut buf = Vec::new();
        let mut crc = RunningCrc::new();
        {
            let mut w = CrcWriter::with_crc(&mut buf, &mut crc);
            w.write_u16(0x1234).unwrap();
            w.write_u32(0xdead_beef).unwrap();
        }
        let write_crc = crc.value();

        let mut crc = RunningCrc::new();
        let mut cursor = &buf[..];
        let mut r = CrcReader::with_crc(&mut cursor, &mut crc);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(crc.value(), write_crc);
    }

    #[test]
    fn short_read_latches_failed() {
        let data = [0u8; 1];
        let mut cursor = &data[..];
        let mut r = CrcReader::new(&mut cursor);
        assert!(r.read_u32().is_err());
        assert!(r.failed);
    }

    #[test]
    fn finds_signature_within_skip_window() {
        let hay = [0u8, 0, 0, 0xAB, 0xCD];
        assert_eq!(find_signature(&hay, &[0xAB, 0xCD], 8), Some(3));
        assert_eq!(find_signature(&hay, &[0xAB, 0xCD], 2), None);
    }
}
