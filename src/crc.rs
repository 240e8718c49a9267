//! CRC-16 (CCITT, poly 0x1021, init 0x0000, no reflect, no final xor).
//!
//! Used over the master header, every record header, and v3 data-class
//! thread payloads. The seed for a fresh running CRC is always
//! [`INITIAL_CRC`].

use crc::{Algorithm, Crc};

/// CRC-16/XMODEM has exactly these parameters: poly 0x1021, init 0x0000,
/// refin/refout false, xorout 0x0000. That's the variant NuFX uses.
const NUFX_CRC16: Algorithm<u16> = crc::CRC_16_XMODEM;

pub const INITIAL_CRC: u16 = 0x0000;

/// A running CRC-16 accumulator, folded into as bytes pass through the
/// primitive read/write helpers in [`crate::io`].
#[derive(Debug, Clone, Copy)]
pub struct RunningCrc {
    digest: u16,
}

impl Default for RunningCrc {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningCrc {
    pub fn new() -> Self {
        RunningCrc { digest: INITIAL_CRC }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let crc = Crc::<u16>::new(&NUFX_CRC16);
        let mut digest = crc.digest_with_initial(self.digest);
        digest.update(bytes);
        self.digest = digest.finalize();
    }

    pub fn value(&self) -> u16 {
        self.digest
    }
}

/// One-shot CRC of a full buffer, seeded at [`INITIAL_CRC`].
pub fn crc16(data: &[u8]) -> u16 {
    let mut running = RunningCrc::new();
    running.update(data);
    running.value()
}

/// Wraps any [`std::io::Read`] and folds every byte that passes through
/// into a running CRC. Used by the thread engine to checksum
/// uncompressed payload data as it streams through a codec's expand
/// step, without the codec itself needing to know about checksums.
pub struct CrcRead<'a, R> {
    inner: R,
    crc: &'a mut RunningCrc,
}

impl<'a, R: std::io::Read> CrcRead<'a, R> {
    pub fn new(inner: R, crc: &'a mut RunningCrc) -> Self {
        CrcRead { inner, crc }
    }
}

impl<'a, R: std::io::Read> std::io::Read for CrcRead<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }
}

/// Write-side counterpart of [`CrcRead`].
pub struct CrcWrite<'a, W> {
    inner: W,
    crc: &'a mut RunningCrc,
}

impl<'a, W: std::io::Write> CrcWrite<'a, W> {
    pub fn new(inner: W, crc: &'a mut RunningCrc) -> Self {
        CrcWrite { inner, crc }
    }
}

impl<'a, W: std::io::Write> std::io::Write for CrcWrite<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_initial_value() {
        assert_eq!(crc16(&[]), INITIAL_CRC);
    }

    #[test]
    fn running_matches_one_shot() {
        let data = b"ShrinkIt archive engine";
        let mut running = RunningCrc::new();
        running.update(&data[..5]);
        running.update(&data[5..]);
        assert_eq!(running.value(), crc16(data));
    }
}
