//! Detection and update of the BXY (Binary II) / SEA (self-extracting)
//! / BSE wrapper formats that a NuFX archive may be embedded in, and
//! the bounded junk-skip that tolerates leading garbage before the
//! outermost wrapper.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{NufxError, Result};
use crate::master_header::MASTER_ID;

pub const BINARY2_ID: [u8; 3] = [0x0A, 0x47, 0x4C];
pub const SEA_ID: [u8; 3] = [0xA2, 0x2E, 0x00];
pub const BINARY2_BLOCK_SIZE: u64 = 128;
/// Offset, within the 128-byte BXY block, of the "files to follow" byte.
const BNY_FILES_TO_FOLLOW: u64 = 127;
/// Offset of the NuFX header within a GS/ShrinkIt SEA preamble.
pub const SEA_OFFSET: u64 = 12_003;

const BNY_FILE_SIZE_LO: u64 = 8;
const BNY_FILE_SIZE_HI: u64 = 114;
const BNY_EOF_LO: u64 = 20;
const BNY_EOF_HI: u64 = 116;
const BNY_DISK_SPACE: u64 = 117;
const SEA_FUNKY_SIZE: u64 = 11_938;
const SEA_FUNKY_ADJUST: u32 = 68;
const SEA_LENGTH1: u64 = 11_946;
const SEA_LENGTH2: u64 = 12_001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Plain,
    Bxy,
    Sea,
    Bse,
}

impl WrapperKind {
    pub fn has_binary2(self) -> bool {
        matches!(self, WrapperKind::Bxy | WrapperKind::Bse)
    }
    pub fn has_sea(self) -> bool {
        matches!(self, WrapperKind::Sea | WrapperKind::Bse)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WrapperInfo {
    pub kind: WrapperKind,
    /// Offset of whatever leading junk precedes the outermost wrapper
    /// (0 if none).
    pub junk_offset: u64,
    /// Offset of the NuFX master header itself.
    pub header_offset: u64,
}

/// Detect the wrapper (if any) at the start of `r` and leave it
/// positioned just past the master header's 6-byte magic... actually
/// positioned at the start of the master header, ready for
/// [`crate::master_header::MasterHeader::read_from`]. Junk-skip only
/// applies in RO/RW modes (a caller opening in streaming mode passes
/// `allow_junk_skip = false`).
pub fn detect<R: Read + Seek>(r: &mut R, junk_skip_max: u32, allow_junk_skip: bool) -> Result<WrapperInfo> {
    let mut junk_offset: u64 = 0;
    loop {
        r.seek(SeekFrom::Start(junk_offset))?;
        let mut has_binary2 = false;
        let mut has_sea = false;
        let mut header_offset = junk_offset;

        let mut magic = [0u8; 6];
        let n = read_up_to(r, &mut magic)?;

        if n >= 3 && magic[..3] == BINARY2_ID {
            r.seek(SeekFrom::Start(junk_offset + BNY_FILES_TO_FOLLOW))?;
            let mut one = [0u8; 1];
            r.read_exact(&mut one).map_err(|_| NufxError::NotNuFX)?;
            if one[0] != 0 {
                return Err(NufxError::IsBinary2);
            }
            has_binary2 = true;
            header_offset += BINARY2_BLOCK_SIZE;
            r.seek(SeekFrom::Start(header_offset))?;
            read_up_to(r, &mut magic)?;
        }

        if magic[..3] == SEA_ID {
            has_sea = true;
            header_offset += SEA_OFFSET;
            r.seek(SeekFrom::Start(header_offset))?;
            read_up_to(r, &mut magic)?;
        }

        if magic == MASTER_ID {
            let kind = match (has_binary2, has_sea) {
                (false, false) => WrapperKind::Plain,
                (true, false) => WrapperKind::Bxy,
                (false, true) => WrapperKind::Sea,
                (true, true) => WrapperKind::Bse,
            };
            r.seek(SeekFrom::Start(header_offset))?;
            return Ok(WrapperInfo { kind, junk_offset, header_offset });
        }

        if has_binary2 {
            return Err(NufxError::IsBinary2);
        }

        if !allow_junk_skip || junk_offset >= junk_skip_max as u64 {
            return Err(NufxError::NotNuFX);
        }
        junk_offset += 1;
    }
}

fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// Recompute the length-encoding fields inside the BXY/SEA wrappers
/// once the new master header's EOF is known, and seek `w` to just
/// past whichever wrappers are present. `w` must already contain the
/// wrapper bytes (copied verbatim from the original, or from the
/// template for a brand new archive). A no-op when `kind` is `Plain`.
pub fn update<W: Read + Write + Seek>(w: &mut W, kind: WrapperKind, junk_offset: u64, header_offset: u64, new_master_eof: u32) -> Result<()> {
    if matches!(kind, WrapperKind::Plain) {
        return Ok(());
    }

    w.seek(SeekFrom::Start(junk_offset))?;

    if kind.has_binary2() {
        let mut ident = [0u8; 3];
        w.read_exact_compat(&mut ident)?;
        if ident != BINARY2_ID {
            return Err(NufxError::Internal("expected BXY wrapper while fixing up"));
        }
        // archive_len includes the SEA wrapper (if any) but excludes leading junk.
        let archive_len = new_master_eof as u64 + (header_offset - junk_offset) - BINARY2_BLOCK_SIZE;
        let archive_len512 = (archive_len + 511) / 512;

        w.seek(SeekFrom::Start(junk_offset + BNY_FILE_SIZE_LO))?;
        w.write_all(&((archive_len512 & 0xFFFF) as u16).to_le_bytes())?;
        w.seek(SeekFrom::Start(junk_offset + BNY_FILE_SIZE_HI))?;
        w.write_all(&((archive_len512 >> 16) as u16).to_le_bytes())?;

        w.seek(SeekFrom::Start(junk_offset + BNY_EOF_LO))?;
        w.write_all(&((archive_len & 0xFFFF) as u16).to_le_bytes())?;
        w.write_all(&[((archive_len >> 16) & 0xFF) as u8])?;

        w.seek(SeekFrom::Start(junk_offset + BNY_EOF_HI))?;
        w.write_all(&[((archive_len >> 24) & 0xFF) as u8])?;

        w.seek(SeekFrom::Start(junk_offset + BNY_DISK_SPACE))?;
        w.write_all(&(archive_len512 as u32).to_le_bytes())?;

        w.seek(SeekFrom::Start(junk_offset + BINARY2_BLOCK_SIZE))?;
    }

    if kind.has_sea() {
        let sea_base = if kind.has_binary2() { junk_offset + BINARY2_BLOCK_SIZE } else { junk_offset };
        w.seek(SeekFrom::Start(sea_base))?;
        let mut ident = [0u8; 3];
        w.read_exact_compat(&mut ident)?;
        if ident != SEA_ID {
            return Err(NufxError::Internal("expected SEA wrapper while fixing up"));
        }
        let archive_len = new_master_eof as u64;

        w.seek(SeekFrom::Start(sea_base + SEA_FUNKY_SIZE))?;
        w.write_all(&(archive_len as u32 + SEA_FUNKY_ADJUST).to_le_bytes())?;

        w.seek(SeekFrom::Start(sea_base + SEA_LENGTH1))?;
        w.write_all(&(archive_len as u16).to_le_bytes())?;

        w.seek(SeekFrom::Start(sea_base + SEA_LENGTH2))?;
        w.write_all(&(archive_len as u16).to_le_bytes())?;

        w.seek(SeekFrom::Start(sea_base + SEA_OFFSET))?;
    }

    Ok(())
}

/// Append whatever trailing padding the present wrappers demand: a
/// single 0x00 byte after SEA content when `mimic_shk` is set, and
/// zero-padding out to the next 128-byte boundary (excluding leading
/// junk from the count) when BXY is present.
pub fn pad_trailer<W: Write + Seek>(w: &mut W, kind: WrapperKind, junk_offset: u64, mimic_shk: bool) -> Result<()> {
    if matches!(kind, WrapperKind::Plain) {
        return Ok(());
    }
    w.seek(SeekFrom::End(0))?;

    if kind.has_sea() && mimic_shk {
        w.write_all(&[0u8])?;
    }

    if kind.has_binary2() {
        let cur = w.stream_position()?;
        let rel = cur - junk_offset;
        let rem = rel % BINARY2_BLOCK_SIZE;
        if rem != 0 {
            let pad = BINARY2_BLOCK_SIZE - rem;
            w.write_all(&vec![0u8; pad as usize])?;
        }
    }
    Ok(())
}

/// Decompose the ProDOS filesystem-info word into its path-separator
/// byte (the low byte).
pub fn sep_from_sysinfo(fs_info: u16) -> u8 {
    (fs_info & 0xFF) as u8
}

pub fn set_sep_in_sysinfo(fs_info: u16, sep: u8) -> u16 {
    (fs_info & 0xFF00) | sep as u16
}

/// Small helper trait so `update`'s seek-then-read dance reads the same
/// whether the caller passes a `File` or a `Cursor`; avoids importing
/// `Read` at every call site above.
trait ReadExactCompat {
    fn read_exact_compat(&mut self, buf: &mut [u8]) -> Result<()>;
}

impl<T: Read> ReadExactCompat for T {
    fn read_exact_compat(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn plain_archive() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MASTER_ID);
        buf.extend_from_slice(&[0u8; 42]); // rest of the 48-byte header, don't care
        buf
    }

    #[test]
    fn detects_plain_archive_at_offset_zero() {
        let data = plain_archive();
        let mut cur = Cursor::new(data);
        let info = detect(&mut cur, 1024, true).unwrap();
        assert_eq!(info.kind, WrapperKind::Plain);
        assert_eq!(info.junk_offset, 0);
        assert_eq!(info.header_offset, 0);
    }

    #[test]
    fn junk_skip_finds_header_within_window() {
        let mut data = vec![0u8; 10];
        data.extend_from_slice(&plain_archive());
        let mut cur = Cursor::new(data);
        let info = detect(&mut cur, 1024, true).unwrap();
        assert_eq!(info.junk_offset, 10);
        assert_eq!(info.header_offset, 10);
    }

    #[test]
    fn junk_beyond_window_is_rejected() {
        let mut data = vec![0u8; 20];
        data.extend_from_slice(&plain_archive());
        let mut cur = Cursor::new(data);
        assert!(matches!(detect(&mut cur, 8, true), Err(NufxError::NotNuFX)));
    }

    #[test]
    fn binary2_with_files_following_is_rejected() {
        let mut data = vec![0u8; BINARY2_BLOCK_SIZE as usize];
        data[0..3].copy_from_slice(&BINARY2_ID);
        data[BNY_FILES_TO_FOLLOW as usize] = 3;
        data.extend_from_slice(&plain_archive());
        let mut cur = Cursor::new(data);
        assert!(matches!(detect(&mut cur, 1024, true), Err(NufxError::IsBinary2)));
    }

    #[test]
    fn binary2_wrapper_is_consumed() {
        let mut data = vec![0u8; BINARY2_BLOCK_SIZE as usize];
        data[0..3].copy_from_slice(&BINARY2_ID);
        data[BNY_FILES_TO_FOLLOW as usize] = 0;
        data.extend_from_slice(&plain_archive());
        let mut cur = Cursor::new(data);
        let info = detect(&mut cur, 1024, true).unwrap();
        assert_eq!(info.kind, WrapperKind::Bxy);
        assert_eq!(info.header_offset, BINARY2_BLOCK_SIZE);
    }

    #[test]
    fn sysinfo_sep_round_trips() {
        let info = set_sep_in_sysinfo(0x0100, b'/');
        assert_eq!(sep_from_sysinfo(info), b'/');
        assert_eq!(info & 0xFF00, 0x0100);
    }
}
