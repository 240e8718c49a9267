//! The 48-byte master header that opens every NuFX archive.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::crc::{self, RunningCrc};
use crate::datetime::DateTime;
use crate::error::{NufxError, Result};
use crate::io::{CrcReader, CrcWriter};

pub const MASTER_ID: [u8; 6] = [0x4E, 0xF5, 0x46, 0xE9, 0x6C, 0xE5];
pub const MASTER_HEADER_LEN: u64 = 48;
pub const CURRENT_MAX_VERSION: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterHeader {
    pub total_records: u32,
    pub archive_create_when: DateTime,
    pub archive_mod_when: DateTime,
    pub master_version: u16,
    pub master_eof: u32,
}

impl Default for MasterHeader {
    fn default() -> Self {
        MasterHeader {
            total_records: 0,
            archive_create_when: DateTime::default(),
            archive_mod_when: DateTime::default(),
            master_version: CURRENT_MAX_VERSION,
            master_eof: 0,
        }
    }
}

impl MasterHeader {
    /// Read and validate a master header at the reader's current
    /// position. The reader must already be positioned at the start of
    /// the 6-byte magic.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)?;
        if magic != MASTER_ID {
            return Err(NufxError::NotNuFX);
        }

        let mut crc = RunningCrc::new();
        let mut cr = CrcReader::new(r);
        let stored_crc = cr.read_u16()?;
        drop(cr);

        // The remaining fields (bytes 8..47) feed the running CRC.
        let mut cr = CrcReader::with_crc(r, &mut crc);
        let total_records = cr.read_u32()?;
        let archive_create_when = read_datetime(&mut cr)?;
        let archive_mod_when = read_datetime(&mut cr)?;
        let master_version = cr.read_u16()?;
        let _reserved1 = cr.read_bytes(8)?;
        let master_eof = cr.read_u32()?;
        let _reserved2 = cr.read_bytes(6)?;
        let failed = cr.failed;
        drop(cr);

        if failed {
            return Err(NufxError::BadStruct("truncated master header"));
        }
        if master_version > CURRENT_MAX_VERSION {
            return Err(NufxError::BadMHVersion(master_version));
        }
        if crc.value() != stored_crc {
            return Err(NufxError::BadMHCRC);
        }
        if master_eof == MASTER_HEADER_LEN as u32 {
            return Err(NufxError::NoRecords);
        }

        Ok(MasterHeader {
            total_records,
            archive_create_when,
            archive_mod_when,
            master_version,
            master_eof,
        })
    }

    /// Write the header at the writer's current position, back-patching
    /// the CRC once the body is known.
    pub fn write_to<W: Write + Seek>(&self, w: &mut W) -> Result<()> {
        let start = w.stream_position()?;
        w.write_all(&MASTER_ID)?;
        w.write_all(&[0, 0])?; // CRC placeholder

        let mut crc = RunningCrc::new();
        {
            let mut cw = CrcWriter::with_crc(w, &mut crc);
            cw.write_u32(self.total_records)?;
            write_datetime(&mut cw, &self.archive_create_when)?;
            write_datetime(&mut cw, &self.archive_mod_when)?;
            cw.write_u16(self.master_version)?;
            cw.write_bytes(&[0u8; 8])?;
            cw.write_u32(self.master_eof)?;
            cw.write_bytes(&[0u8; 6])?;
        }

        let end = w.stream_position()?;
        w.seek(SeekFrom::Start(start + 6))?;
        w.write_all(&crc.value().to_le_bytes())?;
        w.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

fn read_datetime<R: Read>(cr: &mut CrcReader<'_, R>) -> Result<DateTime> {
    let mut buf = [0u8; DateTime::WIRE_LEN];
    for b in buf.iter_mut() {
        *b = cr.read_u8()?;
    }
    Ok(DateTime::read_from(&mut &buf[..])?)
}

fn write_datetime<W: Write>(cw: &mut CrcWriter<'_, W>, dt: &DateTime) -> Result<()> {
    let mut buf = Vec::with_capacity(DateTime::WIRE_LEN);
    dt.write_to(&mut buf)?;
    cw.write_bytes(&buf)?;
    Ok(())
}

/// CRC-16 of an empty byte slice, used when seeding a brand-new header
/// that hasn't accumulated any body bytes yet.
pub fn empty_crc() -> u16 {
    crc::INITIAL_CRC
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_default_header() {
        let mut header = MasterHeader::default();
        header.total_records = 3;
        header.master_eof = 512;

        let mut buf = Cursor::new(Vec::new());
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.get_ref().len() as u64, MASTER_HEADER_LEN);

        buf.set_position(0);
        let read_back = MasterHeader::read_from(&mut buf).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn rejects_short_file() {
        let mut buf = Cursor::new(vec![0u8; 10]);
        assert!(matches!(MasterHeader::read_from(&mut buf), Err(NufxError::NotNuFX) | Err(NufxError::BadStruct(_))));
    }

    #[test]
    fn rejects_truncated_master_eof() {
        let mut header = MasterHeader::default();
        header.master_eof = MASTER_HEADER_LEN as u32;
        let mut buf = Cursor::new(Vec::new());
        header.write_to(&mut buf).unwrap();
        buf.set_position(0);
        assert!(matches!(MasterHeader::read_from(&mut buf), Err(NufxError::NoRecords)));
    }
}
