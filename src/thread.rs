//! Thread headers, the per-thread read/scan/extract pipeline, and the
//! ThreadMod journal that records pending Add/Update/Delete changes
//! against a copy-set record.

use std::io::{Read, Seek, SeekFrom, Write};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::callback::ProgressCallback;
use crate::codec::{self, CodecContext};
use crate::crc::INITIAL_CRC;
use crate::error::{NufxError, Result};
use crate::io::{CrcReader, CrcWriter};
use crate::sink::DataSink;
use crate::source::DataSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadIdx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ThreadClass {
    Message = 0,
    Control = 1,
    Data = 2,
    Filename = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum ThreadFormat {
    Uncompressed = 0,
    HuffmanSq = 1,
    Lzw1 = 2,
    Lzw2 = 3,
    Unused4 = 4,
    Lzc12 = 5,
    Lzc16 = 6,
    Deflate = 7,
    Bzip2 = 8,
}

/// A thread identity is the (class, kind) pair; `kind`'s meaning depends
/// on `class`, so this is modeled as one flat enum over well-known
/// combinations from the format spec, falling back to `Other` for
/// anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadId {
    DataFork,
    RsrcFork,
    DiskImage,
    Filename,
    Comment,
    Mkdir,
    IIgsIcon,
    Other(u16, u16),
}

impl ThreadId {
    pub fn from_class_kind(class: u16, kind: u16) -> ThreadId {
        match (class, kind) {
            (2, 0) => ThreadId::DataFork,
            (2, 2) => ThreadId::RsrcFork,
            (2, 1) => ThreadId::DiskImage,
            (3, 0) => ThreadId::Filename,
            (0, 1) => ThreadId::Comment,
            (1, 0) => ThreadId::Mkdir,
            (0, 2) => ThreadId::IIgsIcon,
            (c, k) => ThreadId::Other(c, k),
        }
    }

    pub fn class_kind(self) -> (u16, u16) {
        match self {
            ThreadId::DataFork => (2, 0),
            ThreadId::RsrcFork => (2, 2),
            ThreadId::DiskImage => (2, 1),
            ThreadId::Filename => (3, 0),
            ThreadId::Comment => (0, 1),
            ThreadId::Mkdir => (1, 0),
            ThreadId::IIgsIcon => (0, 2),
            ThreadId::Other(c, k) => (c, k),
        }
    }

    /// Threads that reserve fixed on-disk space and so may be Updated
    /// in place as long as the new payload still fits.
    pub fn is_pre_sized(self) -> bool {
        matches!(self, ThreadId::Filename | ThreadId::Comment)
    }

    pub fn is_data_class(self, class: u16) -> bool {
        class == ThreadClass::Data as u16
    }
}

pub const WIRE_LEN: u64 = 16;
pub const REASONABLE_FILENAME_LEN: usize = 2048;

#[derive(Debug, Clone)]
pub struct Thread {
    pub idx: ThreadIdx,
    pub class: u16,
    pub format: u16,
    pub kind: u16,
    pub thread_crc: u16,
    pub uncompressed_eof: u32,
    pub compressed_eof: u32,
    /// Byte offset of this thread's payload within the archive file.
    /// `None` until the record has been scanned (or for brand new
    /// threads that have no on-disk position yet).
    pub file_offset: Option<u64>,
    /// True for a phantom thread synthesized by mask-dataless; these
    /// are never written back to disk.
    pub synthesized: bool,
    /// The thread's compressed bytes, already read off a streaming
    /// (non-seekable) source by `Archive::stream_next`. When set,
    /// `extract` reads from here instead of seeking `file_offset` in
    /// the archive file, since a stream can't be seeked back into.
    pub inline_bytes: Option<Vec<u8>>,
}

impl Thread {
    pub fn thread_id(&self) -> ThreadId {
        ThreadId::from_class_kind(self.class, self.kind)
    }

    pub fn read_header<R: Read>(cr: &mut CrcReader<'_, R>, idx: ThreadIdx) -> Result<Thread> {
        let class = cr.read_u16()?;
        let format = cr.read_u16()?;
        let kind = cr.read_u16()?;
        let thread_crc = cr.read_u16()?;
        let uncompressed_eof = cr.read_u32()?;
        let compressed_eof = cr.read_u32()?;
        Ok(Thread {
            idx,
            class,
            format,
            kind,
            thread_crc,
            uncompressed_eof,
            compressed_eof,
            file_offset: None,
            synthesized: false,
            inline_bytes: None,
        })
    }

    pub fn write_header<W: Write>(&self, cw: &mut CrcWriter<'_, W>) -> Result<()> {
        cw.write_u16(self.class)?;
        cw.write_u16(self.format)?;
        cw.write_u16(self.kind)?;
        cw.write_u16(self.thread_crc)?;
        cw.write_u32(self.uncompressed_eof)?;
        cw.write_u32(self.compressed_eof)?;
        Ok(())
    }

    /// Reconstruct `actual_eof`, correcting the known ShrinkIt 3.0.1 bug
    /// where a disk image's `thread_eof` was mis-stored. Follows
    /// `Nu_ReadThreadHeaders` exactly: storage_type <= 13 means the
    /// value is really a block count times 512; the DOS 3.3-on-5.25"
    /// special case also resolves to 512-byte blocks; anything else is
    /// `extra_type * storage_type`.
    pub fn actual_eof(&self, storage_type: u16, extra_type: u32, fs_is_dos33: bool) -> u32 {
        if self.thread_id() != ThreadId::DiskImage {
            return self.uncompressed_eof;
        }
        if storage_type <= 13 {
            extra_type.wrapping_mul(512)
        } else if storage_type == 256 && extra_type == 280 && fs_is_dos33 {
            extra_type.wrapping_mul(512)
        } else {
            extra_type.wrapping_mul(storage_type as u32)
        }
    }

    /// A phantom zero-length thread synthesized when mask-dataless is
    /// enabled and a data-class record omits the data or resource fork.
    pub fn synthesize(idx: ThreadIdx, kind: ThreadId) -> Thread {
        let (class, kind) = kind.class_kind();
        Thread {
            idx,
            class,
            format: ThreadFormat::Uncompressed as u16,
            kind,
            thread_crc: INITIAL_CRC,
            uncompressed_eof: 0,
            compressed_eof: 0,
            file_offset: None,
            synthesized: true,
            inline_bytes: None,
        }
    }

    /// Extract this thread's (uncompressed) payload to `sink`, running
    /// it through the codec selected by `format` and verifying the v3
    /// CRC unless `ignore_crc` is set.
    #[allow(clippy::too_many_arguments)]
    pub fn extract<R: Read + Seek>(
        &self,
        archive_file: &mut R,
        version: u16,
        ignore_crc: bool,
        sink: &mut DataSink,
        progress: Option<&mut dyn ProgressCallback>,
    ) -> Result<()> {
        let ctx =
            CodecContext { uncompressed_len: self.uncompressed_eof as u64, compressed_len: self.compressed_eof as u64 };
        let crc = if let Some(bytes) = &self.inline_bytes {
            codec::expand(self.format, &ctx, &mut &bytes[..], sink, progress)?
        } else {
            let offset = self.file_offset.ok_or(NufxError::Internal("thread has no file offset"))?;
            archive_file.seek(SeekFrom::Start(offset))?;
            let mut limited = (&mut *archive_file).take(self.compressed_eof as u64);
            codec::expand(self.format, &ctx, &mut limited, sink, progress)?
        };

        if version >= 3 && !ignore_crc && crc.value() != self.thread_crc {
            return Err(NufxError::BadThreadCRC);
        }
        Ok(())
    }
}

/// A pending change to a copy-set record's thread list, staged by
/// `add_thread`/`update_thread`/`delete_thread` and applied during
/// `Flush`.
pub enum ThreadMod {
    Add {
        thread_id: ThreadId,
        format: ThreadFormat,
        source: DataSource,
        provisional_idx: ThreadIdx,
    },
    Update {
        idx: ThreadIdx,
        source: DataSource,
    },
    Delete {
        idx: ThreadIdx,
        thread_id: ThreadId,
    },
}

impl ThreadMod {
    pub fn idx(&self) -> ThreadIdx {
        match self {
            ThreadMod::Add { provisional_idx, .. } => *provisional_idx,
            ThreadMod::Update { idx, .. } => *idx,
            ThreadMod::Delete { idx, .. } => *idx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actual_eof_handles_disk_image_quirk() {
        let t = Thread {
            idx: ThreadIdx(1000),
            class: 2,
            format: 0,
            kind: 1,
            thread_crc: 0,
            uncompressed_eof: 0xFFFF_FFFF, // known-bad stored value
            compressed_eof: 0,
            file_offset: None,
            synthesized: false,
            inline_bytes: None,
        };
        // storage_type 1 (seedling) <= 13: block count * 512
        assert_eq!(t.actual_eof(1, 280, false), 280 * 512);
        // DOS 3.3 5.25" special case
        assert_eq!(t.actual_eof(256, 280, true), 280 * 512);
        // general case
        assert_eq!(t.actual_eof(512, 100, false), 100 * 512);
    }

    #[test]
    fn thread_id_round_trips_class_kind() {
        for id in [
            ThreadId::DataFork,
            ThreadId::RsrcFork,
            ThreadId::DiskImage,
            ThreadId::Filename,
            ThreadId::Comment,
            ThreadId::Mkdir,
            ThreadId::IIgsIcon,
        ] {
            let (c, k) = id.class_kind();
            assert_eq!(ThreadId::from_class_kind(c, k), id);
        }
    }
}
