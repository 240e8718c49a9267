//! Record headers: the per-record read/write pipeline, storage-type
//! derivation, filename reconciliation (in-header vs. thread), and the
//! pending ThreadMod journal that Flush applies to a copy-set record.

use std::io::{Read, Seek, Write};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::crc::RunningCrc;
use crate::datetime::DateTime;
use crate::error::{NufxError, Result};
use crate::io::{CrcReader, CrcWriter};
use crate::macroman;
use crate::thread::{Thread, ThreadFormat, ThreadId, ThreadIdx, ThreadMod, REASONABLE_FILENAME_LEN, WIRE_LEN as THREAD_WIRE_LEN};

pub const RECORD_ID: [u8; 4] = [0x4E, 0xF5, 0x46, 0xD8];
pub const MAX_RECORD_VERSION: u16 = 3;
pub const EMIT_VERSION: u16 = 3;

/// Upper bounds used to reject corrupt headers before trusting their
/// length fields; chosen generously (an archive legitimately needing
/// more than a few KB of attribute area, or more than a few hundred
/// threads, doesn't exist in practice).
pub const REASONABLE_ATTRIB_COUNT: u16 = 4096;
pub const REASONABLE_TOTAL_THREADS: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordIdx(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum FilesystemId {
    Unknown = 0,
    ProDos = 1,
    Dos33 = 2,
    Dos32 = 3,
    Pascal = 4,
    Macos = 5,
    CpmOrdered = 6,
    Msdos = 8,
    HighSierra = 9,
    Iso9660 = 10,
    Afs = 11,
    MacMfs = 13,
    Lisa = 15,
}

pub const STORAGE_UNKNOWN: u16 = 0;
pub const STORAGE_SEEDLING: u16 = 1;
pub const STORAGE_SAPLING: u16 = 2;
pub const STORAGE_TREE: u16 = 3;
pub const STORAGE_EXTENDED: u16 = 5;
pub const SEEDLING_MAX: u32 = 512;
pub const SAPLING_MAX: u32 = 131_072;

/// Default name presented for a record whose filename hasn't been
/// resolved yet (streaming mode reaching a data thread before its
/// filename thread; see Testable Properties, scenario 6).
pub const DEFAULT_FILENAME: &[u8] = b"UNKNOWN";

bitflags! {
    /// ProDOS-style access permission bits carried in `Record::access`.
    /// Stored on the wire as a plain `u32`; this is an ergonomic view
    /// over the same bits, not a different serialization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const INVISIBLE = 0x04;
        const BACKUP_NEEDED = 0x20;
        const RENAME_ENABLED = 0x40;
        const DESTROY_ENABLED = 0x80;
    }
}

impl AccessFlags {
    /// The usual "unlocked" default ShrinkIt stamps on new files.
    pub const UNLOCKED: AccessFlags = AccessFlags::READ
        .union(AccessFlags::WRITE)
        .union(AccessFlags::BACKUP_NEEDED)
        .union(AccessFlags::RENAME_ENABLED)
        .union(AccessFlags::DESTROY_ENABLED);
}

#[derive(Debug)]
pub struct Record {
    pub idx: RecordIdx,
    pub header_crc: u16,
    pub attrib_count: u16,
    pub version: u16,
    pub fs_id: u16,
    pub fs_info: u16,
    pub access: u32,
    pub file_type: u32,
    pub extra_type: u32,
    pub storage_type: u16,
    pub create_when: DateTime,
    pub mod_when: DateTime,
    pub archive_when: DateTime,
    pub option_list: Vec<u8>,
    /// Bytes of the attribute area whose purpose isn't understood but
    /// which must round-trip unchanged (producers are known to leave
    /// junk here; see `Nu_ReadRecordHeader`).
    pub extra_bytes: Vec<u8>,
    /// In-header filename (Mac OS Roman bytes), if present. `None` once
    /// dropped by a rename that moved the name into a thread.
    pub header_filename: Option<Vec<u8>>,
    /// Filename read from this record's filename thread, if any, set
    /// by the scanning pass in `archive.rs` (the thread's payload
    /// isn't available until that thread has actually been read).
    pub thread_filename: Option<Vec<u8>>,
    pub threads: Vec<Thread>,
    pub thread_mods: Vec<ThreadMod>,
    /// How many of `threads` are mask-dataless phantoms, synthesized at
    /// read time and never written back.
    pub fake_threads: u32,
    pub file_offset: u64,
    pub header_length: u64,
    pub dirty_header: bool,
    pub drop_header_filename: bool,
    pub is_bad_mac: bool,
}

impl Record {
    /// Read one record header (and its thread headers) starting at the
    /// reader's current position, which must be the 4-byte record ID.
    pub fn read_from<R: Read + Seek>(
        r: &mut R,
        idx: RecordIdx,
        file_offset: u64,
        ignore_crc: bool,
        mask_dataless: bool,
        handle_bad_mac: bool,
    ) -> Result<Record> {
        let mut id = [0u8; 4];
        r.read_exact(&mut id)?;
        if id != RECORD_ID {
            return Err(NufxError::RecHdrNotFound);
        }

        let mut cr = CrcReader::new(r);
        let header_crc = cr.read_u16()?;
        drop(cr);

        let mut crc = RunningCrc::new();
        let mut bytes_read: u32 = 56;
        let (
            attrib_count,
            version,
            mut total_threads,
            fs_id,
            fs_info,
            access,
            file_type,
            extra_type,
            storage_type,
            create_when,
            mod_when,
            archive_when,
        );
        {
            let mut cr = CrcReader::with_crc(r, &mut crc);
            attrib_count = cr.read_u16()?;
            version = cr.read_u16()?;
            total_threads = cr.read_u32()?;
            fs_id = cr.read_u16()?;
            fs_info = cr.read_u16()?;
            access = cr.read_u32()?;
            file_type = cr.read_u32()?;
            extra_type = cr.read_u32()?;
            storage_type = cr.read_u16()?;
            create_when = read_datetime(&mut cr)?;
            mod_when = read_datetime(&mut cr)?;
            archive_when = read_datetime(&mut cr)?;
            if cr.failed {
                return Err(NufxError::BadStruct("truncated record header"));
            }
        }

        if attrib_count as u32 > REASONABLE_ATTRIB_COUNT as u32 {
            return Err(NufxError::BadRecord("attribute count is unreasonably large"));
        }
        if version > MAX_RECORD_VERSION {
            return Err(NufxError::BadRecord("unrecognized record version"));
        }
        if total_threads > REASONABLE_TOTAL_THREADS {
            return Err(NufxError::BadRecord("unreasonable number of threads"));
        }

        let mut option_list = Vec::new();
        if version > 0 {
            let mut cr = CrcReader::with_crc(r, &mut crc);
            let mut option_size = cr.read_u16()? as u32;
            bytes_read += 2;

            // GSHK has been observed to over-report the option list
            // size; clamp it to whatever room remains in the attribute
            // area rather than trusting the stored value.
            let remaining = (attrib_count as u32).saturating_sub(2);
            if option_size + bytes_read > remaining {
                option_size = remaining.saturating_sub(bytes_read);
            }
            if option_size + bytes_read > remaining {
                return Err(NufxError::BadRecord("option size exceeds attribute area"));
            }
            if option_size > 0 {
                option_list = cr.read_bytes(option_size as usize)?;
                bytes_read += option_size;
            }
        }

        let extra_count = (attrib_count as u32).saturating_sub(2).saturating_sub(bytes_read);
        let mut extra_bytes = Vec::new();
        if extra_count > 0 {
            let mut cr = CrcReader::with_crc(r, &mut crc);
            extra_bytes = cr.read_bytes(extra_count as usize)?;
            bytes_read += extra_count;
        }

        let mut cr = CrcReader::with_crc(r, &mut crc);
        let filename_len = cr.read_u16()?;
        bytes_read += 2;
        if filename_len as usize > REASONABLE_FILENAME_LEN {
            return Err(NufxError::BadRecord("filename length is unreasonably large"));
        }
        let mut header_filename = None;
        if filename_len > 0 {
            let mut name = cr.read_bytes(filename_len as usize)?;
            bytes_read += filename_len as u32;
            macroman::strip_legacy_high_bit(&mut name);
            header_filename = Some(name);
        }
        if cr.failed {
            return Err(NufxError::BadStruct("truncated record header"));
        }

        // A data-class record that claims zero threads is a known
        // GSHK v1.1 bug; synthesize phantom forks so callers see a
        // uniform representation, but never write them back.
        let mut fake_threads = 0u32;
        if total_threads == 0 && mask_dataless {
            fake_threads += 1;
            if storage_type == STORAGE_EXTENDED {
                fake_threads += 1;
            }
            total_threads = fake_threads;
        }

        let mut threads = Vec::with_capacity(total_threads as usize);
        let real_threads = total_threads - fake_threads;
        {
            let mut cr = CrcReader::with_crc(r, &mut crc);
            let mut next_idx = idx.0;
            for _ in 0..real_threads {
                next_idx += 1;
                threads.push(Thread::read_header(&mut cr, ThreadIdx(next_idx))?);
            }
            if cr.failed {
                return Err(NufxError::BadStruct("truncated thread headers"));
            }
        }
        if fake_threads > 0 {
            let mut next_idx = idx.0 + threads.len() as u32;
            next_idx += 1;
            threads.push(Thread::synthesize(ThreadIdx(next_idx), ThreadId::DataFork));
            if fake_threads > 1 {
                next_idx += 1;
                threads.push(Thread::synthesize(ThreadIdx(next_idx), ThreadId::RsrcFork));
            }
            tracing::debug!(record = idx.0, "synthesized dataless threads (mask-dataless)");
        }

        if !ignore_crc && crc.value() != header_crc {
            return Err(NufxError::BadRHCRC);
        }

        let mut is_bad_mac = false;
        let mut fs_info = fs_info;
        if handle_bad_mac && fs_id == FilesystemId::MacMfs as u16 && fs_info == b'?' as u16 {
            is_bad_mac = true;
            fs_info = b':' as u16;
        }

        let header_length = bytes_read as u64 + (total_threads - fake_threads) as u64 * THREAD_WIRE_LEN;

        Ok(Record {
            idx,
            header_crc,
            attrib_count,
            version,
            fs_id,
            fs_info,
            access,
            file_type,
            extra_type,
            storage_type,
            create_when,
            mod_when,
            archive_when,
            option_list,
            extra_bytes,
            header_filename,
            thread_filename: None,
            threads,
            thread_mods: Vec::new(),
            fake_threads,
            file_offset,
            header_length,
            dirty_header: false,
            drop_header_filename: false,
            is_bad_mac,
        })
    }

    /// The canonical filename: the first filename thread wins over an
    /// in-header name, per the design note on the header/thread
    /// filename relationship. Falls back to the synthesized default
    /// name `"UNKNOWN"` when neither is available (e.g. a streaming
    /// read that reaches a data thread before its filename thread).
    pub fn filename_mor(&self) -> &[u8] {
        self.thread_filename
            .as_deref()
            .or(self.header_filename.as_deref())
            .unwrap_or(DEFAULT_FILENAME)
    }

    /// The record's access permission bits, as [`AccessFlags`]; unknown
    /// bits (producers are free to set reserved bits) are silently
    /// dropped by `from_bits_truncate`, matching how the original reads
    /// the byte without validating it.
    pub fn access_flags(&self) -> AccessFlags {
        AccessFlags::from_bits_truncate(self.access)
    }

    pub fn set_access_flags(&mut self, flags: AccessFlags) {
        self.access = flags.bits();
    }

    pub fn has_filename_thread(&self) -> bool {
        self.threads.iter().any(|t| t.thread_id() == ThreadId::Filename)
    }

    pub fn find_thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| t.thread_id() == id)
    }

    pub fn find_thread_idx(&self, idx: ThreadIdx) -> Option<&Thread> {
        self.threads.iter().find(|t| t.idx == idx)
    }

    /// True for a thread that currently exists and isn't slated for
    /// deletion by a pending mod.
    fn survives(&self, t: &Thread) -> bool {
        !self
            .thread_mods
            .iter()
            .any(|m| matches!(m, ThreadMod::Delete { idx, .. } if *idx == t.idx))
    }

    /// Determine whether `id` would conflict with the record's current
    /// thread set (minus pending deletes) plus any already-staged Add
    /// mods. At most one of {data fork, disk image, resource fork},
    /// one filename thread, and data/control-class threads may not
    /// coexist.
    fn check_add_conflict(&self, id: ThreadId) -> Result<()> {
        let exists = self
            .threads
            .iter()
            .filter(|t| self.survives(t))
            .any(|t| t.thread_id() == id)
            || self.thread_mods.iter().any(|m| matches!(m, ThreadMod::Add { thread_id, .. } if *thread_id == id));
        if exists {
            return Err(NufxError::ThreadAdd("a thread of that kind already exists"));
        }

        let (class, _) = id.class_kind();
        if class == 2 {
            // data-class and control-class threads may not coexist
            let has_control = self
                .threads
                .iter()
                .filter(|t| self.survives(t))
                .any(|t| t.class == 1)
                || self.thread_mods.iter().any(|m| {
                    matches!(m, ThreadMod::Add { thread_id, .. } if thread_id.class_kind().0 == 1)
                });
            if has_control {
                return Err(NufxError::ThreadAdd("data and control threads may not coexist"));
            }
        }
        Ok(())
    }

    /// Stage an Add ThreadMod. `next_idx` is the archive's monotonic
    /// RecordIdx/ThreadIdx counter, bumped by the caller.
    pub fn add_thread(
        &mut self,
        id: ThreadId,
        format: ThreadFormat,
        source: crate::source::DataSource,
        provisional_idx: ThreadIdx,
    ) -> Result<()> {
        self.check_add_conflict(id)?;
        self.thread_mods.push(ThreadMod::Add { thread_id: id, format, source, provisional_idx });
        Ok(())
    }

    /// Stage an Update ThreadMod against a pre-sized thread (filename
    /// or comment). Rejects anything that isn't pre-sized, isn't
    /// uncompressed, or (for a length known up front) doesn't fit the
    /// existing reserved space.
    pub fn update_thread(&mut self, idx: ThreadIdx, source: crate::source::DataSource) -> Result<()> {
        if self.thread_mods.iter().any(|m| m.idx() == idx) {
            return Err(NufxError::ModThreadChange);
        }
        let thread = self.find_thread_idx(idx).ok_or(NufxError::ThreadIdxNotFound)?;
        if !thread.thread_id().is_pre_sized() {
            return Err(NufxError::NotPreSized);
        }
        if source.format() != ThreadFormat::Uncompressed {
            return Err(NufxError::InvalidArg("update source must be uncompressed"));
        }
        if let Some(len) = source.other_len() {
            if len > thread.compressed_eof as u64 {
                return Err(NufxError::PreSizeOverflow);
            }
            if thread.thread_id() == ThreadId::Filename
                && (len == 0 || len as usize > REASONABLE_FILENAME_LEN)
            {
                return Err(NufxError::InvalidFilename(format!("length {len} out of range")));
            }
        }
        self.thread_mods.push(ThreadMod::Update { idx, source });
        Ok(())
    }

    /// Stage a Delete ThreadMod.
    pub fn delete_thread(&mut self, idx: ThreadIdx) -> Result<()> {
        if self.thread_mods.iter().any(|m| m.idx() == idx) {
            return Err(NufxError::ModThreadChange);
        }
        let thread = self.find_thread_idx(idx).ok_or(NufxError::ThreadIdxNotFound)?;
        let thread_id = thread.thread_id();
        self.thread_mods.push(ThreadMod::Delete { idx, thread_id });
        Ok(())
    }

    /// Clone this record's on-disk state for the copy-set snapshot
    /// taken before staging mutations. `thread_mods` never survives the
    /// clone: `orig` records are freshly read from disk and never carry
    /// pending mods of their own, which is the only thing this is ever
    /// called on.
    pub(crate) fn clone_pristine(&self) -> Record {
        debug_assert!(self.thread_mods.is_empty(), "clone_pristine called on a record with pending mods");
        Record {
            idx: self.idx,
            header_crc: self.header_crc,
            attrib_count: self.attrib_count,
            version: self.version,
            fs_id: self.fs_id,
            fs_info: self.fs_info,
            access: self.access,
            file_type: self.file_type,
            extra_type: self.extra_type,
            storage_type: self.storage_type,
            create_when: self.create_when,
            mod_when: self.mod_when,
            archive_when: self.archive_when,
            option_list: self.option_list.clone(),
            extra_bytes: self.extra_bytes.clone(),
            header_filename: self.header_filename.clone(),
            thread_filename: self.thread_filename.clone(),
            threads: self.threads.clone(),
            thread_mods: Vec::new(),
            fake_threads: self.fake_threads,
            file_offset: self.file_offset,
            header_length: self.header_length,
            dirty_header: self.dirty_header,
            drop_header_filename: self.drop_header_filename,
            is_bad_mac: self.is_bad_mac,
        }
    }

    /// Stage a rename, choosing among update/delete+add/header-drop per
    /// the capacity and placement of the existing filename.
    #[allow(clippy::too_many_arguments)]
    pub fn rename(
        &mut self,
        new_name_mor: Vec<u8>,
        fssep: u8,
        next_filename_idx: impl FnOnce() -> ThreadIdx,
    ) -> Result<()> {
        if new_name_mor.is_empty() {
            return Err(NufxError::InvalidArg("name must not be empty"));
        }
        if new_name_mor[0] == fssep {
            return Err(NufxError::LeadingFssep);
        }

        let existing = self.find_thread(ThreadId::Filename).cloned();
        if let Some(t) = &existing {
            if !self.survives(t) {
                return Err(NufxError::ModThreadChange);
            }
        }

        let required = new_name_mor.len() as u64;
        match existing {
            Some(t) if t.compressed_eof as u64 >= required => {
                let source = crate::source::DataSource::from_buffer(new_name_mor);
                self.update_thread(t.idx, source)?;
            }
            Some(t) => {
                self.delete_thread(t.idx)?;
                let source = crate::source::DataSource::from_buffer(new_name_mor);
                self.add_thread(ThreadId::Filename, ThreadFormat::Uncompressed, source, next_filename_idx())?;
            }
            None => {
                let source = crate::source::DataSource::from_buffer(new_name_mor);
                self.add_thread(ThreadId::Filename, ThreadFormat::Uncompressed, source, next_filename_idx())?;
                if self.header_filename.is_some() {
                    self.drop_header_filename = true;
                }
            }
        }

        if crate::wrapper::sep_from_sysinfo(self.fs_info) != fssep {
            self.fs_info = crate::wrapper::set_sep_in_sysinfo(self.fs_info, fssep);
            self.dirty_header = true;
        }
        Ok(())
    }

    /// Re-derive `storage_type` from the surviving thread set: a disk
    /// image thread is left alone, a resource fork forces Extended, a
    /// data fork sizes to seedling/sapling/tree by its actual length,
    /// and no data-bearing threads at all resets to Unknown.
    pub fn update_storage_type(&mut self) {
        let survives = |t: &&Thread| {
            !self
                .thread_mods
                .iter()
                .any(|m| matches!(m, ThreadMod::Delete { idx, .. } if *idx == t.idx))
        };
        if self.threads.iter().filter(survives).any(|t| t.thread_id() == ThreadId::DiskImage) {
            return;
        }
        if self.threads.iter().filter(survives).any(|t| t.thread_id() == ThreadId::RsrcFork) {
            self.storage_type = STORAGE_EXTENDED;
            return;
        }
        if let Some(t) = self.threads.iter().filter(survives).find(|t| t.thread_id() == ThreadId::DataFork) {
            self.storage_type = if t.uncompressed_eof <= SEEDLING_MAX {
                STORAGE_SEEDLING
            } else if t.uncompressed_eof < SAPLING_MAX {
                STORAGE_SAPLING
            } else {
                STORAGE_TREE
            };
            return;
        }
        self.storage_type = STORAGE_UNKNOWN;
    }

    /// Write this record's header and thread headers at the writer's
    /// current position, back-patching the CRC once the body is known.
    /// Returns the number of live (non-synthesized) threads written.
    pub fn write_header<W: Write + Seek>(&mut self, w: &mut W) -> Result<u32> {
        self.update_storage_type();

        let live_threads: Vec<&Thread> = self.threads.iter().filter(|t| !t.synthesized).collect();
        self.fake_threads = 0;

        // The attribute area's length is wholly determined by what's
        // about to be written below (option list, extra bytes, the
        // filename-length trailer); re-derive it here rather than trust
        // whatever `attrib_count` was left holding, since a caller may
        // have grown `option_list`/`extra_bytes` since the record was
        // read (or, for a brand-new record, never set it at all).
        let name_len_field_bytes = 2;
        let option_area = if self.version > 0 { 2 + self.option_list.len() as u32 } else { 0 };
        self.attrib_count =
            (56 + option_area + self.extra_bytes.len() as u32 + name_len_field_bytes) as u16;

        let start = w.stream_position()?;
        w.write_all(&RECORD_ID)?;
        w.write_all(&[0, 0])?;

        let mut crc = RunningCrc::new();
        let mut bytes_written: u32 = 0;
        {
            let mut cw = CrcWriter::with_crc(w, &mut crc);
            cw.write_u16(self.attrib_count)?;
            cw.write_u16(self.version)?;
            cw.write_u32(live_threads.len() as u32)?;
            cw.write_u16(self.fs_id)?;
            cw.write_u16(self.fs_info)?;
            cw.write_u32(self.access)?;
            cw.write_u32(self.file_type)?;
            cw.write_u32(self.extra_type)?;
            cw.write_u16(self.storage_type)?;
            write_datetime(&mut cw, &self.create_when)?;
            write_datetime(&mut cw, &self.mod_when)?;
            write_datetime(&mut cw, &self.archive_when)?;
            bytes_written += 56;

            if self.version > 0 {
                cw.write_u16(self.option_list.len() as u16)?;
                bytes_written += 2;
                if !self.option_list.is_empty() {
                    cw.write_bytes(&self.option_list)?;
                    bytes_written += self.option_list.len() as u32;
                }
            }

            if !self.extra_bytes.is_empty() {
                cw.write_bytes(&self.extra_bytes)?;
                bytes_written += self.extra_bytes.len() as u32;
            }

            // Only the 2-byte length field counts toward the attribute
            // area; the name bytes themselves sit outside it, same as
            // the original writer (`Nu_WriteRecordHeader`).
            if let (Some(name), false) = (&self.header_filename, self.drop_header_filename) {
                cw.write_u16(name.len() as u16)?;
                cw.write_bytes(name)?;
                bytes_written += 2;
            } else {
                cw.write_u16(0)?;
                bytes_written += 2;
            }
        }
        debug_assert_eq!(bytes_written as u16, self.attrib_count);

        {
            let mut cw = CrcWriter::with_crc(w, &mut crc);
            for t in &live_threads {
                t.write_header(&mut cw)?;
            }
        }

        let end = w.stream_position()?;
        self.header_crc = crc.value();
        w.seek(std::io::SeekFrom::Start(start + 4))?;
        w.write_all(&self.header_crc.to_le_bytes())?;
        w.seek(std::io::SeekFrom::Start(end))?;

        // The actual byte distance from the record ID to the end of the
        // thread headers, not `bytes_written` — the attribute-area name
        // length field is counted there, but the name's own bytes (sitting
        // outside the attribute area, same as the original format) aren't.
        self.header_length = end - start;
        if self.drop_header_filename {
            self.header_filename = None;
            self.drop_header_filename = false;
        }
        Ok(live_threads.len() as u32)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadFormat;

    fn blank_thread(idx: u32, class: u16, kind: u16, eof: u32) -> Thread {
        Thread {
            idx: ThreadIdx(idx),
            class,
            format: ThreadFormat::Uncompressed as u16,
            kind,
            thread_crc: 0,
            uncompressed_eof: eof,
            compressed_eof: eof,
            file_offset: None,
            synthesized: false,
            inline_bytes: None,
        }
    }

    fn blank_record() -> Record {
        Record {
            idx: RecordIdx(1000),
            header_crc: 0,
            attrib_count: 58,
            version: 3,
            fs_id: FilesystemId::ProDos as u16,
            fs_info: b'/' as u16,
            access: 0xC3,
            file_type: 0x04,
            extra_type: 0,
            storage_type: STORAGE_UNKNOWN,
            create_when: DateTime::default(),
            mod_when: DateTime::default(),
            archive_when: DateTime::default(),
            option_list: Vec::new(),
            extra_bytes: Vec::new(),
            header_filename: None,
            thread_filename: None,
            threads: Vec::new(),
            thread_mods: Vec::new(),
            fake_threads: 0,
            file_offset: 0,
            header_length: 0,
            dirty_header: false,
            drop_header_filename: false,
            is_bad_mac: false,
        }
    }

    #[test]
    fn storage_type_tracks_data_fork_size() {
        let mut rec = blank_record();
        rec.threads.push(blank_thread(1001, 2, 0, 256));
        rec.update_storage_type();
        assert_eq!(rec.storage_type, STORAGE_SEEDLING);

        rec.threads[0].uncompressed_eof = 200_000;
        rec.update_storage_type();
        assert_eq!(rec.storage_type, STORAGE_TREE);
    }

    #[test]
    fn rsrc_fork_forces_extended() {
        let mut rec = blank_record();
        rec.threads.push(blank_thread(1001, 2, 0, 100));
        rec.threads.push(blank_thread(1002, 2, 2, 100));
        rec.update_storage_type();
        assert_eq!(rec.storage_type, STORAGE_EXTENDED);
    }

    #[test]
    fn add_conflicts_with_existing_data_fork() {
        let mut rec = blank_record();
        rec.threads.push(blank_thread(1001, 2, 0, 100));
        let src = crate::source::DataSource::from_buffer(vec![1, 2, 3]);
        let err = rec.add_thread(ThreadId::DataFork, ThreadFormat::Uncompressed, src, ThreadIdx(2000));
        assert!(matches!(err, Err(NufxError::ThreadAdd(_))));
    }

    #[test]
    fn rename_with_leading_fssep_rejected() {
        let mut rec = blank_record();
        let err = rec.rename(b"/bad".to_vec(), b'/', || ThreadIdx(2000));
        assert!(matches!(err, Err(NufxError::LeadingFssep)));
    }

    #[test]
    fn access_flags_round_trip_through_raw_bits() {
        let mut rec = blank_record();
        rec.set_access_flags(AccessFlags::UNLOCKED);
        assert_eq!(rec.access_flags(), AccessFlags::UNLOCKED);
        assert!(rec.access_flags().contains(AccessFlags::RENAME_ENABLED));
    }

    #[test]
    fn rename_without_existing_thread_stages_add_and_drops_header() {
        let mut rec = blank_record();
        rec.header_filename = Some(b"OLD".to_vec());
        rec.rename(b"NEW.LONGER".to_vec(), b'/', || ThreadIdx(2000)).unwrap();
        assert!(rec.drop_header_filename);
        assert_eq!(rec.thread_mods.len(), 1);
        match &rec.thread_mods[0] {
            ThreadMod::Add { thread_id: ThreadId::Filename, source, .. } => {
                assert_eq!(source.other_len(), Some(10));
            }
            ThreadMod::Add { .. } | ThreadMod::Update { .. } | ThreadMod::Delete { .. } => {
                panic!("unexpected thread mod shape")
            }
        }
    }
}
