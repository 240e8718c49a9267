//! The archive handle: open/create/flush/abort/close lifecycle, the
//! three record sets (orig/copy/new), and the public operations that
//! stage mutations against them.
//!
//! This is the busiest seam in the crate — every public entry point
//! funnels through here so the reentrancy guard and read-only checks
//! happen in exactly one place.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::callback::{
    AbortOnError, ErrorHandler, ErrorKindSummary, ErrorOperation, ErrorResponse, ErrorStatus, MessageHandler,
    NullProgress, ProgressCallback, TracingMessages,
};
use crate::codec::{self, CodecContext};
use crate::config::Config;
use crate::crc::RunningCrc;
use crate::error::{NufxError, Result};
use crate::macroman;
use crate::master_header::MasterHeader;
use crate::record::{FilesystemId, Record, RecordIdx, STORAGE_UNKNOWN};
use crate::sink::DataSink;
use crate::source::DataSource;
use crate::thread::{Thread, ThreadFormat, ThreadId, ThreadIdx, ThreadMod};
use crate::wrapper::{self, WrapperInfo, WrapperKind};

bitflags! {
    /// Returned by [`Archive::flush`]; `READ_ONLY_BECAME` tells the
    /// caller the archive is now stuck read-only because a failure hit
    /// after the temp file had already been renamed into place.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlushStatus: u32 {
        const SUCCESSFUL_FLUSH = 0x01;
        const READ_ONLY_BECAME = 0x02;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    ReadOnly,
    ReadWrite,
    StreamingReadOnly,
}

/// A pending record, staged by `add_record` and appended to the
/// archive during the next Flush.
pub struct NewRecord {
    pub record: Record,
}

pub struct Archive {
    mode: OpenMode,
    archive_path: PathBuf,
    archive_file: Option<File>,
    temp_file: Option<File>,
    temp_path: Option<PathBuf>,
    wrapper: WrapperInfo,
    master: MasterHeader,

    orig: Vec<Record>,
    copy: Option<Vec<Record>>,
    new_records: Vec<NewRecord>,
    toc_loaded: bool,

    /// Byte offset of the next record in a streaming archive, tracked
    /// by hand since [`Archive::stream_next`] never seeks. Unused
    /// outside [`OpenMode::StreamingReadOnly`].
    stream_pos: u64,

    /// Set when this handle was opened via `create`/`open_rw` against a
    /// path that didn't exist yet (or existed but was zero-length). If
    /// `Close` runs without ever having flushed, the never-materialized
    /// archive file is removed rather than left behind as an empty
    /// stub, matching `Nu_Close` on a created-but-unwritten archive.
    newly_created: bool,

    /// Shared monotonic seed for both RecordIdx and ThreadIdx, matching
    /// the original library's single counter (`Nu_GetNextThreadIdx`
    /// reuses the record-index counter).
    next_idx: u32,

    pub config: Config,
    read_only: bool,
    busy: Cell<bool>,

    error_handler: Box<dyn ErrorHandler>,
    message_handler: Box<dyn MessageHandler>,
}

/// RAII guard clearing the reentrancy flag on drop, so an early return
/// (via `?`) can't leave the archive stuck busy.
struct BusyGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> BusyGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Result<Self> {
        if flag.get() {
            return Err(NufxError::Busy);
        }
        flag.set(true);
        Ok(BusyGuard { flag })
    }
}

impl<'a> Drop for BusyGuard<'a> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

const RECORD_IDX_SEED: u32 = 1000;

impl Archive {
    /// Open an archive for read-only, non-streaming access. The table
    /// of contents is loaded lazily on first use.
    pub fn open_ro(path: impl AsRef<Path>) -> Result<Archive> {
        let mut file = File::open(path.as_ref())?;
        let config = Config::default();
        let wrapper = wrapper::detect(&mut file, config.junk_skip_max, true)?;
        let master = MasterHeader::read_from(&mut file)?;

        Ok(Archive {
            mode: OpenMode::ReadOnly,
            archive_path: path.as_ref().to_path_buf(),
            archive_file: Some(file),
            temp_file: None,
            temp_path: None,
            wrapper,
            master,
            orig: Vec::new(),
            copy: None,
            new_records: Vec::new(),
            toc_loaded: false,
            stream_pos: 0,
            newly_created: false,
            next_idx: RECORD_IDX_SEED,
            config,
            read_only: true,
            busy: Cell::new(false),
            error_handler: Box::new(AbortOnError),
            message_handler: Box::new(TracingMessages),
        })
    }

    /// Open an archive in streaming read-only mode: the master header
    /// is read and nothing else. Records are visited strictly in
    /// order via [`Archive::stream_next`]; no seeking is ever
    /// attempted, so this works against a pipe.
    pub fn open_stream_ro(mut file: File) -> Result<Archive> {
        let config = Config::default();
        // Streaming mode never junk-skips: a pipe can't be rewound to
        // retry, and the spec requires no seeks.
        let wrapper =
            WrapperInfo { kind: WrapperKind::Plain, junk_offset: 0, header_offset: 0 };
        let master = MasterHeader::read_from(&mut file)?;

        Ok(Archive {
            mode: OpenMode::StreamingReadOnly,
            archive_path: PathBuf::from("(stream)"),
            archive_file: Some(file),
            temp_file: None,
            temp_path: None,
            wrapper,
            master,
            orig: Vec::new(),
            copy: None,
            new_records: Vec::new(),
            toc_loaded: false,
            stream_pos: crate::master_header::MASTER_HEADER_LEN,
            newly_created: false,
            next_idx: RECORD_IDX_SEED,
            config,
            read_only: true,
            busy: Cell::new(false),
            error_handler: Box::new(AbortOnError),
            message_handler: Box::new(TracingMessages),
        })
    }

    /// Open (or create) an archive for read-write access. `create_if_missing`
    /// mirrors `kNuOpenCreat`; if the archive path exists and is
    /// zero-length it's treated as newly created, same as the original.
    pub fn open_rw(
        path: impl AsRef<Path>,
        temp_path: impl AsRef<Path>,
        create_if_missing: bool,
    ) -> Result<Archive> {
        let path = path.as_ref();
        let exists = path.exists();
        if !exists && !create_if_missing {
            return Err(NufxError::FileNotFound(path.display().to_string()));
        }

        let mut file = OpenOptions::new().read(true).write(true).create(create_if_missing).open(path)?;
        let len = file.metadata()?.len();
        let newly_created = !exists || len == 0;

        let temp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path.as_ref())?;

        let config = Config::default();
        let (wrapper, master) = if newly_created {
            (WrapperInfo { kind: WrapperKind::Plain, junk_offset: 0, header_offset: 0 }, MasterHeader::default())
        } else {
            let wrapper = wrapper::detect(&mut file, config.junk_skip_max, true)?;
            let master = MasterHeader::read_from(&mut file)?;
            (wrapper, master)
        };

        Ok(Archive {
            mode: OpenMode::ReadWrite,
            archive_path: path.to_path_buf(),
            archive_file: Some(file),
            temp_file: Some(temp_file),
            temp_path: Some(temp_path.as_ref().to_path_buf()),
            wrapper,
            master,
            orig: Vec::new(),
            copy: None,
            new_records: Vec::new(),
            toc_loaded: newly_created,
            stream_pos: 0,
            newly_created,
            next_idx: RECORD_IDX_SEED,
            config,
            read_only: false,
            busy: Cell::new(false),
            error_handler: Box::new(AbortOnError),
            message_handler: Box::new(TracingMessages),
        })
    }

    /// Create a brand new, empty archive. Equivalent to `open_rw` with
    /// `create_if_missing = true` against a path that doesn't exist
    /// yet; nothing is written to `path` until the first flush.
    pub fn create(path: impl AsRef<Path>, temp_path: impl AsRef<Path>) -> Result<Archive> {
        Self::open_rw(path, temp_path, true)
    }

    pub fn set_error_handler(&mut self, handler: Box<dyn ErrorHandler>) {
        self.error_handler = handler;
    }

    pub fn set_message_handler(&mut self, handler: Box<dyn MessageHandler>) {
        self.message_handler = handler;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn num_records(&self) -> u32 {
        self.master.total_records
    }

    pub fn header_offset(&self) -> u64 {
        self.wrapper.header_offset
    }

    pub fn junk_offset(&self) -> u64 {
        self.wrapper.junk_offset
    }

    /// The wrapper kind this archive was opened with (`Nu_GetAttr`'s
    /// `archive_type` in the original: plain / BXY / SEA / BSE).
    pub fn archive_type(&self) -> WrapperKind {
        self.wrapper.kind
    }

    /// Whether this build was compiled with support for `format`.
    pub fn supports_codec(&self, format: ThreadFormat) -> bool {
        codec::is_supported(format)
    }

    fn next_idx(&mut self) -> u32 {
        self.next_idx += 1;
        self.next_idx
    }

    fn guard(&self) -> Result<BusyGuard<'_>> {
        BusyGuard::enter(&self.busy)
    }

    /// Load the table of contents if it hasn't been already. A no-op
    /// in streaming mode (there is no TOC) and for a newly created
    /// archive (nothing to load).
    pub fn load_toc(&mut self) -> Result<()> {
        let _g = self.guard()?;
        self.load_toc_inner()
    }

    fn load_toc_inner(&mut self) -> Result<()> {
        if self.toc_loaded || matches!(self.mode, OpenMode::StreamingReadOnly) {
            return Ok(());
        }
        let file = self.archive_file.as_mut().ok_or(NufxError::Internal("archive file missing"))?;
        let mut offset = self.wrapper.header_offset + crate::master_header::MASTER_HEADER_LEN;
        let mut records = Vec::with_capacity(self.master.total_records as usize);
        for _ in 0..self.master.total_records {
            file.seek(SeekFrom::Start(offset))?;
            let idx = RecordIdx(self.next_idx());
            let mut record = Record::read_from(
                file,
                idx,
                offset,
                self.config.ignore_crc,
                self.config.mask_dataless,
                self.config.handle_bad_mac,
            )?;
            scan_threads(file, &mut record, self.config.ignore_crc)?;
            offset = record.file_offset + record.header_length + threads_payload_len(&record);
            self.next_idx = self.next_idx.max(idx.0 + record.threads.len() as u32);
            records.push(record);
        }
        self.orig = records;
        self.toc_loaded = true;
        Ok(())
    }

    /// Read the next record off a stream-opened archive. Every thread's
    /// compressed payload is read into memory as soon as its header is
    /// seen (via [`Thread::inline_bytes`]) since a stream can never be
    /// seeked back into; a data thread seen before its record's filename
    /// thread is simply buffered like any other, and the record falls
    /// back to the synthesized default name if no filename thread ever
    /// turns up. Returns `Ok(None)` once every record the master header
    /// promised has been consumed.
    pub fn stream_next(&mut self) -> Result<Option<RecordIdx>> {
        let _g = self.guard()?;
        if !matches!(self.mode, OpenMode::StreamingReadOnly) {
            return Err(NufxError::Usage("stream_next is only valid on a stream-opened archive"));
        }
        if self.orig.len() as u32 >= self.master.total_records {
            return Ok(None);
        }

        let ignore_crc = self.config.ignore_crc;
        let mask_dataless = self.config.mask_dataless;
        let handle_bad_mac = self.config.handle_bad_mac;
        let file_offset = self.stream_pos;
        let idx = RecordIdx(self.next_idx());
        let file = self.archive_file.as_mut().ok_or(NufxError::Internal("archive file missing"))?;
        let mut record = Record::read_from(file, idx, file_offset, ignore_crc, mask_dataless, handle_bad_mac)?;
        self.next_idx = self.next_idx.max(idx.0 + record.threads.len() as u32);

        let mut payload_len = 0u64;
        for i in 0..record.threads.len() {
            if record.threads[i].synthesized {
                continue;
            }
            let mut bytes = vec![0u8; record.threads[i].compressed_eof as usize];
            file.read_exact(&mut bytes)?;
            payload_len += bytes.len() as u64;
            let is_unresolved_filename =
                record.threads[i].thread_id() == ThreadId::Filename && record.thread_filename.is_none();
            record.threads[i].inline_bytes = Some(bytes);
            if is_unresolved_filename {
                let mut sink = DataSink::to_buffer();
                let version = record.version;
                record.threads[i].extract(file, version, ignore_crc, &mut sink, None)?;
                record.thread_filename = sink.into_buffer();
            }
        }

        self.stream_pos = file_offset + record.header_length + payload_len;
        self.orig.push(record);
        Ok(Some(idx))
    }

    fn ensure_copy_set(&mut self) -> Result<()> {
        self.load_toc_inner()?;
        if self.copy.is_none() {
            self.copy = Some(self.orig.iter().map(Record::clone_pristine).collect());
        }
        Ok(())
    }

    pub fn records(&mut self) -> Result<&[Record]> {
        let _g = self.guard()?;
        self.load_toc_inner()?;
        Ok(current_set(&self.copy, &self.orig))
    }

    pub fn record_by_idx(&mut self, idx: RecordIdx) -> Result<&Record> {
        let _g = self.guard()?;
        self.load_toc_inner()?;
        current_set(&self.copy, &self.orig).iter().find(|r| r.idx == idx).ok_or(NufxError::RecIdxNotFound)
    }

    /// Filename of a record, decoded to UTF-8, resolving thread vs.
    /// header filename per the canonical accessor rule.
    pub fn record_name(&mut self, idx: RecordIdx) -> Result<String> {
        let rec = self.record_by_idx(idx)?;
        Ok(macroman::to_utf8(rec.filename_mor()))
    }

    /// Stage adding a brand-new record with one initial data-fork
    /// thread sourced from `source`, storing `name` (UTF-8) as its
    /// filename thread. Appended to the archive on the next Flush.
    pub fn add_record(
        &mut self,
        name: &str,
        fs_id: FilesystemId,
        fssep: u8,
        file_type: u32,
        access: u32,
        source: DataSource,
        compression: crate::config::Compression,
    ) -> Result<RecordIdx> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        self.load_toc_inner()?;

        let name_mor = macroman::from_utf8(name);
        if name_mor.is_empty() {
            return Err(NufxError::InvalidArg("record name must not be empty"));
        }
        if name_mor[0] == fssep {
            return Err(NufxError::LeadingFssep);
        }
        if !self.config.allow_duplicates
            && current_set(&self.copy, &self.orig).iter().any(|r| r.filename_mor() == name_mor.as_slice())
        {
            return Err(NufxError::RecordExists);
        }

        let idx = RecordIdx(self.next_idx());
        let format = self.config.resolve_format(compression);
        let mut record = Record {
            idx,
            header_crc: 0,
            attrib_count: 58,
            version: crate::record::EMIT_VERSION,
            fs_id: fs_id as u16,
            fs_info: fssep as u16,
            access,
            file_type,
            extra_type: 0,
            storage_type: STORAGE_UNKNOWN,
            create_when: crate::datetime::DateTime::default(),
            mod_when: crate::datetime::DateTime::default(),
            archive_when: crate::datetime::DateTime::default(),
            option_list: Vec::new(),
            extra_bytes: Vec::new(),
            header_filename: None,
            thread_filename: Some(name_mor.clone()),
            threads: Vec::new(),
            thread_mods: Vec::new(),
            fake_threads: 0,
            file_offset: 0,
            header_length: 0,
            dirty_header: false,
            drop_header_filename: false,
            is_bad_mac: false,
        };

        let filename_source = DataSource::from_buffer(name_mor);
        let filename_idx = ThreadIdx(self.next_idx());
        record.add_thread(ThreadId::Filename, ThreadFormat::Uncompressed, filename_source, filename_idx)?;
        let data_idx = ThreadIdx(self.next_idx());
        record.add_thread(ThreadId::DataFork, format, source, data_idx)?;

        self.new_records.push(NewRecord { record });
        Ok(idx)
    }

    fn find_copy_record_mut(&mut self, idx: RecordIdx) -> Result<&mut Record> {
        self.ensure_copy_set()?;
        self.copy.as_mut().unwrap().iter_mut().find(|r| r.idx == idx).ok_or(NufxError::RecIdxNotFound)
    }

    pub fn add_thread(
        &mut self,
        idx: RecordIdx,
        id: ThreadId,
        format: ThreadFormat,
        source: DataSource,
    ) -> Result<ThreadIdx> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        let provisional = ThreadIdx(self.next_idx.wrapping_add(1));
        let rec = self.find_copy_record_mut(idx)?;
        rec.add_thread(id, format, source, provisional)?;
        self.next_idx += 1;
        Ok(provisional)
    }

    pub fn update_thread(&mut self, rec_idx: RecordIdx, thread_idx: ThreadIdx, source: DataSource) -> Result<()> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        self.find_copy_record_mut(rec_idx)?.update_thread(thread_idx, source)
    }

    pub fn delete_thread(&mut self, rec_idx: RecordIdx, thread_idx: ThreadIdx) -> Result<()> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        self.find_copy_record_mut(rec_idx)?.delete_thread(thread_idx)
    }

    pub fn delete_record(&mut self, idx: RecordIdx) -> Result<()> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        self.ensure_copy_set()?;
        let set = self.copy.as_mut().unwrap();
        let pos = set.iter().position(|r| r.idx == idx).ok_or(NufxError::RecIdxNotFound)?;
        set.remove(pos);
        Ok(())
    }

    pub fn rename_record(&mut self, idx: RecordIdx, new_name: &str, fssep: u8) -> Result<()> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        let name_mor = macroman::from_utf8(new_name);
        // Reserve the idx a fallback Add might need before borrowing the
        // record mutably, since `next_idx` itself needs `&mut self`.
        let next = self.next_idx();
        let rec = self.find_copy_record_mut(idx)?;
        rec.rename(name_mor, fssep, move || ThreadIdx(next))
    }

    /// Extract one thread's uncompressed payload into `sink`.
    pub fn extract_thread(
        &mut self,
        rec_idx: RecordIdx,
        thread_idx: ThreadIdx,
        sink: &mut DataSink,
        mut progress: Option<&mut dyn ProgressCallback>,
    ) -> Result<()> {
        let _g = self.guard()?;
        self.load_toc_inner()?;
        let rec =
            current_set(&self.copy, &self.orig).iter().find(|r| r.idx == rec_idx).ok_or(NufxError::RecIdxNotFound)?;
        let thread = rec.find_thread_idx(thread_idx).ok_or(NufxError::ThreadIdxNotFound)?;
        let version = rec.version;
        let file = self.archive_file.as_mut().ok_or(NufxError::Internal("archive file missing"))?;

        match thread.extract(file, version, self.config.ignore_crc, sink, progress.as_deref_mut()) {
            Ok(()) => Ok(()),
            Err(NufxError::BadThreadCRC) => {
                let status = ErrorStatus {
                    operation: ErrorOperation::Extract,
                    error: ErrorKindSummary::BadDataCrc,
                    pathname: None,
                    thread_idx: Some(thread_idx),
                    allowed: &[ErrorResponse::Abort, ErrorResponse::Ignore],
                };
                match self.error_handler.on_error(&status) {
                    ErrorResponse::Ignore => Ok(()),
                    _ => Err(NufxError::BadThreadCRC),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Run a thread's expand+CRC pipeline without materializing
    /// output, used by `test()`.
    pub fn test_thread(&mut self, rec_idx: RecordIdx, thread_idx: ThreadIdx) -> Result<()> {
        let mut sink = DataSink::void();
        self.extract_thread(rec_idx, thread_idx, &mut sink, None)
    }

    /// Discard the copy set and all staged new records, freeing any
    /// DataSources owned by pending ThreadMods. The original archive
    /// remains untouched and is the source of truth again.
    pub fn abort(&mut self) {
        self.copy = None;
        self.new_records.clear();
    }

    /// Two-phase commit: stage every surviving record/thread into the
    /// temp file, fix up wrapper length fields, then atomically rename
    /// the temp file into place. On any failure during staging, the
    /// temp file is discarded and the original archive is untouched.
    pub fn flush(&mut self) -> Result<FlushStatus> {
        let _g = self.guard()?;
        if self.read_only {
            return Err(NufxError::ArchiveRO);
        }
        if self.copy.is_none() && self.new_records.is_empty() {
            return Ok(FlushStatus::SUCCESSFUL_FLUSH);
        }

        match self.flush_stage() {
            Ok(new_total) => match self.flush_commit(new_total) {
                Ok(()) => {
                    self.copy = None;
                    self.new_records.clear();
                    self.toc_loaded = false;
                    self.newly_created = false;
                    Ok(FlushStatus::SUCCESSFUL_FLUSH)
                }
                Err(_e) => {
                    // The rename itself failed after the temp file was
                    // fully staged; the original may now be gone. The
                    // commit is treated as having happened and the
                    // caller is notified via the status flags rather
                    // than an error, per the `READ_ONLY_BECAME` contract.
                    self.read_only = true;
                    Ok(FlushStatus::READ_ONLY_BECAME)
                }
            },
            Err(e) => {
                self.discard_temp();
                Err(e)
            }
        }
    }

    fn discard_temp(&mut self) {
        if let Some(path) = &self.temp_path {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Phase 1: write wrapper + records into the temp file. Returns the
    /// final record count for the new master header.
    ///
    /// The live record set is taken out of `self` for the duration of
    /// staging (rather than cloned, which `Record` can't support once
    /// it may carry pending `ThreadMod`s) so the inner pass can borrow
    /// `self.archive_file` and `self.temp_file` freely without fighting
    /// the borrow checker over one `&mut self`. It's put back before
    /// returning either way: on success the caller discards it anyway
    /// (the next TOC load re-reads fresh), on failure the archive needs
    /// to stay exactly as usable as it was before the attempt.
    fn flush_stage(&mut self) -> Result<u32> {
        let from_orig = self.copy.is_none();
        let mut live_set = if from_orig { std::mem::take(&mut self.orig) } else { self.copy.take().unwrap() };

        let result = self.flush_stage_inner(&mut live_set);

        if from_orig {
            self.orig = live_set;
        } else {
            self.copy = Some(live_set);
        }
        result
    }

    fn flush_stage_inner(&mut self, live_set: &mut Vec<Record>) -> Result<u32> {
        self.temp_file.as_mut().ok_or(NufxError::Internal("no temp file open for flush"))?.set_len(0)?;
        self.temp_file.as_mut().unwrap().seek(SeekFrom::Start(0))?;

        if !matches!(self.wrapper.kind, WrapperKind::Plain) {
            let header_offset = self.wrapper.header_offset;
            let archive_file = self.archive_file.as_mut().ok_or(NufxError::Internal("archive file missing"))?;
            archive_file.seek(SeekFrom::Start(0))?;
            let mut limited = archive_file.take(header_offset);
            std::io::copy(&mut limited, self.temp_file.as_mut().unwrap())?;
        }

        let temp = self.temp_file.as_mut().unwrap();
        temp.seek(SeekFrom::Start(self.wrapper.header_offset))?;
        let master_placeholder = MasterHeader::default();
        master_placeholder.write_to(temp)?;

        let mut total = 0u32;
        for record in live_set.iter_mut() {
            write_record_to_temp(self.temp_file.as_mut().unwrap(), self.archive_file.as_mut(), record)?;
            total += 1;
        }
        for new_rec in self.new_records.iter_mut() {
            write_record_to_temp(self.temp_file.as_mut().unwrap(), self.archive_file.as_mut(), &mut new_rec.record)?;
            total += 1;
        }

        let temp = self.temp_file.as_mut().unwrap();
        let data_end = temp.stream_position()?;
        let master_eof = (data_end - self.wrapper.header_offset) as u32;
        let master = MasterHeader {
            total_records: total,
            archive_create_when: self.master.archive_create_when,
            archive_mod_when: self.master.archive_mod_when,
            master_version: self.master.master_version,
            master_eof,
        };
        temp.seek(SeekFrom::Start(self.wrapper.header_offset))?;
        master.write_to(temp)?;
        temp.seek(SeekFrom::Start(data_end))?;

        wrapper::update(temp, self.wrapper.kind, self.wrapper.junk_offset, self.wrapper.header_offset, master_eof)?;
        wrapper::pad_trailer(temp, self.wrapper.kind, self.wrapper.junk_offset, self.config.mimic_shk)?;
        temp.flush()?;

        self.master = master;
        Ok(total)
    }

    /// Phase 2: close the original, rename the temp file into place,
    /// reopen it as the archive file.
    fn flush_commit(&mut self, _new_total: u32) -> Result<()> {
        self.archive_file = None;
        std::fs::rename(self.temp_path.as_ref().unwrap(), &self.archive_path)?;

        let mut reopened = OpenOptions::new().read(true).write(true).open(&self.archive_path)?;
        reopened.seek(SeekFrom::Start(0))?;
        self.archive_file = Some(reopened);

        let new_temp_path = self.temp_path.clone().unwrap();
        let new_temp = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&new_temp_path)?;
        self.temp_file = Some(new_temp);
        Ok(())
    }

    /// Flush if dirty (RW mode only) and release all resources. A
    /// handle that was newly created and never flushed removes the
    /// stub archive file it touched at open time, rather than leaving
    /// a zero-length file behind.
    pub fn close(mut self) -> Result<()> {
        if !self.read_only && (self.copy.is_some() || !self.new_records.is_empty()) {
            self.flush()?;
        }
        if self.newly_created {
            self.archive_file = None;
            let _ = std::fs::remove_file(&self.archive_path);
        }
        if let Some(path) = self.temp_path.take() {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

fn current_set<'a>(copy: &'a Option<Vec<Record>>, orig: &'a [Record]) -> &'a [Record] {
    match copy {
        Some(set) => set,
        None => orig,
    }
}

fn threads_payload_len(record: &Record) -> u64 {
    record.threads.iter().filter(|t| !t.synthesized).map(|t| t.compressed_eof as u64).sum()
}

/// Scan a record's threads: resolve file offsets for each payload and
/// read the filename thread's bytes into `record.thread_filename`.
fn scan_threads<R: Read + Seek>(file: &mut R, record: &mut Record, ignore_crc: bool) -> Result<()> {
    let mut offset = record.file_offset + record.header_length;
    for i in 0..record.threads.len() {
        if record.threads[i].synthesized {
            continue;
        }
        record.threads[i].file_offset = Some(offset);
        if record.threads[i].thread_id() == ThreadId::Filename && record.thread_filename.is_none() {
            let mut sink = DataSink::to_buffer();
            let version = record.version;
            record.threads[i].extract(file, version, ignore_crc, &mut sink, None)?;
            record.thread_filename = sink.into_buffer();
        }
        offset += record.threads[i].compressed_eof as u64;
    }
    Ok(())
}

/// Write one record (header + every surviving thread's payload) at
/// the temp file's current position. An untouched record (no pending
/// thread mods, header not dirty) is copied byte-for-byte from the
/// original archive file so it round-trips exactly; anything else is
/// rebuilt from `record.threads` after resolving pending mods.
fn write_record_to_temp(temp: &mut File, archive_file: Option<&mut File>, record: &mut Record) -> Result<()> {
    let unmodified = record.thread_mods.is_empty() && !record.dirty_header;
    match (unmodified, archive_file) {
        (true, Some(archive_file)) => write_record_verbatim(temp, archive_file, record),
        (_, archive_file) => write_record_rebuilt(temp, archive_file, record),
    }
}

fn write_record_verbatim(temp: &mut File, archive_file: &mut File, record: &mut Record) -> Result<()> {
    let header_start = temp.stream_position()?;
    record.write_header(temp)?;
    // The freshly-written header may differ byte-for-byte from the
    // source in storage_type; overwrite with a verbatim copy so an
    // unmodified record round-trips exactly.
    temp.seek(SeekFrom::Start(header_start))?;
    let header_len = record.header_length;
    archive_file.seek(SeekFrom::Start(record.file_offset))?;
    let mut limited = archive_file.take(header_len);
    std::io::copy(&mut limited, temp)?;
    let archive_file = limited.into_inner();
    for t in record.threads.iter().filter(|t| !t.synthesized) {
        let off = t.file_offset.unwrap_or(0);
        archive_file.seek(SeekFrom::Start(off))?;
        let mut limited = (&mut *archive_file).take(t.compressed_eof as u64);
        std::io::copy(&mut limited, temp)?;
    }
    Ok(())
}

/// Resolve every pending `ThreadMod` into `record.threads` (so the
/// header's thread count and list are ground truth), write the header,
/// then write each surviving thread's payload: freshly compressed
/// bytes for an Add/Update, or a verbatim copy from the original
/// archive file for everything else.
fn write_record_rebuilt(temp: &mut File, mut archive_file: Option<&mut File>, record: &mut Record) -> Result<()> {
    let payloads = apply_thread_mods(record)?;
    // The engine never writes back a pre-v3 record: any record it
    // touches is re-emitted at the current version regardless of what
    // it was originally read as.
    record.version = crate::record::EMIT_VERSION;
    record.write_header(temp)?;
    for t in record.threads.iter().filter(|t| !t.synthesized) {
        if let Some((_, bytes)) = payloads.iter().find(|(idx, _)| *idx == t.idx) {
            temp.write_all(bytes)?;
        } else if let Some(archive_file) = archive_file.as_deref_mut() {
            let off = t.file_offset.unwrap_or(0);
            archive_file.seek(SeekFrom::Start(off))?;
            let mut limited = (&mut *archive_file).take(t.compressed_eof as u64);
            std::io::copy(&mut limited, temp)?;
        }
    }
    Ok(())
}

/// Drain `record.thread_mods`, turning each into a concrete change to
/// `record.threads`: a Delete removes its thread outright, an Add
/// appends a new `Thread` sized from its compressed output, an Update
/// resizes its existing (pre-sized) thread in place. Returns each
/// Add/Update thread's compressed payload bytes, to be written right
/// after the header.
fn apply_thread_mods(record: &mut Record) -> Result<Vec<(ThreadIdx, Vec<u8>)>> {
    let mods = std::mem::take(&mut record.thread_mods);
    let mut payloads = Vec::with_capacity(mods.len());

    for m in mods {
        match m {
            ThreadMod::Delete { idx, .. } => {
                record.threads.retain(|t| t.idx != idx);
            }
            ThreadMod::Update { idx, mut source } => {
                let payload = compress_source(&mut source, ThreadFormat::Uncompressed)?;
                let thread = record.threads.iter_mut().find(|t| t.idx == idx).ok_or(NufxError::ThreadIdxNotFound)?;
                thread.format = payload.format as u16;
                thread.uncompressed_eof = payload.uncompressed_len as u32;
                thread.compressed_eof = payload.bytes.len() as u32;
                thread.thread_crc = payload.crc;
                payloads.push((idx, payload.bytes));
            }
            ThreadMod::Add { thread_id, format, mut source, provisional_idx } => {
                let payload = compress_source(&mut source, format)?;
                let (class, kind) = thread_id.class_kind();
                record.threads.push(Thread {
                    idx: provisional_idx,
                    class,
                    format: payload.format as u16,
                    kind,
                    thread_crc: payload.crc,
                    uncompressed_eof: payload.uncompressed_len as u32,
                    compressed_eof: payload.bytes.len() as u32,
                    file_offset: None,
                    synthesized: false,
                    inline_bytes: None,
                });
                payloads.push((provisional_idx, payload.bytes));
            }
        }
    }
    Ok(payloads)
}

/// The result of compressing (or passing through) a `DataSource`: the
/// bytes to write, the format they're actually stored in, the
/// uncompressed length, and the v3 thread CRC (always computed over
/// the uncompressed stream).
struct ThreadPayload {
    format: ThreadFormat,
    bytes: Vec<u8>,
    uncompressed_len: u64,
    crc: u16,
}

/// Run a source's bytes through `requested_format`'s codec, or, if the
/// source was marked [`DataSource::as_precompressed`], copy its bytes
/// through unchanged and recover the CRC by expanding once in memory.
fn compress_source(source: &mut DataSource, requested_format: ThreadFormat) -> Result<ThreadPayload> {
    if source.format() != ThreadFormat::Uncompressed {
        let compressed_len = match source.other_len() {
            Some(len) => len,
            None => source.current_len()?,
        };
        let mut bytes = Vec::new();
        source.reader()?.read_to_end(&mut bytes)?;

        let mut decoded = crate::sink::DataSink::to_buffer();
        let ctx = CodecContext { uncompressed_len: 0, compressed_len };
        let crc = codec::expand(source.format() as u16, &ctx, &mut bytes.as_slice(), &mut decoded, None)?;
        let decoded = decoded.into_buffer().unwrap_or_default();
        return Ok(ThreadPayload {
            format: source.format(),
            uncompressed_len: decoded.len() as u64,
            crc: crc.value(),
            bytes,
        });
    }

    let uncompressed_len = match source.other_len() {
        Some(len) => len,
        None => source.current_len()?,
    };
    let mut reader = source.reader()?;
    let mut crc = RunningCrc::new();
    let mut out = Vec::new();
    {
        let mut crc_reader = crate::crc::CrcRead::new(&mut reader, &mut crc);
        let ctx = CodecContext { uncompressed_len, compressed_len: uncompressed_len };
        codec::compress(requested_format, &ctx, &mut crc_reader, &mut out)?;
    }
    Ok(ThreadPayload { format: requested_format, bytes: out, uncompressed_len, crc: crc.value() })
}
