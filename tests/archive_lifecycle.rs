//! End-to-end tests driving `Archive` through the scenarios called out
//! in the format spec's testable-properties section: open/create/flush/
//! close, add+extract round trips, renames, streaming mode, and the
//! recoverable-error / error-handler paths.

use nufx::callback::{ErrorHandler, ErrorResponse, ErrorStatus};
use nufx::config::Compression;
use nufx::record::{AccessFlags, FilesystemId};
use nufx::{Archive, DataSink, DataSource};

fn temp_paths(dir: &tempfile::TempDir, name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    (dir.path().join(name), dir.path().join(format!("{name}.tmp")))
}

#[test]
fn empty_archive_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "empty.shk");

    let archive = Archive::create(&archive_path, &temp_path).unwrap();
    archive.close().unwrap();

    assert!(!archive_path.exists(), "a created-but-never-flushed archive shouldn't leave a file behind");
    assert!(!temp_path.exists(), "the temp file must not survive close either");
}

#[test]
fn add_one_file_flush_reopen_extract() {
    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "one_file.shk");

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i & 0xFF) as u8).collect();

    let mut archive = Archive::create(&archive_path, &temp_path).unwrap();
    let rec_idx = archive
        .add_record(
            "FOO.TXT",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(payload.clone()),
            Compression::Lzw2,
        )
        .unwrap();
    archive.flush().unwrap();
    archive.close().unwrap();

    assert!(archive_path.exists());

    let mut archive = Archive::open_ro(&archive_path).unwrap();
    let (found_idx, uncompressed_len, thread_idx) = {
        let records = archive.records().unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        let data_thread = rec.find_thread(nufx::ThreadId::DataFork).unwrap();
        (rec.idx, data_thread.uncompressed_eof, data_thread.idx)
    };
    assert_eq!(found_idx, rec_idx);
    assert_eq!(uncompressed_len, 10_000);
    assert_eq!(archive.record_name(rec_idx).unwrap(), "FOO.TXT");

    let mut sink = DataSink::to_buffer();
    archive.extract_thread(rec_idx, thread_idx, &mut sink, None).unwrap();
    assert_eq!(sink.into_buffer().unwrap(), payload);
}

#[test]
fn rename_header_filename_record() {
    // Hand-build a minimal v0 record whose name lives in the header
    // (the legacy layout), the way a pre-ShrinkIt-3.0 producer would
    // have written it, since `Archive::add_record` itself always
    // stores names in a filename thread.
    use nufx::master_header::MasterHeader;
    use nufx::record::Record;
    use std::io::{Seek, SeekFrom, Write};

    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "v0_header_name.shk");

    {
        let mut file = std::fs::File::create(&archive_path).unwrap();
        MasterHeader::default().write_to(&mut file).unwrap();

        let mut rec = Record {
            idx: nufx::RecordIdx(1000),
            header_crc: 0,
            attrib_count: 0,
            version: 0,
            fs_id: FilesystemId::ProDos as u16,
            fs_info: b'/' as u16,
            access: AccessFlags::UNLOCKED.bits(),
            file_type: 0x04,
            extra_type: 0,
            storage_type: 0,
            create_when: nufx::datetime::DateTime::default(),
            mod_when: nufx::datetime::DateTime::default(),
            archive_when: nufx::datetime::DateTime::default(),
            option_list: Vec::new(),
            extra_bytes: Vec::new(),
            header_filename: Some(b"OLD".to_vec()),
            thread_filename: None,
            threads: Vec::new(),
            thread_mods: Vec::new(),
            fake_threads: 0,
            file_offset: 0,
            header_length: 0,
            dirty_header: false,
            drop_header_filename: false,
            is_bad_mac: false,
        };
        let header_start = file.stream_position().unwrap();
        rec.write_header(&mut file).unwrap();
        let header_end = file.stream_position().unwrap();

        // Back-patch the master header's record count and EOF now that
        // we know where the one record ends.
        file.seek(SeekFrom::Start(0)).unwrap();
        let master = MasterHeader { total_records: 1, master_eof: header_end as u32, ..MasterHeader::default() };
        master.write_to(&mut file).unwrap();
        file.seek(SeekFrom::Start(header_end)).unwrap();
        file.flush().unwrap();
        let _ = header_start;
    }

    let mut archive = Archive::open_rw(&archive_path, &temp_path, false).unwrap();
    let rec_idx = {
        let records = archive.records().unwrap();
        assert_eq!(records.len(), 1);
        records[0].idx
    };
    assert_eq!(archive.record_name(rec_idx).unwrap(), "OLD");

    archive.rename_record(rec_idx, "NEW.LONGER", b'/').unwrap();
    archive.flush().unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open_ro(&archive_path).unwrap();
    let rec_idx = {
        let records = archive.records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].header_filename.is_none());
        assert!(records[0].has_filename_thread());
        records[0].idx
    };
    assert_eq!(archive.record_name(rec_idx).unwrap(), "NEW.LONGER");
}

#[test]
fn flush_with_no_mutations_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "noop.shk");

    let mut archive = Archive::create(&archive_path, &temp_path).unwrap();
    archive
        .add_record(
            "A",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(vec![1, 2, 3]),
            Compression::None,
        )
        .unwrap();
    archive.flush().unwrap();
    archive.close().unwrap();

    let before = std::fs::read(&archive_path).unwrap();

    let mut archive = Archive::open_rw(&archive_path, &temp_path, false).unwrap();
    archive.records().unwrap();
    let status = archive.flush().unwrap();
    assert!(status.contains(nufx::FlushStatus::SUCCESSFUL_FLUSH));
    archive.close().unwrap();

    let after = std::fs::read(&archive_path).unwrap();
    assert_eq!(before, after, "a load -> flush with no mutations must be byte-identical");
}

#[test]
fn crc_mismatch_with_ignore_handler_succeeds_abort_handler_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "corrupt.shk");

    let payload = b"hello shrinkit world".to_vec();
    let mut archive = Archive::create(&archive_path, &temp_path).unwrap();
    let rec_idx = archive
        .add_record(
            "MSG",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(payload.clone()),
            Compression::None,
        )
        .unwrap();
    archive.flush().unwrap();
    archive.close().unwrap();

    // Corrupt one byte in the data fork's payload in place. Uncompressed
    // storage means the payload is the record's trailing bytes verbatim,
    // so flipping the last byte on disk corrupts the fork without
    // touching any header.
    {
        let mut bytes = std::fs::read(&archive_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&archive_path, bytes).unwrap();
    }

    struct AlwaysIgnore;
    impl ErrorHandler for AlwaysIgnore {
        fn on_error(&mut self, _status: &ErrorStatus) -> ErrorResponse {
            ErrorResponse::Ignore
        }
    }
    struct AlwaysAbort;
    impl ErrorHandler for AlwaysAbort {
        fn on_error(&mut self, _status: &ErrorStatus) -> ErrorResponse {
            ErrorResponse::Abort
        }
    }

    let mut archive = Archive::open_ro(&archive_path).unwrap();
    archive.set_error_handler(Box::new(AlwaysIgnore));
    let thread_idx = {
        let rec = archive.record_by_idx(rec_idx).unwrap();
        rec.find_thread(nufx::ThreadId::DataFork).unwrap().idx
    };
    let mut sink = DataSink::to_buffer();
    archive.extract_thread(rec_idx, thread_idx, &mut sink, None).unwrap();
    assert_ne!(sink.into_buffer().unwrap(), payload, "Ignore surfaces the corrupted bytes, not the originals");

    let mut archive = Archive::open_ro(&archive_path).unwrap();
    archive.set_error_handler(Box::new(AlwaysAbort));
    let mut sink = DataSink::to_buffer();
    let err = archive.extract_thread(rec_idx, thread_idx, &mut sink, None);
    assert!(matches!(err, Err(nufx::NufxError::BadThreadCRC)));
}

#[test]
fn streaming_mode_reads_records_in_order_without_seeking() {
    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "stream_src.shk");

    let mut archive = Archive::create(&archive_path, &temp_path).unwrap();
    archive
        .add_record(
            "A",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(vec![1, 2, 3]),
            Compression::None,
        )
        .unwrap();
    archive
        .add_record(
            "B",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(vec![4, 5, 6, 7]),
            Compression::None,
        )
        .unwrap();
    archive.flush().unwrap();
    archive.close().unwrap();

    let file = std::fs::File::open(&archive_path).unwrap();
    let mut archive = Archive::open_stream_ro(file).unwrap();

    let first = archive.stream_next().unwrap().expect("first record");
    assert_eq!(archive.record_name(first).unwrap(), "A");

    let second = archive.stream_next().unwrap().expect("second record");
    assert_eq!(archive.record_name(second).unwrap(), "B");

    assert!(archive.stream_next().unwrap().is_none(), "only two records were written");

    let thread_idx = archive.record_by_idx(second).unwrap().find_thread(nufx::ThreadId::DataFork).unwrap().idx;
    let mut sink = DataSink::to_buffer();
    archive.extract_thread(second, thread_idx, &mut sink, None).unwrap();
    assert_eq!(sink.into_buffer().unwrap(), vec![4, 5, 6, 7]);
}

#[test]
fn opening_a_short_file_fails_not_nufx() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.shk");
    std::fs::write(&path, vec![0u8; 10]).unwrap();
    assert!(matches!(Archive::open_ro(&path), Err(nufx::NufxError::NotNuFX)));
}

#[test]
fn opening_archive_with_eof_equal_to_header_size_fails_no_records() {
    use nufx::master_header::MasterHeader;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.shk");
    let mut file = std::fs::File::create(&path).unwrap();
    let mut header = MasterHeader::default();
    header.master_eof = nufx::master_header::MASTER_HEADER_LEN as u32;
    header.write_to(&mut file).unwrap();
    drop(file);
    assert!(matches!(Archive::open_ro(&path), Err(nufx::NufxError::NoRecords)));
}

#[test]
fn abort_discards_staged_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let (archive_path, temp_path) = temp_paths(&dir, "abort.shk");

    let mut archive = Archive::create(&archive_path, &temp_path).unwrap();
    archive
        .add_record(
            "A",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(vec![1, 2, 3]),
            Compression::None,
        )
        .unwrap();
    archive.flush().unwrap();
    archive.close().unwrap();

    let mut archive = Archive::open_rw(&archive_path, &temp_path, false).unwrap();
    archive
        .add_record(
            "B",
            FilesystemId::ProDos,
            b'/',
            0x04,
            AccessFlags::UNLOCKED.bits(),
            DataSource::from_buffer(vec![4, 5, 6]),
            Compression::None,
        )
        .unwrap();
    archive.abort();
    assert_eq!(archive.records().unwrap().len(), 1, "the staged add must not survive abort");
    archive.close().unwrap();

    let mut archive = Archive::open_ro(&archive_path).unwrap();
    assert_eq!(archive.records().unwrap().len(), 1, "the original archive must be untouched after abort");
}
