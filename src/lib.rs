//! NuFX (ShrinkIt) archive engine: read, write, and incrementally update
//! BXY/SEA/BSE-wrapped NuFX archives.
//!
//! [`Archive`] is the entry point: open a file with [`Archive::open_ro`],
//! [`Archive::open_rw`], or [`Archive::open_stream_ro`], inspect its
//! [`Record`]s and [`Thread`]s, and stage mutations that take effect on
//! the next [`Archive::flush`].

pub mod archive;
pub mod callback;
pub mod codec;
pub mod config;
pub mod crc;
pub mod datetime;
pub mod error;
pub mod funnel;
pub mod io;
pub mod macroman;
pub mod master_header;
pub mod record;
pub mod sink;
pub mod source;
pub mod thread;
pub mod wrapper;

pub use archive::{Archive, FlushStatus};
pub use config::{Compression, Config, ConvertEol, EolStyle, HandleExisting};
pub use error::{NufxError, Result};
pub use record::{AccessFlags, FilesystemId, Record, RecordIdx};
pub use sink::DataSink;
pub use source::DataSource;
pub use thread::{Thread, ThreadFormat, ThreadId, ThreadIdx};
