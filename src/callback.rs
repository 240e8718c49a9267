//! Callback traits invoked synchronously on the calling thread: progress
//! updates, selection filtering, output-pathname rewriting, error
//! handling, and free-form messages.
//!
//! All callbacks are called from inside a public API call (the archive
//! handle's busy flag is already set), and are only permitted to call a
//! documented subset of read-only getters back into the archive. Rust
//! enforces that boundary naturally here: callbacks receive plain data
//! (`&ErrorStatus`, byte counts, …), not a handle back into the archive.

use crate::error::NufxError;
use crate::thread::ThreadIdx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    Continue,
    Abort,
}

pub trait ProgressCallback {
    fn on_progress(&mut self, done: u64, total: u64, state: ProgressState) -> ProgressAction;
}

/// A no-op progress callback, used as the default when the caller
/// registers none.
pub struct NullProgress;
impl ProgressCallback for NullProgress {
    fn on_progress(&mut self, _done: u64, _total: u64, _state: ProgressState) -> ProgressAction {
        ProgressAction::Continue
    }
}

/// Filters which records a bulk operation (e.g. extract-all) visits.
pub trait SelectionFilter {
    fn include(&mut self, record_name: &str) -> bool;
}

/// Rewrites the pathname used to materialize an extracted record on
/// disk (e.g. applying a destination directory or filesystem-specific
/// escaping); the core engine never touches the native filesystem
/// itself, so this only matters to callers using path-based sinks.
pub trait OutputPathnameFilter {
    fn rewrite(&mut self, original: &str) -> String;
}

/// The operation that was in progress when a recoverable error fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOperation {
    Add,
    Extract,
    Test,
    Rename,
    Delete,
    Flush,
}

/// What the engine offers the caller in response to a recoverable
/// error; only a subset is legal for any given error (e.g. `Rename` only
/// makes sense for `FileExists`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponse {
    Abort,
    Retry,
    Ignore,
    Skip,
    Rename,
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct ErrorStatus {
    pub operation: ErrorOperation,
    pub error: ErrorKindSummary,
    pub pathname: Option<String>,
    pub thread_idx: Option<ThreadIdx>,
    pub allowed: &'static [ErrorResponse],
}

/// A cheap, `Clone`-able summary of the [`NufxError`] that triggered the
/// callback (the error itself isn't `Clone` because `io::Error` isn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKindSummary {
    FileExists,
    BadDataCrc,
    DuplicateNotFound,
    FileNotFound,
    Other,
}

impl From<&NufxError> for ErrorKindSummary {
    fn from(e: &NufxError) -> Self {
        match e {
            NufxError::FileExists(_) => ErrorKindSummary::FileExists,
            NufxError::BadThreadCRC => ErrorKindSummary::BadDataCrc,
            NufxError::DuplicateNotFound => ErrorKindSummary::DuplicateNotFound,
            NufxError::FileNotFound(_) => ErrorKindSummary::FileNotFound,
            _ => ErrorKindSummary::Other,
        }
    }
}

pub trait ErrorHandler {
    fn on_error(&mut self, status: &ErrorStatus) -> ErrorResponse;
}

/// The default handler: abort on everything recoverable. Matches the
/// engine's behavior when no handler has been registered.
pub struct AbortOnError;
impl ErrorHandler for AbortOnError {
    fn on_error(&mut self, _status: &ErrorStatus) -> ErrorResponse {
        ErrorResponse::Abort
    }
}

/// Free-form diagnostic text the engine wants to surface to the caller
/// (mirrors the original library's global error-message hook, but
/// scoped to one archive handle instead of a process-wide function
/// pointer, per the design note about not relying on mutable globals).
pub trait MessageHandler {
    fn on_message(&mut self, text: &str);
}

pub struct TracingMessages;
impl MessageHandler for TracingMessages {
    fn on_message(&mut self, text: &str) {
        tracing::debug!(target: "nufx::message", "{text}");
    }
}
