//! The engine's single error type.

use thiserror::Error as ThisError;

pub type Result<T, E = NufxError> = std::result::Result<T, E>;

/// Every failure class the public API can return.
///
/// Grouped loosely by the taxonomy in the design docs (I/O, Format,
/// Argument, State, Policy) but kept as one flat enum since callers
/// match on specific variants, not groups.
#[derive(Debug, ThisError)]
pub enum NufxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Format ---
    #[error("not a NuFX archive")]
    NotNuFX,
    #[error("archive has no records")]
    NoRecords,
    #[error("master header CRC mismatch")]
    BadMHCRC,
    #[error("master header version {0} is newer than this engine supports")]
    BadMHVersion(u16),
    #[error("record header CRC mismatch")]
    BadRHCRC,
    #[error("thread data CRC mismatch")]
    BadThreadCRC,
    #[error("{0}")]
    BadRecord(&'static str),
    #[error("malformed or corrupt data: {0}")]
    BadData(&'static str),
    #[error("unreasonable value encountered while parsing: {0}")]
    BadStruct(&'static str),
    #[error("record header not found at expected offset")]
    RecHdrNotFound,
    #[error("archive appears to be a Binary II container with files following it")]
    IsBinary2,

    // --- Argument ---
    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),
    #[error("invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("filename may not start with the path separator")]
    LeadingFssep,
    #[error("operation not supported: {0}")]
    Usage(&'static str),

    // --- State ---
    #[error("archive is read-only")]
    ArchiveRO,
    #[error("archive handle is busy (reentrant call)")]
    Busy,
    #[error("feature not supported by this build: {0}")]
    UnsupFeature(&'static str),
    #[error("unknown feature requested: {0}")]
    UnknownFeature(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),

    // --- Policy / per-record outcomes ---
    #[error("a record with that name already exists")]
    RecordExists,
    #[error("record not found")]
    RecordNotFound,
    #[error("record index not found")]
    RecIdxNotFound,
    #[error("thread ID not found in record")]
    ThreadIDNotFound,
    #[error("thread index not found")]
    ThreadIdxNotFound,
    #[error("record has no filename")]
    RecNameNotFound,
    #[error("no duplicate entries found")]
    DuplicateNotFound,
    #[error("file not found: {0:?}")]
    FileNotFound(String),
    #[error("file already exists: {0:?}")]
    FileExists(String),
    #[error("target is not newer than the archived copy")]
    NotNewer,
    #[error("new payload does not fit in the pre-sized thread")]
    PreSizeOverflow,
    #[error("thread is not pre-sized (only filename/comment threads may be updated in place)")]
    NotPreSized,
    #[error("could not add thread: {0}")]
    ThreadAdd(&'static str),
    #[error("record set was modified in a way that conflicts with a pending change")]
    ModRecChange,
    #[error("thread set was modified in a way that conflicts with a pending change")]
    ModThreadChange,
    #[error("operation skipped by caller")]
    Skipped,
    #[error("operation aborted by caller")]
    Aborted,
    #[error("requested rename")]
    Rename,

    #[error("generic failure: {0}")]
    Generic(&'static str),
}

impl NufxError {
    /// True for the handful of recoverable errors that may be routed
    /// through the registered error handler instead of failing outright.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            NufxError::FileExists(_)
                | NufxError::BadThreadCRC
                | NufxError::DuplicateNotFound
                | NufxError::FileNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_variants_are_exactly_the_documented_handful() {
        assert!(NufxError::BadThreadCRC.is_recoverable());
        assert!(NufxError::FileExists("x".into()).is_recoverable());
        assert!(NufxError::FileNotFound("x".into()).is_recoverable());
        assert!(NufxError::DuplicateNotFound.is_recoverable());

        assert!(!NufxError::NotNuFX.is_recoverable());
        assert!(!NufxError::ArchiveRO.is_recoverable());
        assert!(!NufxError::Aborted.is_recoverable());
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: NufxError = io_err.into();
        assert!(matches!(err, NufxError::Io(_)));
    }
}
