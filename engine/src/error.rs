//! Error types for the tracking engine.
//!
//! Three layers of errors exist:
//! - `EngineError`: job-level errors that prevent a batch (or a reporting
//!   operation) from running at all.
//! - `TransferError`: a single file's failure. These are recorded in the
//!   ledger and swallowed by the batch loop; only disk exhaustion stops it.
//! - `LedgerError`: failures of the SQLite-backed ledger itself.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors that prevent an operation from being executed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source path exists but cannot be used as a source root
    #[error("Invalid source directory: {} ({reason})", path.display())]
    InvalidSource { path: PathBuf, reason: String },

    /// Target directory cannot be created or is not a directory
    #[error("Target directory unusable: {}", path.display())]
    TargetUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to enumerate a directory at the root level
    #[error("Failed to enumerate directory: {}", path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A glob pattern could not be compiled
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Resolved configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A destructive operation was requested without explicit confirmation
    #[error("Refusing to {action} without explicit confirmation")]
    ConfirmationRequired { action: &'static str },

    /// Ledger failure outside of per-file bookkeeping
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors raised by the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record with this filename already exists (uniqueness constraint)
    #[error("File already recorded in ledger: {filename}")]
    DuplicateFilename { filename: String },

    /// The rename of the staged copy into place failed inside the transaction
    #[error("Failed to publish staged copy: {0}")]
    Publish(#[source] io::Error),

    /// A stored value could not be decoded
    #[error("Corrupt ledger row: {reason}")]
    Corrupt { reason: String },

    /// One processed record could not be decoded; later rows are still readable
    #[error("Corrupt ledger record {id} ({filename}): {reason}")]
    CorruptRecord {
        id: i64,
        filename: String,
        reason: String,
    },

    /// Underlying SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to prepare the ledger location
    #[error("Failed to open ledger at {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LedgerError {
    /// True when SQLite reported that the database or disk is full.
    pub fn is_disk_full(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::DiskFull
            }
            Self::Publish(e) => ErrorType::from_io(e) == ErrorType::DiskSpace,
            _ => false,
        }
    }
}

/// Category tag stored with every `ErrorRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Permission denied reading the source or writing the target
    Permission,
    /// No space left on the target device
    DiskSpace,
    /// Any other I/O failure during the copy
    Io,
    /// The digest of the copied bytes differs from the source stream digest
    HashMismatch,
    /// The source changed size while it was being copied
    SourceChanged,
    /// The ledger could not record the transfer
    Ledger,
}

/// ENOSPC on every unix we build for.
#[cfg(unix)]
const ENOSPC: i32 = 28;

impl ErrorType {
    /// Categorize an I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        #[cfg(unix)]
        if err.raw_os_error() == Some(ENOSPC) {
            return Self::DiskSpace;
        }
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::Permission,
            io::ErrorKind::StorageFull => Self::DiskSpace,
            _ => Self::Io,
        }
    }

    /// Whether a failure of this kind must abort the rest of the batch.
    ///
    /// Only disk exhaustion qualifies: every later copy would fail the same way.
    pub fn is_fatal(&self) -> bool {
        *self == Self::DiskSpace
    }

    /// Tag as stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permission => "permission",
            Self::DiskSpace => "disk_space",
            Self::Io => "io",
            Self::HashMismatch => "hash_mismatch",
            Self::SourceChanged => "source_changed",
            Self::Ledger => "ledger",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file's transfer failure.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Failed to read from the source file
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write the staged or final copy
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Digest of the copied bytes does not match the source stream
    #[error("Hash mismatch after copy: source {expected}, copy {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Source size changed during the copy
    #[error("Source changed during copy: expected {expected} bytes, read {actual}")]
    SourceChanged { expected: u64, actual: u64 },

    /// The ledger rejected or failed to commit the record
    #[error(transparent)]
    Ledger(LedgerError),
}

impl TransferError {
    /// Category recorded in the error ledger.
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => ErrorType::from_io(source),
            Self::HashMismatch { .. } => ErrorType::HashMismatch,
            Self::SourceChanged { .. } => ErrorType::SourceChanged,
            Self::Ledger(e) if e.is_disk_full() => ErrorType::DiskSpace,
            Self::Ledger(LedgerError::Publish(e)) => ErrorType::from_io(e),
            Self::Ledger(_) => ErrorType::Ledger,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_categorized() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let full = io::Error::from(io::ErrorKind::StorageFull);
        let missing = io::Error::from(io::ErrorKind::NotFound);

        assert_eq!(ErrorType::from_io(&denied), ErrorType::Permission);
        assert_eq!(ErrorType::from_io(&full), ErrorType::DiskSpace);
        assert_eq!(ErrorType::from_io(&missing), ErrorType::Io);
    }

    #[cfg(unix)]
    #[test]
    fn test_enospc_is_disk_space() {
        let err = io::Error::from_raw_os_error(ENOSPC);
        assert_eq!(ErrorType::from_io(&err), ErrorType::DiskSpace);
    }

    #[test]
    fn test_only_disk_space_is_fatal() {
        let full = TransferError::Write {
            path: PathBuf::from("/target/a.mp4"),
            source: io::Error::from(io::ErrorKind::StorageFull),
        };
        let denied = TransferError::Read {
            path: PathBuf::from("/source/a.mp4"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        let mismatch = TransferError::HashMismatch {
            expected: "a".to_string(),
            actual: "b".to_string(),
        };

        assert!(full.error_type().is_fatal());
        assert!(!denied.error_type().is_fatal());
        assert!(!mismatch.error_type().is_fatal());
        assert_eq!(denied.error_type().as_str(), "permission");
        assert_eq!(mismatch.error_type().as_str(), "hash_mismatch");
    }

    #[test]
    fn test_publish_failure_uses_io_category() {
        let err = TransferError::Ledger(LedgerError::Publish(io::Error::from(
            io::ErrorKind::PermissionDenied,
        )));
        assert_eq!(err.error_type(), ErrorType::Permission);

        let dup = TransferError::Ledger(LedgerError::DuplicateFilename {
            filename: "a.mp4".to_string(),
        });
        assert_eq!(dup.error_type(), ErrorType::Ledger);
    }
}
