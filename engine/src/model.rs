//! Core data model for the tracking engine.
//!
//! This module defines the records persisted in the ledger and the values
//! passed between the selector, the executor and the reconciler:
//! - ProcessedFileRecord / ErrorRecord: the two append-only ledger tables
//! - FileCandidate: a source file proposed for transfer
//! - BatchResult and its per-file entries: the outcome of one run
//! - Summary, Discrepancy, IntegrityReport: reporting values

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorType;

/// A successfully transferred file, as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedFileRecord {
    /// Surrogate key assigned by the store
    pub id: i64,

    /// Base name of the file; the deduplication key
    pub filename: String,

    /// Absolute source path at the time of the copy
    pub source_path: PathBuf,

    /// Absolute target path at the time of the copy
    pub target_path: PathBuf,

    /// Bytes copied
    pub size: u64,

    /// When the copy completed
    pub copy_date: DateTime<Utc>,

    /// Digest of the copied bytes, tagged `"<algorithm>:<hex>"`
    pub hash: Option<String>,
}

/// Values for a new processed-file row (the store assigns the id).
#[derive(Debug, Clone)]
pub struct NewProcessedFile {
    pub filename: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub size: u64,
    pub copy_date: DateTime<Utc>,
    pub hash: Option<String>,
}

/// A failed transfer attempt, as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    /// Category tag (see `ErrorType::as_str`)
    pub error_type: String,
    pub error_message: String,
}

/// A source file eligible for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCandidate {
    /// Absolute source path
    pub source_path: PathBuf,

    /// Path relative to the source root (the ordering key)
    pub relative_path: PathBuf,

    /// Base name (the ledger key)
    pub filename: String,

    /// Size observed during selection
    pub size: u64,
}

/// Why a candidate was not copied. Skips are never failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The ledger already holds a record for this name
    AlreadyRecorded,
    /// A file with this name already sits in the target directory
    TargetCollision,
    /// Another writer recorded the name between lookup and insert
    DuplicateRecord,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyRecorded => write!(f, "already recorded"),
            SkipReason::TargetCollision => write!(f, "target name occupied"),
            SkipReason::DuplicateRecord => write!(f, "recorded concurrently"),
        }
    }
}

/// A file that was copied (or, in dry-run, would be).
#[derive(Debug, Clone, Serialize)]
pub struct CopiedFile {
    pub filename: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub size: u64,
    pub hash: Option<String>,
}

/// A file that was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub filename: String,
    pub reason: SkipReason,
}

/// A file whose transfer failed.
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub filename: String,
    pub error_type: ErrorType,
    pub message: String,
}

/// The outcome of a single candidate, reported to observers.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Copied(CopiedFile),
    Skipped(SkippedFile),
    Failed(FailedFile),
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Identifier carried in every log event of this run
    pub run_id: Uuid,

    /// True when nothing was mutated
    pub dry_run: bool,

    pub succeeded: Vec<CopiedFile>,
    pub skipped: Vec<SkippedFile>,
    pub failed: Vec<FailedFile>,

    /// Set when the batch stopped early (disk exhaustion)
    pub aborted: Option<String>,

    /// Bytes copied (or that would be copied)
    pub bytes_copied: u64,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchResult {
    pub(crate) fn new(dry_run: bool) -> Self {
        BatchResult {
            run_id: Uuid::new_v4(),
            dry_run,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            aborted: None,
            bytes_copied: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Total candidates that reached a terminal outcome.
    pub fn processed(&self) -> usize {
        self.succeeded.len() + self.skipped.len() + self.failed.len()
    }

    /// True when no file failed and the batch ran to completion.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_none()
    }
}

/// Aggregate ledger statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub processed_count: u64,
    pub error_count: u64,
    pub total_bytes: u64,
    pub first_copy: Option<DateTime<Utc>>,
    pub last_copy: Option<DateTime<Utc>>,
    /// Records whose stored copy date could not be read; left out of the range
    pub malformed_dates: u64,
}

/// Filter for listing processed records.
#[derive(Debug, Clone, Default)]
pub struct ProcessedFilter {
    /// SQLite GLOB pattern applied to the filename
    pub filename_glob: Option<String>,
    /// Only records copied at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only records copied before this instant
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of records yielded
    pub limit: Option<usize>,
}

/// Options for the ledger integrity check.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityOptions {
    /// Report records whose source file no longer exists
    pub flag_stale_sources: bool,
}

/// What is wrong with a ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Target still present but its size differs from the record
    SizeMismatch { recorded: u64, on_disk: u64 },
    /// Target still present but its digest differs from the record
    HashMismatch { recorded: String, on_disk: String },
    /// Source file no longer exists (only when requested)
    StaleSource { source_path: PathBuf },
    /// More than one record carries this filename
    DuplicateRecord { count: u64 },
    /// The stored digest or the target could not be read back
    Unverifiable { reason: String },
    /// The ledger row itself could not be decoded
    CorruptRecord { id: i64, reason: String },
}

/// A single integrity finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub filename: String,
    pub target_path: Option<PathBuf>,
    #[serde(flatten)]
    pub kind: DiscrepancyKind,
}

/// Full integrity report produced by the reconciler.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    /// Result of SQLite's own `PRAGMA integrity_check`
    pub sqlite_status: String,
    pub discrepancies: Vec<Discrepancy>,
}

impl IntegrityReport {
    /// True when SQLite reports `ok` and no discrepancy was found.
    pub fn is_clean(&self) -> bool {
        self.sqlite_status == "ok" && self.discrepancies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_result_success_flags() {
        let mut result = BatchResult::new(false);
        assert!(result.is_success());
        assert_eq!(result.processed(), 0);

        result.skipped.push(SkippedFile {
            filename: "a.mp4".to_string(),
            reason: SkipReason::TargetCollision,
        });
        assert!(result.is_success(), "skips are not failures");

        result.aborted = Some("disk full".to_string());
        assert!(!result.is_success());
    }

    #[test]
    fn test_integrity_report_clean_requires_ok_status() {
        let mut report = IntegrityReport {
            sqlite_status: "ok".to_string(),
            discrepancies: Vec::new(),
        };
        assert!(report.is_clean());

        report.discrepancies.push(Discrepancy {
            filename: "clip.mov".to_string(),
            target_path: None,
            kind: DiscrepancyKind::SizeMismatch {
                recorded: 10,
                on_disk: 4,
            },
        });
        assert!(!report.is_clean());

        report.discrepancies.clear();
        report.sqlite_status = "*** in database main ***".to_string();
        assert!(!report.is_clean());
    }
}
