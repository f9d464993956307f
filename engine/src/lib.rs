//! # File Tracker Engine - Tracking & Batch Transfer Library
//!
//! A headless engine that moves multimedia files from a source tree into a
//! processing directory in bounded batches, recording every completed copy
//! in a SQLite ledger so that no file is ever copied twice.
//!
//! ## Overview
//!
//! The engine provides:
//! - Deterministic candidate selection with include/exclude globs
//! - Staged copies published by rename inside the ledger transaction
//! - Optional content hashing of the copied bytes
//! - Per-file error isolation; only disk exhaustion aborts a batch
//! - Orphan detection and ledger integrity checks
//! - Progress reporting via an observer trait (decoupled from any UI)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{run_batch, EngineConfig, LedgerStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new("/media/incoming", "/media/processing", "data/file_tracker.db")
//!     .with_batch_size(10);
//! config.validate()?;
//!
//! let ledger = LedgerStore::open(&config.database_path)?;
//! let result = run_batch(&ledger, &config, None)?;
//! println!(
//!     "{} copied, {} skipped, {} failed",
//!     result.succeeded.len(),
//!     result.skipped.len(),
//!     result.failed.len()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Records, candidates, batch results and reports
//! - **error**: Error types and categorization
//! - **config**: Resolved, validated engine configuration
//! - **ledger**: SQLite-backed ledger store
//! - **selector**: Candidate selection
//! - **fs_ops**: Staged copy, verification, publish
//! - **job**: Batch orchestration (plan, process, run)
//! - **reconciler**: Orphans, integrity, staging cleanup
//! - **progress**: Batch observer trait
//! - **checksums**: Checksum computation

pub mod checksums;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod ledger;
pub mod model;
pub mod progress;
pub mod reconciler;
pub mod selector;

// Re-export main types and functions
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::{EngineConfig, DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_PATH, DEFAULT_EXCLUDE_PATTERNS};
pub use error::{EngineError, ErrorType, LedgerError, TransferError};
pub use job::{plan_batch, process_batch, run_batch};
pub use ledger::{LedgerStore, ProcessedRecords};
pub use model::{
    BatchResult, CopiedFile, Discrepancy, DiscrepancyKind, ErrorRecord, FailedFile, FileCandidate,
    FileOutcome, IntegrityOptions, IntegrityReport, NewProcessedFile, ProcessedFileRecord,
    ProcessedFilter, SkipReason, SkippedFile, Summary,
};
pub use progress::BatchObserver;
pub use reconciler::{check_integrity, clean_staging, delete_orphans, find_orphans, OrphanDeletion};
pub use selector::{select, FileFilter};
