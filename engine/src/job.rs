//! Batch orchestration module.
//!
//! This module provides the batch lifecycle functions:
//! - Planning a batch (selecting the next candidates)
//! - Processing a batch (staged copy, verification, ledger commit per file)
//! - Running a batch end to end from an `EngineConfig`
//!
//! Files are handled strictly one after the other. Each file's ledger write
//! is its own transaction, so an interruption after file k leaves exactly
//! the records for files 1..k.

use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::checksums::ChecksumAlgorithm;
use crate::config::{absolute, EngineConfig};
use crate::error::{EngineError, LedgerError, TransferError};
use crate::fs_ops;
use crate::ledger::LedgerStore;
use crate::model::{
    BatchResult, CopiedFile, FailedFile, FileCandidate, FileOutcome, NewProcessedFile, SkipReason,
    SkippedFile,
};
use crate::progress::BatchObserver;
use crate::reconciler;
use crate::selector;

/// Select the next batch without copying anything.
pub fn plan_batch(ledger: &LedgerStore, config: &EngineConfig) -> Result<Vec<FileCandidate>, EngineError> {
    config.validate()?;
    let filter = config.file_filter()?;
    selector::select(
        ledger,
        &config.source_dir,
        &filter,
        config.batch_size,
        config.recursive,
    )
}

/// Select and process one batch.
///
/// Before selection the target directory is created if needed and staging
/// files left by an interrupted run are removed (only reported in dry-run).
///
/// # Errors
/// Returns EngineError only when the batch cannot start at all. Per-file
/// failures are in the returned BatchResult.
pub fn run_batch(
    ledger: &LedgerStore,
    config: &EngineConfig,
    observer: Option<&dyn BatchObserver>,
) -> Result<BatchResult, EngineError> {
    config.validate()?;
    selector::check_source_dir(&config.source_dir)?;

    let config = &EngineConfig {
        source_dir: absolute(&config.source_dir),
        target_dir: absolute(&config.target_dir),
        ..config.clone()
    };

    if config.dry_run {
        if config.target_dir.is_dir() {
            reconciler::clean_staging(&config.target_dir, true)?;
        }
    } else {
        fs_ops::ensure_dir(&config.target_dir).map_err(|e| EngineError::TargetUnavailable {
            path: config.target_dir.clone(),
            source: e,
        })?;
        reconciler::clean_staging(&config.target_dir, false)?;
    }

    let candidates = plan_batch(ledger, config)?;
    Ok(process_batch(
        ledger,
        &candidates,
        &config.target_dir,
        config.hash(),
        config.dry_run,
        observer,
    ))
}

/// Process candidates in order, one ledger transaction per copied file.
///
/// Skips and per-file failures never stop the loop; disk exhaustion does,
/// leaving the remaining candidates untouched for the next run.
pub fn process_batch(
    ledger: &LedgerStore,
    candidates: &[FileCandidate],
    target_dir: &Path,
    hash: Option<ChecksumAlgorithm>,
    dry_run: bool,
    observer: Option<&dyn BatchObserver>,
) -> BatchResult {
    let mut result = BatchResult::new(dry_run);
    let run_id = result.run_id;
    info!(%run_id, candidates = candidates.len(), dry_run, target = %target_dir.display(), "Batch started");

    if let Some(observer) = observer {
        observer.on_batch_started(run_id, candidates);
    }

    for (index, candidate) in candidates.iter().enumerate() {
        if let Some(observer) = observer {
            observer.on_file_started(index, candidate);
        }

        let outcome = process_candidate(ledger, candidate, target_dir, hash, dry_run);
        match &outcome {
            FileOutcome::Copied(copied) => {
                info!(%run_id, filename = %copied.filename, size = copied.size, dry_run, "File copied");
                result.bytes_copied += copied.size;
                result.succeeded.push(copied.clone());
            }
            FileOutcome::Skipped(skipped) => {
                if skipped.reason == SkipReason::AlreadyRecorded {
                    debug!(%run_id, filename = %skipped.filename, "Skipped: already recorded");
                } else {
                    warn!(%run_id, filename = %skipped.filename, reason = %skipped.reason, "File skipped");
                }
                result.skipped.push(skipped.clone());
            }
            FileOutcome::Failed(failed) => {
                error!(
                    %run_id,
                    filename = %failed.filename,
                    error_type = %failed.error_type,
                    error = %failed.message,
                    "File failed"
                );
                result.failed.push(failed.clone());
            }
        }

        if let Some(observer) = observer {
            observer.on_file_completed(index, &outcome);
        }

        if aborts_batch(&outcome) {
            let remaining = candidates.len() - index - 1;
            error!(%run_id, remaining, "Target disk is full, aborting batch");
            result.aborted = Some(format!(
                "disk full after {}; {} candidate(s) left for the next run",
                candidate.filename, remaining
            ));
            break;
        }
    }

    let finished_at = Utc::now();
    result.finished_at = Some(finished_at);
    info!(
        %run_id,
        succeeded = result.succeeded.len(),
        skipped = result.skipped.len(),
        failed = result.failed.len(),
        bytes = result.bytes_copied,
        duration_ms = (finished_at - result.started_at).num_milliseconds(),
        aborted = result.aborted.is_some(),
        "Batch finished"
    );

    if let Some(observer) = observer {
        observer.on_batch_completed(&result);
    }

    result
}

fn aborts_batch(outcome: &FileOutcome) -> bool {
    matches!(outcome, FileOutcome::Failed(f) if f.error_type.is_fatal())
}

fn process_candidate(
    ledger: &LedgerStore,
    candidate: &FileCandidate,
    target_dir: &Path,
    hash: Option<ChecksumAlgorithm>,
    dry_run: bool,
) -> FileOutcome {
    let skip = |reason| {
        FileOutcome::Skipped(SkippedFile {
            filename: candidate.filename.clone(),
            reason,
        })
    };

    match ledger.lookup(&candidate.filename) {
        Ok(true) => return skip(SkipReason::AlreadyRecorded),
        Ok(false) => {}
        Err(e) => return fail(ledger, candidate, TransferError::Ledger(e), dry_run),
    }

    // Never overwrite: the downstream consumer may be working on it.
    let target_path = target_dir.join(&candidate.filename);
    if fs::symlink_metadata(&target_path).is_ok() {
        return skip(SkipReason::TargetCollision);
    }

    if dry_run {
        return FileOutcome::Copied(CopiedFile {
            filename: candidate.filename.clone(),
            source_path: candidate.source_path.clone(),
            target_path,
            size: candidate.size,
            hash: None,
        });
    }

    let staging = fs_ops::staging_path_for(target_dir, &candidate.filename);
    match transfer(ledger, candidate, &staging, &target_path, hash) {
        Ok(copied) => FileOutcome::Copied(copied),
        Err(TransferError::Ledger(LedgerError::DuplicateFilename { .. })) => {
            fs_ops::remove_quietly(&staging);
            skip(SkipReason::DuplicateRecord)
        }
        Err(e) => {
            fs_ops::remove_quietly(&staging);
            fail(ledger, candidate, e, dry_run)
        }
    }
}

/// Stage, verify, then insert + publish + commit.
fn transfer(
    ledger: &LedgerStore,
    candidate: &FileCandidate,
    staging: &Path,
    target_path: &Path,
    hash: Option<ChecksumAlgorithm>,
) -> Result<CopiedFile, TransferError> {
    let staged = fs_ops::stage_copy(&candidate.source_path, staging, hash)?;
    let digest = fs_ops::verify_staged(&staged)?;

    let record = NewProcessedFile {
        filename: candidate.filename.clone(),
        source_path: candidate.source_path.clone(),
        target_path: target_path.to_path_buf(),
        size: staged.bytes,
        copy_date: Utc::now(),
        hash: digest.map(|d| d.to_string_with_algo()),
    };

    let mut published = false;
    let stored = ledger.record_success_with(&record, || {
        fs_ops::publish(staging, target_path)?;
        published = true;
        Ok(())
    });

    match stored {
        Ok(stored) => Ok(CopiedFile {
            filename: stored.filename,
            source_path: stored.source_path,
            target_path: stored.target_path,
            size: stored.size,
            hash: stored.hash,
        }),
        Err(e) => {
            // Commit failed after the rename: take the file back down.
            if published {
                fs_ops::remove_quietly(target_path);
            }
            Err(TransferError::Ledger(e))
        }
    }
}

fn fail(ledger: &LedgerStore, candidate: &FileCandidate, err: TransferError, dry_run: bool) -> FileOutcome {
    let error_type = err.error_type();
    let message = err.to_string();

    if !dry_run {
        if let Err(e) = ledger.record_error(&candidate.filename, error_type, &message) {
            error!(filename = %candidate.filename, error = %e, "Could not record error in ledger");
        }
    }

    FileOutcome::Failed(FailedFile {
        filename: candidate.filename.clone(),
        error_type,
        message,
    })
}
