//! Reconciliation between the target directory and the ledger.
//!
//! A ledger record whose target file is gone is the normal end state (the
//! downstream consumer deletes what it has processed). An orphan is the
//! opposite: a file in the target directory that the ledger never recorded.
//! Orphans are reported for manual review and only deleted on explicit
//! confirmation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::EngineError;
use crate::fs_ops;
use crate::ledger::LedgerStore;
use crate::model::{Discrepancy, DiscrepancyKind, IntegrityOptions, IntegrityReport};

/// Outcome of an orphan deletion request.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct OrphanDeletion {
    pub deleted: Vec<PathBuf>,
    /// Files recorded in the ledger since they were reported; left alone
    pub kept: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Regular files directly in `target_dir` with no ledger record, sorted.
///
/// Staging files of in-flight or interrupted copies are not orphans.
pub fn find_orphans(ledger: &LedgerStore, target_dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let entries = fs::read_dir(target_dir).map_err(|e| EngineError::EnumerationFailed {
        path: target_dir.to_path_buf(),
        source: e,
    })?;

    let mut orphans = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %target_dir.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        match entry.file_type() {
            Ok(ft) if ft.is_file() => {}
            _ => continue,
        }

        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!(path = %path.display(), "Non UTF-8 name cannot be matched against the ledger");
            orphans.push(path);
            continue;
        };
        if fs_ops::is_staging_name(&name) {
            continue;
        }
        if !ledger.lookup(&name)? {
            orphans.push(path);
        }
    }

    orphans.sort();
    info!(dir = %target_dir.display(), count = orphans.len(), "Orphan scan complete");
    Ok(orphans)
}

/// Delete previously reported orphans.
///
/// Refuses without `confirmed`. Each file is looked up again right before
/// deletion so a file recorded in the meantime survives. In dry-run nothing
/// is deleted and every path that would be is listed under `deleted`.
pub fn delete_orphans(
    ledger: &LedgerStore,
    orphans: &[PathBuf],
    confirmed: bool,
    dry_run: bool,
) -> Result<OrphanDeletion, EngineError> {
    if !confirmed {
        return Err(EngineError::ConfirmationRequired {
            action: "delete orphaned files",
        });
    }

    let mut outcome = OrphanDeletion::default();
    for path in orphans {
        let recorded = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => ledger.lookup(name)?,
            None => false,
        };
        if recorded {
            info!(path = %path.display(), "Now recorded in ledger, keeping");
            outcome.kept.push(path.clone());
            continue;
        }

        if dry_run {
            info!(path = %path.display(), "Would delete orphan");
            outcome.deleted.push(path.clone());
            continue;
        }

        match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "Deleted orphan");
                outcome.deleted.push(path.clone());
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete orphan");
                outcome.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    Ok(outcome)
}

/// Ledger-vs-filesystem check plus duplicate names and SQLite's own check.
pub fn check_integrity(ledger: &LedgerStore, options: IntegrityOptions) -> Result<IntegrityReport, EngineError> {
    let sqlite_status = ledger.sqlite_integrity_check()?;
    if sqlite_status != "ok" {
        warn!(status = %sqlite_status, "SQLite integrity check failed");
    }

    let mut discrepancies = ledger.check_integrity(options)?;
    for (filename, count) in ledger.duplicate_filenames()? {
        warn!(filename = %filename, count, "Duplicate ledger records");
        discrepancies.push(Discrepancy {
            filename,
            target_path: None,
            kind: DiscrepancyKind::DuplicateRecord { count },
        });
    }

    Ok(IntegrityReport {
        sqlite_status,
        discrepancies,
    })
}

/// Remove staging files left in `target_dir` by an interrupted run.
///
/// Returns the artifacts found. In dry-run they are only reported.
pub fn clean_staging(target_dir: &Path, dry_run: bool) -> Result<Vec<PathBuf>, EngineError> {
    let artifacts = match fs_ops::list_staging_artifacts(target_dir) {
        Ok(found) => found,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(EngineError::EnumerationFailed {
                path: target_dir.to_path_buf(),
                source: e,
            })
        }
    };

    for path in &artifacts {
        if dry_run {
            info!(path = %path.display(), "Would remove interrupted copy");
        } else {
            warn!(path = %path.display(), "Removing interrupted copy");
            fs_ops::remove_quietly(path);
        }
    }
    Ok(artifacts)
}
