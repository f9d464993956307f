//! Candidate selection.
//!
//! Walks the source tree in a stable depth-first order: entries of each
//! directory sorted by file name, so `a/x.mp4` comes before `a.mp4` because
//! `a` sorts first. Applies the base-name filters and drops names the ledger
//! already knows. Stops as soon as the batch is full, so the ledger is only
//! consulted for names that could still make it into the batch.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::model::FileCandidate;

/// Compiled include/exclude globs, matched against base names.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, EngineError> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_set(include)?)
        };
        Ok(FileFilter {
            include,
            exclude: build_set(exclude)?,
        })
    }

    /// True when `name` is not excluded and, if an allow-list exists, is on it.
    pub fn allows(&self, name: &str) -> bool {
        if self.exclude.is_match(name) {
            return false;
        }
        match &self.include {
            Some(set) => set.is_match(name),
            None => true,
        }
    }
}

fn build_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, EngineError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern).map_err(|e| EngineError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.kind().to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| EngineError::InvalidPattern {
        pattern: patterns.iter().map(|p| p.as_ref()).collect::<Vec<_>>().join(", "),
        reason: e.to_string(),
    })
}

/// Check that `source_dir` can be walked at all.
pub(crate) fn check_source_dir(source_dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(source_dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::InvalidSource {
                path: source_dir.to_path_buf(),
                reason: "not a directory".to_string(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: source_dir.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::EnumerationFailed {
                path: source_dir.to_path_buf(),
                source: e,
            })
        }
    }

    fs::read_dir(source_dir).map_err(|e| EngineError::EnumerationFailed {
        path: source_dir.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Propose at most `batch_size` files not yet in the ledger.
///
/// Symbolic links are neither followed nor proposed. Unreadable
/// subdirectories and entries are logged and skipped. When two files in
/// different subdirectories share a base name only the first one is
/// proposed, since the name is the ledger key.
pub fn select(
    ledger: &LedgerStore,
    source_dir: &Path,
    filter: &FileFilter,
    batch_size: usize,
    recursive: bool,
) -> Result<Vec<FileCandidate>, EngineError> {
    check_source_dir(source_dir)?;

    let mut walker = WalkDir::new(source_dir)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut candidates = Vec::new();
    let mut seen = HashSet::new();
    if batch_size == 0 {
        return Ok(candidates);
    }

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    path = ?e.path().map(|p| p.display().to_string()),
                    error = %e,
                    "Skipping unreadable entry"
                );
                continue;
            }
        };

        if !entry.file_type().is_file() {
            if entry.path_is_symlink() {
                debug!(path = %entry.path().display(), "Not following symbolic link");
            }
            continue;
        }

        let Some(filename) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "Skipping file with non UTF-8 name");
            continue;
        };

        if !filter.allows(filename) {
            debug!(filename, "Filtered out");
            continue;
        }
        if seen.contains(filename) {
            debug!(filename, path = %entry.path().display(), "Name already selected in this batch");
            continue;
        }
        if ledger.lookup(filename)? {
            debug!(filename, "Already in ledger");
            continue;
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping file with unreadable metadata");
                continue;
            }
        };

        let relative_path = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or(entry.path())
            .to_path_buf();
        seen.insert(filename.to_string());
        candidates.push(FileCandidate {
            source_path: entry.path().to_path_buf(),
            relative_path,
            filename: filename.to_string(),
            size,
        });

        if candidates.len() >= batch_size {
            break;
        }
    }

    debug!(selected = candidates.len(), batch_size, "Selection complete");
    Ok(candidates)
}
