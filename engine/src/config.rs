//! Resolved engine configuration.
//!
//! Front ends merge defaults, files, environment and flags however they
//! like; the engine only ever sees one validated `EngineConfig` built before
//! a batch starts.

use std::path::{Path, PathBuf};

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::selector::FileFilter;

pub const DEFAULT_DATABASE_PATH: &str = "data/file_tracker.db";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_EXCLUDE_PATTERNS: [&str; 3] = [".*", "*.tmp", "*.part"];

/// Everything a batch run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub database_path: PathBuf,

    /// Maximum candidates per run (at least 1)
    pub batch_size: usize,

    /// Hash the copied bytes and store the digest
    pub compute_hash: bool,
    pub hash_algorithm: ChecksumAlgorithm,

    /// Base-name globs that are never copied
    pub exclude_patterns: Vec<String>,

    /// Base-name globs; when non-empty only matching names are copied
    pub include_patterns: Vec<String>,

    /// Report decisions without touching the filesystem or the ledger
    pub dry_run: bool,

    /// Walk subdirectories of the source root
    pub recursive: bool,

    /// Integrity check also reports records whose source is gone
    pub flag_stale_sources: bool,
}

impl EngineConfig {
    /// Configuration with default batch size, filters and hashing off.
    pub fn new(
        source_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        database_path: impl Into<PathBuf>,
    ) -> Self {
        EngineConfig {
            source_dir: source_dir.into(),
            target_dir: target_dir.into(),
            database_path: database_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            compute_hash: false,
            hash_algorithm: ChecksumAlgorithm::default(),
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            include_patterns: Vec::new(),
            dry_run: false,
            recursive: true,
            flag_stale_sources: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable hashing with the given algorithm.
    pub fn with_hash(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.compute_hash = true;
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_include_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_stale_source_check(mut self, flag: bool) -> Self {
        self.flag_stale_sources = flag;
        self
    }

    /// Algorithm to hash with, if hashing is on.
    pub fn hash(&self) -> Option<ChecksumAlgorithm> {
        self.compute_hash.then_some(self.hash_algorithm)
    }

    /// Compile the include/exclude globs.
    pub fn file_filter(&self) -> Result<FileFilter, EngineError> {
        FileFilter::new(self.include_patterns.as_slice(), self.exclude_patterns.as_slice())
    }

    /// Reject values no batch could run with.
    ///
    /// Directory existence is checked when a run starts, not here.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_size must be a positive integer".to_string(),
            ));
        }
        if is_blank(&self.source_dir) {
            return Err(EngineError::InvalidConfig("source_dir is required".to_string()));
        }
        if is_blank(&self.target_dir) {
            return Err(EngineError::InvalidConfig("target_dir is required".to_string()));
        }
        if is_blank(&self.database_path) {
            return Err(EngineError::InvalidConfig("database path is required".to_string()));
        }
        let source = absolute(&self.source_dir);
        let target = absolute(&self.target_dir);
        if source == target {
            return Err(EngineError::InvalidConfig(format!(
                "source_dir and target_dir are the same: {}",
                source.display()
            )));
        }
        if self.recursive && target.starts_with(&source) {
            return Err(EngineError::InvalidConfig(format!(
                "target_dir {} is inside the recursively scanned source_dir {}",
                target.display(),
                source.display()
            )));
        }
        self.file_filter()?;
        Ok(())
    }
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// `path` made absolute against the working directory, without touching
/// symlinks. Falls back to the path as given.
pub(crate) fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new("/src", "/dst", DEFAULT_DATABASE_PATH);
        assert_eq!(config.batch_size, 10);
        assert!(config.recursive);
        assert!(!config.dry_run);
        assert_eq!(config.hash(), None);
        assert_eq!(config.exclude_patterns, vec![".*", "*.tmp", "*.part"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hash_enabled() {
        let config = EngineConfig::new("/src", "/dst", "ledger.db").with_hash(ChecksumAlgorithm::Sha256);
        assert_eq!(config.hash(), Some(ChecksumAlgorithm::Sha256));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = EngineConfig::new("/src", "/dst", "ledger.db").with_batch_size(0);
        assert!(matches!(zero.validate(), Err(EngineError::InvalidConfig(_))));

        let same = EngineConfig::new("/data", "/data", "ledger.db");
        assert!(matches!(same.validate(), Err(EngineError::InvalidConfig(_))));

        let blank = EngineConfig::new("", "/dst", "ledger.db");
        assert!(blank.validate().is_err());

        let bad_glob = EngineConfig::new("/src", "/dst", "ledger.db").with_include_patterns(["[a-"]);
        assert!(matches!(bad_glob.validate(), Err(EngineError::InvalidPattern { .. })));
    }

    #[test]
    fn test_validate_compares_resolved_paths() {
        let same = EngineConfig::new("media/in", "./media/in", "ledger.db");
        assert!(matches!(same.validate(), Err(EngineError::InvalidConfig(_))));

        let nested = EngineConfig::new("/media", "/media/processing", "ledger.db");
        assert!(matches!(nested.validate(), Err(EngineError::InvalidConfig(_))));
        assert!(nested.with_recursive(false).validate().is_ok());

        let sibling = EngineConfig::new("/media/in", "/media/input", "ledger.db");
        assert!(sibling.validate().is_ok());
    }
}
