//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Staging a copy next to its final path (hashing while reading)
//! - Verifying the staged bytes
//! - Publishing a staged copy with a rename
//! - Finding and removing staging artifacts left by interrupted runs

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::checksums::{compute_file_checksum, create_hasher, ChecksumAlgorithm, ChecksumValue, BUFFER_SIZE};
use crate::error::TransferError;

/// Suffix of in-flight copies in the target directory.
pub const STAGING_SUFFIX: &str = ".fpt-staging";

/// Hidden staging path for `filename` inside `target_dir`.
///
/// The leading dot and the suffix keep the partial file from ever looking
/// like a finished one to the downstream consumer or to `find_orphans`.
pub fn staging_path_for(target_dir: &Path, filename: &str) -> PathBuf {
    target_dir.join(format!(".{}{}", filename, STAGING_SUFFIX))
}

/// True for names produced by `staging_path_for`.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(STAGING_SUFFIX) && name.len() > STAGING_SUFFIX.len() + 1
}

/// A fully written, synced copy that has not been published yet.
#[derive(Debug)]
pub struct StagedCopy {
    pub staging_path: PathBuf,

    /// Bytes written
    pub bytes: u64,

    /// Digest of the source stream as it was read, when hashing
    pub source_digest: Option<ChecksumValue>,
}

/// Copy `src` to `staging`, hashing the source stream if asked.
///
/// The staging path must not exist yet; a leftover entry (a symlink
/// included) is never written through. The staged file is synced to disk
/// before returning and carries the source modification time. A size change
/// during the copy is reported as `SourceChanged`. On error the caller
/// removes whatever was staged.
pub fn stage_copy(
    src: &Path,
    staging: &Path,
    algorithm: Option<ChecksumAlgorithm>,
) -> Result<StagedCopy, TransferError> {
    let read_err = |e: io::Error| TransferError::Read {
        path: src.to_path_buf(),
        source: e,
    };
    let write_err = |e: io::Error| TransferError::Write {
        path: staging.to_path_buf(),
        source: e,
    };

    let mut src_file = fs::File::open(src).map_err(read_err)?;
    let src_metadata = src_file.metadata().map_err(read_err)?;
    let expected = src_metadata.len();
    let src_mtime = src_metadata.modified().ok();

    let mut dst_file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .map_err(write_err)?;

    let mut hasher = algorithm.map(create_hasher);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes = 0u64;

    loop {
        let n = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_err(e)),
        };
        if let Some(h) = hasher.as_mut() {
            h.update(&buffer[..n]);
        }
        dst_file.write_all(&buffer[..n]).map_err(write_err)?;
        bytes += n as u64;
    }

    dst_file.flush().map_err(write_err)?;
    dst_file.sync_all().map_err(write_err)?;
    drop(dst_file);

    if bytes != expected {
        return Err(TransferError::SourceChanged {
            expected,
            actual: bytes,
        });
    }

    if let Some(mtime) = src_mtime {
        if let Err(e) = filetime::set_file_mtime(staging, filetime::FileTime::from_system_time(mtime)) {
            warn!(path = %staging.display(), error = %e, "Could not preserve modification time");
        }
    }

    Ok(StagedCopy {
        staging_path: staging.to_path_buf(),
        bytes,
        source_digest: hasher.map(|h| h.finalize()),
    })
}

/// Re-read the staged bytes and compare with the source stream digest.
///
/// Returns the digest of the copy, which is what gets recorded.
pub fn verify_staged(staged: &StagedCopy) -> Result<Option<ChecksumValue>, TransferError> {
    let Some(expected) = &staged.source_digest else {
        return Ok(None);
    };

    let actual = compute_file_checksum(&staged.staging_path, expected.algorithm()).map_err(|e| {
        TransferError::Read {
            path: staged.staging_path.clone(),
            source: e,
        }
    })?;

    if actual.hex() != expected.hex() {
        return Err(TransferError::HashMismatch {
            expected: expected.to_string_with_algo(),
            actual: actual.to_string_with_algo(),
        });
    }
    Ok(Some(actual))
}

/// Move a staged copy to its final name.
///
/// Refuses to replace an existing file.
pub fn publish(staging: &Path, target: &Path) -> io::Result<()> {
    if fs::symlink_metadata(target).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        ));
    }
    fs::rename(staging, target)
}

/// Best-effort removal of a staged or published file.
pub fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

/// Ensure `path` exists and is a directory, creating it if necessary.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Path exists but is not a directory",
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(path),
        Err(e) => Err(e),
    }
}

/// Staging entries sitting directly in `dir`, sorted by name.
///
/// Symbolic links carrying a staging name are included so cleanup removes
/// the link itself; directories are left alone.
pub fn list_staging_artifacts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let is_staging = entry.file_name().to_str().is_some_and(is_staging_name);
        if !is_staging {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_file() || file_type.is_symlink() {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_names() {
        let path = staging_path_for(Path::new("/target"), "clip.mp4");
        assert_eq!(path, PathBuf::from("/target/.clip.mp4.fpt-staging"));
        assert!(is_staging_name(".clip.mp4.fpt-staging"));
        assert!(!is_staging_name("clip.mp4"));
        assert!(!is_staging_name(".fpt-staging"));
    }

    #[test]
    fn test_stage_copy_and_publish() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.mp4");
        fs::write(&src, b"test content").expect("Failed to write source");

        let staging = staging_path_for(temp_dir.path(), "dest.mp4");
        let staged = stage_copy(&src, &staging, None).expect("Failed to stage");
        assert_eq!(staged.bytes, 12);
        assert!(staged.source_digest.is_none());
        assert_eq!(verify_staged(&staged).unwrap(), None);

        let target = temp_dir.path().join("dest.mp4");
        publish(&staging, &target).expect("Failed to publish");
        assert!(!staging.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "test content");
    }

    #[test]
    fn test_stage_copy_preserves_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.mp4");
        fs::write(&src, b"abc").unwrap();
        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        let staging = temp_dir.path().join(".source.mp4.fpt-staging");
        stage_copy(&src, &staging, None).unwrap();

        let meta = fs::metadata(&staging).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_verify_detects_corrupted_staging() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.mp4");
        fs::write(&src, b"original bytes").unwrap();

        let staging = temp_dir.path().join(".x.fpt-staging");
        let staged = stage_copy(&src, &staging, Some(ChecksumAlgorithm::Blake3)).unwrap();
        assert!(verify_staged(&staged).unwrap().is_some());

        fs::write(&staging, b"flipped bytes!").unwrap();
        let err = verify_staged(&staged).unwrap_err();
        assert!(matches!(err, TransferError::HashMismatch { .. }));
    }

    #[test]
    fn test_stage_copy_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = stage_copy(
            &temp_dir.path().join("missing.mp4"),
            &temp_dir.path().join(".missing.mp4.fpt-staging"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Read { .. }));
    }

    #[test]
    fn test_stage_copy_never_reuses_existing_staging() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.mp4");
        fs::write(&src, b"fresh").unwrap();
        let staging = temp_dir.path().join(".source.mp4.fpt-staging");
        fs::write(&staging, b"left over").unwrap();

        let err = stage_copy(&src, &staging, None).unwrap_err();
        assert!(matches!(err, TransferError::Write { ref source, .. } if source.kind() == io::ErrorKind::AlreadyExists));
        assert_eq!(fs::read(&staging).unwrap(), b"left over");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_staging_is_listed_and_not_followed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let elsewhere = temp_dir.path().join("elsewhere.bin");
        fs::write(&elsewhere, b"keep me").unwrap();
        let dst = temp_dir.path().join("dst");
        fs::create_dir(&dst).unwrap();
        let link = staging_path_for(&dst, "clip.mp4");
        std::os::unix::fs::symlink(&elsewhere, &link).unwrap();

        let src = temp_dir.path().join("clip.mp4");
        fs::write(&src, b"new bytes").unwrap();
        assert!(stage_copy(&src, &link, None).is_err());
        assert_eq!(fs::read(&elsewhere).unwrap(), b"keep me");

        assert_eq!(list_staging_artifacts(&dst).unwrap(), vec![link.clone()]);
        remove_quietly(&link);
        assert!(fs::symlink_metadata(&link).is_err());
        assert_eq!(fs::read(&elsewhere).unwrap(), b"keep me");
    }

    #[test]
    fn test_publish_refuses_to_overwrite() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let staging = temp_dir.path().join(".a.fpt-staging");
        let target = temp_dir.path().join("a");
        fs::write(&staging, b"new").unwrap();
        fs::write(&target, b"old").unwrap();

        let err = publish(&staging, &target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
    }

    #[test]
    fn test_ensure_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("a").join("b");
        ensure_dir(&nested).expect("Failed to create dir");
        assert!(nested.is_dir());

        let file = temp_dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(ensure_dir(&file).is_err());
    }

    #[test]
    fn test_list_staging_artifacts() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join(".b.mp4.fpt-staging"), b"").unwrap();
        fs::write(temp_dir.path().join(".a.mp4.fpt-staging"), b"").unwrap();
        fs::write(temp_dir.path().join("c.mp4"), b"").unwrap();

        let found = list_staging_artifacts(temp_dir.path()).unwrap();
        assert_eq!(
            found,
            vec![
                temp_dir.path().join(".a.mp4.fpt-staging"),
                temp_dir.path().join(".b.mp4.fpt-staging"),
            ]
        );
    }
}
