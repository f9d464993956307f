//! Checksum computation.
//!
//! This module provides:
//! - Multiple digest algorithms (XXH64, SHA-256, BLAKE3, MD5)
//! - A streaming hasher trait so the copy loop can hash while it reads
//! - File-level digest computation for post-copy and integrity verification
//! - The `"<algorithm>:<hex>"` tagged form stored in the ledger

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Read buffer used for hashing and copying.
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    /// XXH64 (fast, non-cryptographic, 64-bit)
    #[default]
    Xxhash,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
    /// MD5 (deprecated, but included for compatibility)
    Md5,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xxhash => write!(f, "xxhash"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
            Self::Md5 => write!(f, "md5"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xxhash" | "xxh64" => Ok(Self::Xxhash),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            "md5" => Ok(Self::Md5),
            other => Err(format!(
                "unknown hash algorithm '{}' (expected xxhash, sha256, blake3 or md5)",
                other
            )),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    /// Create a new checksum value
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    /// Parse the tagged `"algo:hex"` form stored in the ledger.
    pub fn parse_tagged(s: &str) -> Option<Self> {
        let (algo, hex) = s.split_once(':')?;
        let algorithm = algo.parse().ok()?;
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(ChecksumValue::new(algorithm, hex.to_lowercase()))
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Trait for computing checksums incrementally
pub trait ChecksumHasher {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

impl ChecksumHasher for xxhash_rust::xxh64::Xxh64 {
    fn update(&mut self, data: &[u8]) {
        xxhash_rust::xxh64::Xxh64::update(self, data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Xxhash, format!("{:016x}", self.digest()))
    }
}

impl ChecksumHasher for sha2::Sha256 {
    fn update(&mut self, data: &[u8]) {
        sha2::Digest::update(self, data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = sha2::Digest::finalize(*self);
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

impl ChecksumHasher for blake3::Hasher {
    fn update(&mut self, data: &[u8]) {
        blake3::Hasher::update(self, data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let hex = blake3::Hasher::finalize(&self).to_hex();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, hex.to_string())
    }
}

// md5 0.7 exposes `consume`/`compute` rather than `update`/`finalize`.
impl ChecksumHasher for md5::Context {
    fn update(&mut self, data: &[u8]) {
        self.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", (*self).compute()))
    }
}

/// Create a streaming hasher for the given algorithm.
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Xxhash => Box::new(xxhash_rust::xxh64::Xxh64::new(0)),
        ChecksumAlgorithm::Sha256 => Box::new(<sha2::Sha256 as sha2::Digest>::new()),
        ChecksumAlgorithm::Blake3 => Box::new(blake3::Hasher::new()),
        ChecksumAlgorithm::Md5 => Box::new(md5::Context::new()),
    }
}

/// Compute the checksum of a file's current contents.
pub fn compute_file_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<ChecksumValue> {
    let mut file = File::open(path)?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(algorithm: ChecksumAlgorithm, data: &[u8]) -> ChecksumValue {
        let mut hasher = create_hasher(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Xxhash.to_string(), "xxhash");
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
        assert_eq!(ChecksumAlgorithm::Md5.to_string(), "md5");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("xxhash".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Xxhash));
        assert_eq!("XXH64".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Xxhash));
        assert_eq!("sha256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("blake3".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Blake3));
        assert_eq!("md5".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Md5));
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            digest(ChecksumAlgorithm::Sha256, b"hello").hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            digest(ChecksumAlgorithm::Md5, b"hello").hex(),
            "5d41402abc4b2a76b9719d911017c592"
        );
        // XXH64 of the empty input with seed 0
        assert_eq!(digest(ChecksumAlgorithm::Xxhash, b"").hex(), "ef46db3751d8e999");
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        for algorithm in [
            ChecksumAlgorithm::Xxhash,
            ChecksumAlgorithm::Sha256,
            ChecksumAlgorithm::Blake3,
            ChecksumAlgorithm::Md5,
        ] {
            let mut hasher = create_hasher(algorithm);
            hasher.update(b"chunk 1");
            hasher.update(b"chunk 2");
            assert_eq!(hasher.finalize(), digest(algorithm, b"chunk 1chunk 2"));
        }
    }

    #[test]
    fn test_tagged_form() {
        let cs = ChecksumValue::new(ChecksumAlgorithm::Sha256, "abc123".to_string());
        assert_eq!(cs.to_string(), "abc123");
        assert_eq!(cs.to_string_with_algo(), "sha256:abc123");
        assert_eq!(ChecksumValue::parse_tagged("sha256:abc123"), Some(cs));

        assert_eq!(ChecksumValue::parse_tagged("abc123"), None);
        assert_eq!(ChecksumValue::parse_tagged("crc32:abc123"), None);
        assert_eq!(ChecksumValue::parse_tagged("md5:not-hex"), None);
    }

    #[test]
    fn test_compute_file_checksum() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("clip.mp4");
        std::fs::write(&path, b"hello").expect("Failed to write file");

        let cs = compute_file_checksum(&path, ChecksumAlgorithm::Sha256).expect("Failed to hash");
        assert_eq!(cs, digest(ChecksumAlgorithm::Sha256, b"hello"));

        let missing = compute_file_checksum(&temp_dir.path().join("nope"), ChecksumAlgorithm::Md5);
        assert!(missing.is_err());
    }
}
