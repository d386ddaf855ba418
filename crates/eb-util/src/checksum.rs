//! Checksum computation and verification.
//!
//! EasyConfigs declare checksums as plain sha256 hex digests by default, or
//! as an explicit `algo:digest` pair when a different algorithm is wanted
//! (md5 is accepted, but only when asked for explicitly; see
//! `ChecksumAlgorithm::parse`).

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha256,
    Md5,
}

impl ChecksumAlgorithm {
    fn digest_len_hex(self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Md5 => 32,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
        }
    }
}

/// A checksum as declared in an easyconfig: either a bare hex digest
/// (assumed sha256) or an explicit `algo:digest` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumSpec {
    pub algorithm: ChecksumAlgorithm,
    pub digest: String,
}

impl ChecksumSpec {
    pub fn parse(raw: &str) -> Result<ChecksumSpec> {
        if let Some((algo, digest)) = raw.split_once(':') {
            let algorithm = match algo {
                "sha256" => ChecksumAlgorithm::Sha256,
                "md5" => ChecksumAlgorithm::Md5,
                other => anyhow::bail!("unsupported checksum algorithm '{other}'"),
            };
            if digest.len() != algorithm.digest_len_hex() {
                anyhow::bail!(
                    "{algorithm} digest '{digest}' has the wrong length (expected {} hex chars)",
                    algorithm.digest_len_hex()
                );
            }
            Ok(ChecksumSpec { algorithm, digest: digest.to_lowercase() })
        } else {
            if raw.len() != ChecksumAlgorithm::Sha256.digest_len_hex() {
                anyhow::bail!(
                    "checksum '{raw}' is not a 64-character sha256 digest; \
                     prefix with 'md5:' to use md5 explicitly"
                );
            }
            Ok(ChecksumSpec { algorithm: ChecksumAlgorithm::Sha256, digest: raw.to_lowercase() })
        }
    }
}

/// Compute the checksum of a file's contents using the given algorithm.
pub fn compute_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {} for checksumming", path.display()))?;
    let digest = match algorithm {
        ChecksumAlgorithm::Sha256 => hash_with::<Sha256>(&mut file)?,
        ChecksumAlgorithm::Md5 => hash_with::<Md5>(&mut file)?,
    };
    Ok(digest)
}

fn hash_with<D: Digest>(file: &mut File) -> Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io::Error::from)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify that `path`'s contents match `expected`, byte-exact.
pub fn verify_checksum(path: &Path, expected: &ChecksumSpec) -> Result<bool> {
    let actual = compute_checksum(path, expected.algorithm)?;
    Ok(actual.eq_ignore_ascii_case(&expected.digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_bare_sha256() {
        let spec = ChecksumSpec::parse(&"a".repeat(64)).unwrap();
        assert_eq!(spec.algorithm, ChecksumAlgorithm::Sha256);
    }

    #[test]
    fn parses_explicit_md5() {
        let spec = ChecksumSpec::parse(&format!("md5:{}", "a".repeat(32))).unwrap();
        assert_eq!(spec.algorithm, ChecksumAlgorithm::Md5);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(ChecksumSpec::parse("deadbeef").is_err());
    }

    #[test]
    fn verifies_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("toy-0.0.tar.gz");
        let mut f = File::create(&file_path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let digest = compute_checksum(&file_path, ChecksumAlgorithm::Sha256).unwrap();
        let spec = ChecksumSpec { algorithm: ChecksumAlgorithm::Sha256, digest };
        assert!(verify_checksum(&file_path, &spec).unwrap());
    }

    #[test]
    fn detects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("toy-0.0.tar.gz");
        let mut f = File::create(&file_path).unwrap();
        f.write_all(b"hello world").unwrap();
        drop(f);

        let bogus = ChecksumSpec { algorithm: ChecksumAlgorithm::Sha256, digest: "0".repeat(64) };
        assert!(!verify_checksum(&file_path, &bogus).unwrap());
    }
}
