//! Hashing utilities for box checksums.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for ChecksumKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(ChecksumKind::Sha256),
            "sha384" => Ok(ChecksumKind::Sha384),
            "sha512" => Ok(ChecksumKind::Sha512),
            other => bail!(
                "unsupported checksum type `{}`; expected sha256, sha384 or sha512",
                other
            ),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha384 => "sha384",
            ChecksumKind::Sha512 => "sha512",
        };
        f.write_str(s)
    }
}

/// An expected checksum for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub kind: ChecksumKind,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Build a checksum from a type name and a hex value.
    pub fn new(kind: &str, value: &str) -> Result<Self> {
        Ok(Checksum {
            kind: kind.parse()?,
            value: value.trim().to_ascii_lowercase(),
        })
    }

    /// Whether `path` hashes to this checksum. Returns the actual digest on mismatch.
    pub fn verify(&self, path: &Path) -> Result<std::result::Result<(), String>> {
        let actual = file_digest(path, self.kind)?;
        if actual.eq_ignore_ascii_case(&self.value) {
            Ok(Ok(()))
        } else {
            Ok(Err(actual))
        }
    }
}

/// Compute the hex digest of a file with the given algorithm.
pub fn file_digest(path: &Path, kind: ChecksumKind) -> Result<String> {
    match kind {
        ChecksumKind::Sha256 => digest_file::<Sha256>(path),
        ChecksumKind::Sha384 => digest_file::<Sha384>(path),
        ChecksumKind::Sha512 => digest_file::<Sha512>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::new(file);
    let mut hasher = D::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
