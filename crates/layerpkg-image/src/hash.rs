//! SHA-256 content verification.
//!
//! Validates the integrity of layer blobs before they are decoded.

use std::path::Path;

use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::types::Digest;
use sha2::{Digest as _, Sha256};

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Digest> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let io_err = |e| LayerpkgError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let _ = std::io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Digest::sha256(&format!("{:x}", hasher.finalize()))
}

/// Validates that a file matches the expected digest.
///
/// # Errors
///
/// Returns `LayerpkgError::HashMismatch` if the digests differ, or
/// `LayerpkgError::Config` for algorithms other than SHA-256.
pub fn validate_hash(path: &Path, expected: &Digest) -> Result<()> {
    tracing::debug!(path = %path.display(), expected = %expected, "validating SHA-256 hash");
    if expected.algorithm() != "sha256" {
        return Err(LayerpkgError::Config {
            message: format!("unsupported digest algorithm: {}", expected.algorithm()),
        });
    }
    let actual = hash_file(path)?;
    if actual.hex() != expected.hex() {
        return Err(LayerpkgError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
