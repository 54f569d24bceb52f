// src/source/verify.rs

//! Source verification: SHA-256 checksums and detached signatures

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Compute the SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("failed to open {}: {}", path.display(), e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::IoError(format!("failed to read {}: {}", path.display(), e)))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify a file against an expected checksum. Accepts a bare hex digest
/// or the `sha256:<hex>` form.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let expected = expected.strip_prefix("sha256:").unwrap_or(expected).trim();
    debug!("verifying checksum of {}", path.display());
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    debug!("checksum ok: {}", expected);
    Ok(())
}

/// Verify a detached signature with the system `gpgv` against the
/// configured keyring.
pub fn verify_signature(file: &Path, signature: &Path, keyring: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("gpgv");
    if let Some(keyring) = keyring {
        cmd.arg("--keyring").arg(keyring);
    }
    cmd.arg(signature).arg(file);

    let output = cmd
        .output()
        .map_err(|e| Error::IoError(format!("failed to run gpgv: {e}")))?;
    if !output.status.success() {
        return Err(Error::SignatureInvalid(format!(
            "{}: {}",
            file.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    info!("signature verified for {}", file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_verify_checksum_accepts_prefixed_form() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        verify_checksum(
            &path,
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        )
        .unwrap();
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let err = verify_checksum(&path, "deadbeef").unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }
}
