// src/audit/elf.rs

//! ELF inspection for the revdep scan
//!
//! Candidate files are identified by ELF magic, their declared `DT_NEEDED`
//! entries come from goblin, and actual resolution is delegated to `ldd`,
//! whose "not found" lines name the libraries the dynamic loader cannot
//! satisfy.

use crate::error::{Error, Result};
use goblin::elf::Elf;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// `DT_NEEDED` sonames declared by an ELF file
pub fn elf_needed(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::IoError(format!("read {}: {}", path.display(), e)))?;
    let elf = Elf::parse(&bytes)
        .map_err(|e| Error::InvalidInput(format!("{} is not ELF: {}", path.display(), e)))?;
    Ok(elf.libraries.iter().map(|s| s.to_string()).collect())
}

/// Libraries `ldd` reports as "not found" for a binary. An empty result
/// means the binary resolves fully (or is static).
pub fn unresolved_libs(path: &Path) -> Vec<String> {
    let output = match Command::new("ldd").arg(path).output() {
        Ok(o) => o,
        Err(e) => {
            debug!("ldd unavailable for {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    // ldd exits non-zero for static binaries; only its output matters
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .filter(|line| line.contains("not found"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::is_elf;

    #[test]
    fn test_elf_needed_on_host_binary() {
        let sh = Path::new("/bin/sh");
        if !sh.exists() || !is_elf(sh) {
            return;
        }
        let needed = elf_needed(sh).unwrap();
        // any dynamically linked shell needs libc
        assert!(needed.iter().any(|l| l.contains("libc")) || needed.is_empty());
    }

    #[test]
    fn test_elf_needed_rejects_non_elf() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("plain.txt");
        std::fs::write(&text, b"not an elf").unwrap();
        assert!(elf_needed(&text).is_err());
    }

    #[test]
    fn test_unresolved_on_healthy_binary() {
        let sh = Path::new("/bin/sh");
        if !sh.exists() {
            return;
        }
        assert!(unresolved_libs(sh).is_empty());
    }
}
