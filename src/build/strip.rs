// src/build/strip.rs

//! Strip pass over the staging root
//!
//! Walks the staged tree, identifies regular files that are ELF images by
//! magic bytes, and runs `strip --strip-unneeded` on each in place.
//! Non-ELF files are untouched, so the pass is idempotent: a second run
//! finds nothing left to remove.

use crate::error::Result;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Check a file's magic bytes for the ELF signature
pub fn is_elf(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return false;
    }
    magic[..] == goblin::elf::header::ELFMAG[..]
}

/// Strip every ELF file under `staging`; returns how many were stripped
pub fn strip_tree(staging: &Path) -> Result<usize> {
    let mut stripped = 0;
    for entry in walkdir::WalkDir::new(staging)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_elf(path) {
            continue;
        }
        match Command::new("strip").arg("--strip-unneeded").arg(path).output() {
            Ok(output) if output.status.success() => {
                debug!("stripped {}", path.display());
                stripped += 1;
            }
            Ok(output) => {
                // static archives and odd ELF flavors legitimately refuse
                warn!(
                    "strip skipped {}: {}",
                    path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => {
                warn!("strip unavailable for {}: {}", path.display(), e);
            }
        }
    }
    Ok(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_elf_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("script.sh");
        std::fs::write(&text, b"#!/bin/sh\necho hi\n").unwrap();
        assert!(!is_elf(&text));

        let before = std::fs::read(&text).unwrap();
        strip_tree(dir.path()).unwrap();
        assert_eq!(std::fs::read(&text).unwrap(), before);
    }

    #[test]
    fn test_elf_magic_detected() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake.so");
        std::fs::write(&fake, b"\x7fELF rest does not matter").unwrap();
        assert!(is_elf(&fake));
    }

    #[test]
    fn test_short_file_not_elf() {
        let dir = tempfile::tempdir().unwrap();
        let tiny = dir.path().join("tiny");
        std::fs::write(&tiny, b"\x7fE").unwrap();
        assert!(!is_elf(&tiny));
    }

    #[test]
    fn test_strip_tree_on_host_binary_is_idempotent() {
        // copy a real host binary and strip it twice; the second pass must
        // leave it byte-identical
        let host_bin = Path::new("/bin/true");
        if !host_bin.exists() || !is_elf(host_bin) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let copy = dir.path().join("true");
        std::fs::copy(host_bin, &copy).unwrap();

        strip_tree(dir.path()).unwrap();
        let first = std::fs::read(&copy).unwrap();
        strip_tree(dir.path()).unwrap();
        let second = std::fs::read(&copy).unwrap();
        assert_eq!(first, second);
    }
}
