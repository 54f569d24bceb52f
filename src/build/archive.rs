// src/build/archive.rs

//! Source extraction and patch application
//!
//! Extraction and patching delegate to the system `tar` and `patch`
//! binaries; the surrounding pipeline only cares about the resulting tree.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Extract an archive into `dest`
///
/// Supports `.tar.gz`/`.tgz`, `.tar.xz`/`.txz`, `.tar.bz2`/`.tbz2`,
/// `.tar.zst` and plain `.tar`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let archive_str = path_str(archive)?;
    let dest_str = path_str(dest)?;
    let filename = archive.file_name().and_then(|n| n.to_str()).unwrap_or("");

    let args: Vec<&str> = if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        vec!["-xzf", archive_str, "-C", dest_str]
    } else if filename.ends_with(".tar.xz") || filename.ends_with(".txz") {
        vec!["-xJf", archive_str, "-C", dest_str]
    } else if filename.ends_with(".tar.bz2") || filename.ends_with(".tbz2") {
        vec!["-xjf", archive_str, "-C", dest_str]
    } else if filename.ends_with(".tar.zst") {
        vec!["--zstd", "-xf", archive_str, "-C", dest_str]
    } else if filename.ends_with(".tar") {
        vec!["-xf", archive_str, "-C", dest_str]
    } else {
        return Err(Error::ExtractFailed(format!(
            "unknown archive format: {filename}"
        )));
    };

    let output = Command::new("tar")
        .args(&args)
        .output()
        .map_err(|e| Error::ExtractFailed(format!("tar failed to start: {e}")))?;
    if !output.status.success() {
        return Err(Error::ExtractFailed(format!(
            "{}: {}",
            archive.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    info!("extracted {} -> {}", archive.display(), dest.display());
    Ok(())
}

/// Pick the source root after extraction: the single top-level directory
/// when exactly one exists, else the extract directory itself.
pub fn source_root(extract_dir: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = std::fs::read_dir(extract_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    match entries.as_slice() {
        [single] if single.is_dir() => {
            debug!("source root: {}", single.display());
            Ok(single.clone())
        }
        _ => Ok(extract_dir.to_path_buf()),
    }
}

/// Apply a patch with `-p1` inside `source_dir`
pub fn apply_patch(source_dir: &Path, patch: &Path) -> Result<()> {
    let patch_str = path_str(patch)?;
    let output = Command::new("patch")
        .args(["-p1", "-i", patch_str])
        .current_dir(source_dir)
        .output()
        .map_err(|e| Error::PatchFailed(format!("patch failed to start: {e}")))?;
    if !output.status.success() {
        return Err(Error::PatchFailed(format!(
            "{}: {}",
            patch.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    info!("applied {}", patch.display());
    Ok(())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::InvalidInput(format!("non-UTF-8 path {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_unknown_format_rejected() {
        let err = extract_archive(Path::new("thing.rar"), Path::new("/tmp/x")).unwrap_err();
        assert!(matches!(err, Error::ExtractFailed(_)));
    }

    #[test]
    fn test_extract_and_source_root() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("hello-1.0");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("README"), b"hi").unwrap();
        let tarball = dir.path().join("hello-1.0.tar");
        let status = Command::new("tar")
            .args(["-cf", tarball.to_str().unwrap(), "-C", dir.path().to_str().unwrap(), "hello-1.0"])
            .status()
            .unwrap();
        assert!(status.success());

        let out = dir.path().join("out");
        extract_archive(&tarball, &out).unwrap();
        let root = source_root(&out).unwrap();
        assert!(root.ends_with("hello-1.0"));
        assert!(root.join("README").is_file());
    }

    #[test]
    fn test_source_root_multiple_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        assert_eq!(source_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn test_apply_patch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "old line\n").unwrap();
        let patch = dir.path().join("fix.patch");
        std::fs::write(
            &patch,
            "--- a/file.txt\n+++ b/file.txt\n@@ -1 +1 @@\n-old line\n+new line\n",
        )
        .unwrap();

        apply_patch(dir.path(), &patch).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("file.txt")).unwrap(), "new line\n");
    }

    #[test]
    fn test_failed_patch_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "unrelated content\n").unwrap();
        let patch = dir.path().join("bogus.patch");
        std::fs::write(
            &patch,
            "--- a/file.txt\n+++ b/file.txt\n@@ -1 +1 @@\n-something else\n+y\n",
        )
        .unwrap();
        assert!(matches!(
            apply_patch(dir.path(), &patch),
            Err(Error::PatchFailed(_))
        ));
    }
}
