// src/build/package.rs

//! Artifact packaging and extraction
//!
//! Packaging tars the staging root into `{name}-{version}.tar` with
//! ownership recorded as root:root, then compresses per the configured
//! format and removes the uncompressed tar. Extraction reverses the
//! process, detecting the compression from the file name.

use crate::config::PackageFormat;
use crate::error::{Error, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Tar `staging` and compress it into `artifact_dir/{key}.tar[.ext]`
pub fn package_staging(
    staging: &Path,
    artifact_dir: &Path,
    key: &str,
    format: PackageFormat,
) -> Result<PathBuf> {
    std::fs::create_dir_all(artifact_dir)?;
    let tar_path = artifact_dir.join(format!("{key}.tar"));

    let entries;
    {
        let tar_file = File::create(&tar_path)
            .map_err(|e| Error::PackageFailed(format!("create {}: {}", tar_path.display(), e)))?;
        let mut builder = tar::Builder::new(tar_file);
        builder.follow_symlinks(false);
        entries = append_tree(&mut builder, staging)?;
        builder
            .into_inner()
            .map_err(|e| Error::PackageFailed(format!("finish tar: {e}")))?
            .sync_all()?;
    }
    if entries == 0 {
        warn!("staging {} is empty, packaging an empty artifact", staging.display());
    }

    let artifact = if format == PackageFormat::Tar {
        tar_path.clone()
    } else {
        let compressed = artifact_dir.join(format!("{key}.{}", format.extension()));
        compress_file(&tar_path, &compressed, format)?;
        std::fs::remove_file(&tar_path)?;
        compressed
    };
    info!("packaged {} ({} entries)", artifact.display(), entries);
    Ok(artifact)
}

/// Append every entry under `root` with deterministic root:root headers
fn append_tree(builder: &mut tar::Builder<File>, root: &Path) -> Result<usize> {
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|e| Error::PackageFailed(format!("path outside staging: {e}")))?;
        let metadata = entry
            .path()
            .symlink_metadata()
            .map_err(|e| Error::PackageFailed(format!("stat {}: {}", path.display(), e)))?;

        let mut header = tar::Header::new_gnu();
        // Deterministic mode records uid/gid 0 regardless of the builder's
        // real uid, which is the fake-root ownership contract
        header.set_metadata_in_mode(&metadata, tar::HeaderMode::Deterministic);

        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, rel, &target)
                .map_err(|e| Error::PackageFailed(format!("append link {}: {}", rel.display(), e)))?;
        } else if metadata.is_dir() {
            builder
                .append_data(&mut header, rel, io::empty())
                .map_err(|e| Error::PackageFailed(format!("append dir {}: {}", rel.display(), e)))?;
        } else {
            let file = File::open(path)
                .map_err(|e| Error::PackageFailed(format!("open {}: {}", path.display(), e)))?;
            builder
                .append_data(&mut header, rel, file)
                .map_err(|e| Error::PackageFailed(format!("append {}: {}", rel.display(), e)))?;
        }
        count += 1;
    }
    Ok(count)
}

fn compress_file(src: &Path, dest: &Path, format: PackageFormat) -> Result<()> {
    let mut input = File::open(src)?;
    let output = File::create(dest)
        .map_err(|e| Error::PackageFailed(format!("create {}: {}", dest.display(), e)))?;
    match format {
        PackageFormat::Gzip => {
            let mut encoder = GzEncoder::new(output, Compression::default());
            io::copy(&mut input, &mut encoder)
                .map_err(|e| Error::PackageFailed(format!("gzip: {e}")))?;
            encoder
                .finish()
                .map_err(|e| Error::PackageFailed(format!("gzip finish: {e}")))?;
        }
        PackageFormat::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(output, 6);
            io::copy(&mut input, &mut encoder)
                .map_err(|e| Error::PackageFailed(format!("xz: {e}")))?;
            encoder
                .finish()
                .map_err(|e| Error::PackageFailed(format!("xz finish: {e}")))?;
        }
        PackageFormat::Zstd => {
            let mut encoder = zstd::Encoder::new(output, 0)
                .map_err(|e| Error::PackageFailed(format!("zstd: {e}")))?;
            io::copy(&mut input, &mut encoder)
                .map_err(|e| Error::PackageFailed(format!("zstd: {e}")))?;
            encoder
                .finish()
                .map_err(|e| Error::PackageFailed(format!("zstd finish: {e}")))?;
        }
        PackageFormat::Tar => unreachable!("plain tar is not recompressed"),
    }
    debug!("compressed {} -> {}", src.display(), dest.display());
    Ok(())
}

/// Open an artifact as a tar reader, undoing its compression by extension
fn open_artifact(artifact: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(artifact)
        .map_err(|e| Error::IoError(format!("open {}: {}", artifact.display(), e)))?;
    let name = artifact.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let reader: Box<dyn Read> = if name.ends_with(".tar.gz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else if name.ends_with(".tar.xz") {
        Box::new(xz2::read::XzDecoder::new(file))
    } else if name.ends_with(".tar.zst") {
        Box::new(
            zstd::Decoder::new(file).map_err(|e| Error::IoError(format!("zstd open: {e}")))?,
        )
    } else if name.ends_with(".tar") {
        Box::new(file)
    } else {
        return Err(Error::InvalidInput(format!("unknown artifact format: {name}")));
    };
    Ok(reader)
}

/// Extract an artifact into `dest`, overwriting existing files
pub fn extract_artifact(artifact: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let reader = open_artifact(artifact)?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|e| Error::ExtractFailed(format!("{}: {}", artifact.display(), e)))?;
    info!("expanded {} -> {}", artifact.display(), dest.display());
    Ok(())
}

/// Number of entries in an artifact; an empty artifact is "trivial" for
/// the expand-to-root safety guard.
pub fn artifact_entry_count(artifact: &Path) -> Result<usize> {
    let reader = open_artifact(artifact)?;
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;
    for entry in archive
        .entries()
        .map_err(|e| Error::IoError(format!("read {}: {}", artifact.display(), e)))?
    {
        entry.map_err(|e| Error::IoError(e.to_string()))?;
        count += 1;
    }
    Ok(count)
}

/// Relative paths an artifact contains, for file-set comparisons
pub fn artifact_file_list(artifact: &Path) -> Result<Vec<PathBuf>> {
    let reader = open_artifact(artifact)?;
    let mut archive = tar::Archive::new(reader);
    let mut paths = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| Error::IoError(format!("read {}: {}", artifact.display(), e)))?
    {
        let entry = entry.map_err(|e| Error::IoError(e.to_string()))?;
        paths.push(entry.path().map_err(|e| Error::IoError(e.to_string()))?.into_owned());
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_staging(dir: &Path) -> PathBuf {
        let staging = dir.join("stage/demo-1.0");
        std::fs::create_dir_all(staging.join("usr/bin")).unwrap();
        std::fs::write(staging.join("usr/bin/demo"), b"#!/bin/sh\necho demo\n").unwrap();
        std::fs::create_dir_all(staging.join("usr/share/doc")).unwrap();
        std::fs::write(staging.join("usr/share/doc/README"), b"docs\n").unwrap();
        staging
    }

    #[test]
    fn test_package_extract_roundtrip_preserves_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let staging = seed_staging(dir.path());

        let artifact =
            package_staging(&staging, &dir.path().join("cache"), "demo-1.0", PackageFormat::Gzip)
                .unwrap();
        assert!(artifact.to_str().unwrap().ends_with("demo-1.0.tar.gz"));
        // the uncompressed tar is gone
        assert!(!dir.path().join("cache/demo-1.0.tar").exists());

        let out = dir.path().join("out");
        extract_artifact(&artifact, &out).unwrap();

        let staged: Vec<_> = walkdir::WalkDir::new(&staging)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().strip_prefix(&staging).unwrap().to_path_buf())
            .collect();
        let extracted: Vec<_> = walkdir::WalkDir::new(&out)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().strip_prefix(&out).unwrap().to_path_buf())
            .collect();
        assert_eq!(staged, extracted);
        assert_eq!(
            std::fs::read(out.join("usr/bin/demo")).unwrap(),
            b"#!/bin/sh\necho demo\n"
        );
    }

    #[test]
    fn test_empty_staging_packages_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("stage/empty-0.1");
        std::fs::create_dir_all(&staging).unwrap();

        let artifact =
            package_staging(&staging, &dir.path().join("cache"), "empty-0.1", PackageFormat::Tar)
                .unwrap();
        assert!(artifact.exists());
        assert_eq!(artifact_entry_count(&artifact).unwrap(), 0);
    }

    #[test]
    fn test_plain_tar_format_keeps_tar() {
        let dir = tempfile::tempdir().unwrap();
        let staging = seed_staging(dir.path());
        let artifact =
            package_staging(&staging, &dir.path().join("cache"), "demo-1.0", PackageFormat::Tar)
                .unwrap();
        assert!(artifact.to_str().unwrap().ends_with("demo-1.0.tar"));
    }

    #[test]
    fn test_zstd_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let staging = seed_staging(dir.path());
        let artifact =
            package_staging(&staging, &dir.path().join("cache"), "demo-1.0", PackageFormat::Zstd)
                .unwrap();
        assert!(artifact.to_str().unwrap().ends_with("demo-1.0.tar.zst"));
        let files = artifact_file_list(&artifact).unwrap();
        assert!(files.contains(&PathBuf::from("usr/bin/demo")));
    }

    #[test]
    fn test_symlinks_survive() {
        let dir = tempfile::tempdir().unwrap();
        let staging = seed_staging(dir.path());
        std::os::unix::fs::symlink("demo", staging.join("usr/bin/demo-alias")).unwrap();

        let artifact =
            package_staging(&staging, &dir.path().join("cache"), "demo-1.0", PackageFormat::Gzip)
                .unwrap();
        let out = dir.path().join("out");
        extract_artifact(&artifact, &out).unwrap();
        let link = std::fs::read_link(out.join("usr/bin/demo-alias")).unwrap();
        assert_eq!(link, PathBuf::from("demo"));
    }

    #[test]
    fn test_unknown_artifact_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("x.rar");
        std::fs::write(&bogus, b"").unwrap();
        assert!(extract_artifact(&bogus, &dir.path().join("o")).is_err());
    }
}
