// src/source/http.rs

//! Streamed URL downloads into the source cache
//!
//! Files download to `<name>.part` and rename into place on completion, so
//! a crash never leaves a half-written file under the final name. HTTP(S)
//! goes through a shared blocking client with retries; `ftp://` falls back
//! to the system `curl`; `file://` is a plain copy.

use crate::error::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout on each HTTP request
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts per URL before giving up
const MAX_RETRIES: u32 = 3;

/// Delay between attempts
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Streaming copy buffer
const BUFFER_SIZE: usize = 8192;

/// Download `url` to `dest`, atomically via a `.part` sibling.
/// An existing `dest` short-circuits the download.
pub fn fetch_url(url: &str, dest: &Path, quiet: bool) -> Result<()> {
    if dest.exists() {
        debug!("cache hit for {}", dest.display());
        return Ok(());
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let part = dest.with_extension(match dest.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.part"),
        None => "part".to_string(),
    });

    if let Some(path) = url.strip_prefix("file://") {
        std::fs::copy(path, &part)
            .map_err(|e| Error::DownloadError(format!("copy {path}: {e}")))?;
    } else if url.starts_with("ftp://") {
        fetch_with_curl(url, &part)?;
    } else {
        fetch_http(url, &part, quiet)?;
    }

    std::fs::rename(&part, dest)?;
    info!("fetched {} -> {}", url, dest.display());
    Ok(())
}

/// HTTP(S) download with bounded retries
fn fetch_http(url: &str, dest: &Path, quiet: bool) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::DownloadError(format!("HTTP client: {e}")))?;

    let mut last_error = None;
    for attempt in 1..=MAX_RETRIES {
        match try_fetch_http(&client, url, dest, quiet) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("download attempt {}/{} failed: {}", attempt, MAX_RETRIES, e);
                last_error = Some(e);
                let _ = std::fs::remove_file(dest);
                if attempt < MAX_RETRIES {
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::DownloadError(url.to_string())))
}

fn try_fetch_http(
    client: &reqwest::blocking::Client,
    url: &str,
    dest: &Path,
    quiet: bool,
) -> Result<()> {
    let mut response = client
        .get(url)
        .send()
        .map_err(|e| Error::DownloadError(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(Error::DownloadError(format!(
            "{url}: HTTP {}",
            response.status()
        )));
    }

    let total = response.content_length().unwrap_or(0);
    let bar = if quiet || total == 0 {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{msg} {bytes}/{total_bytes} [{bar:30}] {eta}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(
            dest.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("download")
                .to_string(),
        );
        bar
    };

    let mut file = File::create(dest)?;
    let mut buffer = [0u8; BUFFER_SIZE];
    loop {
        let n = response
            .read(&mut buffer)
            .map_err(|e| Error::DownloadError(format!("read {url}: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        bar.inc(n as u64);
    }
    bar.finish_and_clear();
    file.sync_all()?;
    Ok(())
}

/// ftp:// goes through the system curl
fn fetch_with_curl(url: &str, dest: &Path) -> Result<()> {
    let dest_str = dest
        .to_str()
        .ok_or_else(|| Error::InvalidInput(format!("non-UTF-8 path {}", dest.display())))?;
    let output = Command::new("curl")
        .args(["-fsSL", "-o", dest_str, url])
        .output()
        .map_err(|e| Error::DownloadError(format!("curl failed to start: {e}")))?;
    if !output.status.success() {
        return Err(Error::DownloadError(format!(
            "{url}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_copies_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hello-1.0.tar.gz");
        std::fs::write(&src, b"tarball bytes").unwrap();
        let dest = dir.path().join("cache/hello-1.0.tar.gz");

        fetch_url(&format!("file://{}", src.display()), &dest, true).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"tarball bytes");
        // no .part residue
        assert!(!dest.with_extension("gz.part").exists());
    }

    #[test]
    fn test_existing_file_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("already.tar");
        std::fs::write(&dest, b"cached").unwrap();
        // URL is bogus on purpose: the cache hit short-circuits
        fetch_url("file:///nonexistent", &dest, true).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");
    }

    #[test]
    fn test_missing_file_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.tar");
        assert!(fetch_url("file:///definitely/not/here", &dest, true).is_err());
        assert!(!dest.exists());
    }
}
