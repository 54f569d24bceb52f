// src/source/vcs.rs

//! VCS source acquisition
//!
//! Git-like sources clone shallowly into the cache; a re-run fetches
//! instead. Success means the checkout directory holds a populated tree.

use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Clone or update a repository into `dest`
pub fn fetch_repo(url: &str, dest: &Path) -> Result<()> {
    let url = url.strip_prefix("git+").unwrap_or(url);
    let url = url.strip_prefix("vcs://").unwrap_or(url);

    if dest.join(".git").is_dir() {
        debug!("updating existing checkout {}", dest.display());
        run_git(&["fetch", "--depth", "1", "origin"], Some(dest))?;
        // move the work tree to whatever origin now points at
        run_git(&["reset", "--hard", "FETCH_HEAD"], Some(dest))?;
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dest_str = dest
            .to_str()
            .ok_or_else(|| Error::InvalidInput(format!("non-UTF-8 path {}", dest.display())))?;
        info!("cloning {} -> {}", url, dest.display());
        run_git(&["clone", "--depth", "1", url, dest_str], None)?;
    }

    if !has_populated_tree(dest) {
        return Err(Error::DownloadError(format!(
            "checkout {} is empty after fetch",
            dest.display()
        )));
    }
    Ok(())
}

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    let output = cmd
        .output()
        .map_err(|e| Error::DownloadError(format!("git failed to start: {e}")))?;
    if !output.status.success() {
        return Err(Error::DownloadError(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// A checkout counts as populated when it has any entry besides `.git`
fn has_populated_tree(dest: &Path) -> bool {
    std::fs::read_dir(dest)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name() != ".git")
        })
        .unwrap_or(false)
}
