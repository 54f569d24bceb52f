// src/sync.rs

//! Ports tree synchronization
//!
//! `porg sync` is the one operation allowed to mutate the ports tree:
//! a clone when the tree is absent, a fetch+reset onto the configured
//! branch when it already is a checkout.

use crate::config::Config;
use crate::error::{Error, Result};
use std::path::Path;
use std::process::Command;
use tracing::info;

/// Clone or update the ports tree per `GIT_REPO` / `GIT_BRANCH`
pub fn sync_ports(config: &Config) -> Result<()> {
    let repo = config
        .git_repo
        .as_deref()
        .ok_or_else(|| Error::InvalidInput("GIT_REPO is not configured".to_string()))?;
    let ports = &config.ports_dir;

    if ports.join(".git").is_dir() {
        info!("updating ports tree {}", ports.display());
        run_git(&["fetch", "origin", &config.git_branch], Some(ports))?;
        run_git(
            &["reset", "--hard", &format!("origin/{}", config.git_branch)],
            Some(ports),
        )?;
    } else {
        if ports.exists() && std::fs::read_dir(ports)?.next().is_some() {
            return Err(Error::InvalidInput(format!(
                "{} exists and is not a git checkout",
                ports.display()
            )));
        }
        if let Some(parent) = ports.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dest = ports
            .to_str()
            .ok_or_else(|| Error::InvalidInput(format!("non-UTF-8 path {}", ports.display())))?;
        info!("cloning ports tree from {}", repo);
        run_git(
            &["clone", "--branch", &config.git_branch, repo, dest],
            None,
        )?;
    }
    info!("ports tree in sync with {}", config.git_branch);
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
        .map_err(|e| Error::IoError(format!("git failed to start: {e}")))?;
    if !output.status.success() {
        return Err(Error::DownloadError(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_without_repo_configured() {
        let config = Config::default();
        assert!(matches!(sync_ports(&config), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_sync_refuses_non_checkout_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ports = dir.path().join("ports");
        std::fs::create_dir_all(&ports).unwrap();
        std::fs::write(ports.join("stray"), b"x").unwrap();
        let config = Config {
            ports_dir: ports,
            git_repo: Some("https://example.org/ports.git".into()),
            ..Config::default()
        };
        assert!(matches!(sync_ports(&config), Err(Error::InvalidInput(_))));
    }
}
