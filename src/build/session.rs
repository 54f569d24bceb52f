// src/build/session.rs

//! Build pipeline stages and resumable session state
//!
//! The builder persists a small state file on entry to every stage and
//! removes it when the whole pipeline succeeds, so `--resume` can re-enter
//! at exactly the stage that was running when the process died.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stages of the build pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStage {
    Download,
    Verify,
    Extract,
    Patch,
    Build,
    Install,
    Merge,
    Strip,
    Package,
    ExpandRoot,
}

impl BuildStage {
    /// All stages in pipeline order
    pub fn all() -> &'static [BuildStage] {
        &[
            Self::Download,
            Self::Verify,
            Self::Extract,
            Self::Patch,
            Self::Build,
            Self::Install,
            Self::Merge,
            Self::Strip,
            Self::Package,
            Self::ExpandRoot,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Verify => "verify",
            Self::Extract => "extract",
            Self::Patch => "patch",
            Self::Build => "build",
            Self::Install => "install",
            Self::Merge => "merge",
            Self::Strip => "strip",
            Self::Package => "package",
            Self::ExpandRoot => "expand-root",
        }
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Persisted per-package resume record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub package: String,
    pub stage: BuildStage,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Handle on one package's session state file
pub struct Session {
    path: PathBuf,
    package: String,
}

impl Session {
    /// `state_dir/{key}.state.json`
    pub fn new(state_dir: &Path, package_key: &str) -> Self {
        Self {
            path: state_dir.join(format!("{package_key}.state.json")),
            package: package_key.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a previously persisted state, if any
    pub fn load(&self) -> Result<Option<SessionState>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let state: SessionState = serde_json::from_str(&content)
                    .map_err(|e| Error::IoError(format!("bad session state: {e}")))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the stage being entered; atomic so a crash mid-write leaves
    /// the previous checkpoint intact.
    pub fn enter(&self, stage: BuildStage) -> Result<()> {
        self.write(SessionState {
            package: self.package.clone(),
            stage,
            timestamp: Utc::now(),
            failure_reason: None,
        })
    }

    /// Record a failure within a stage so a later run can report it
    pub fn fail(&self, stage: BuildStage, reason: &str) -> Result<()> {
        self.write(SessionState {
            package: self.package.clone(),
            stage,
            timestamp: Utc::now(),
            failure_reason: Some(reason.to_string()),
        })
    }

    /// Remove the state on successful completion
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, state: SessionState) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::InvalidInput("session state path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::IoError(format!("session temp file: {e}")))?;
        tmp.write_all(serde_json::to_string_pretty(&state)?.as_bytes())?;
        tmp.persist(&self.path)
            .map_err(|e| Error::IoError(format!("session state rename: {e}")))?;
        debug!("session {} -> {}", self.package, state.stage);
        Ok(())
    }
}
