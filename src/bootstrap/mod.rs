// src/bootstrap/mod.rs

//! Bootstrap orchestration
//!
//! A bootstrap manifest lists phase names in build order, one per line
//! (`#` comments allowed); each phase names a recipe whose `stage` field
//! redirects staging into the bootstrap root. Every phase writes a state
//! file (`building`, then `success` or `failed`) so `resume` starts at the
//! first non-success phase. Phases are inherently ordered, so execution is
//! serial; a process-wide flock keeps two bootstrap runs from overlapping.

use crate::build::{BuildOptions, Builder};
use crate::config::Config;
use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::recipe::PortsTree;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Phase progress as persisted on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Building,
    Success,
    Failed,
}

/// Per-phase state file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub name: String,
    pub status: PhaseStatus,
    /// Free-form detail: log path on success, error text on failure
    #[serde(default)]
    pub extra: String,
    pub ts: DateTime<Utc>,
}

/// RAII flock preventing concurrent bootstrap runs
pub struct BootstrapLock {
    file: File,
}

impl BootstrapLock {
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join("bootstrap.lock");
        let file = File::create(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::DbLocked(path.clone())
        })?;
        info!("acquired bootstrap lock {}", path.display());
        Ok(Self { file })
    }
}

impl Drop for BootstrapLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Serial, resumable phase runner
pub struct BootstrapOrchestrator<'a> {
    config: &'a Config,
    db: &'a InstalledDb,
    ports: &'a PortsTree,
}

impl<'a> BootstrapOrchestrator<'a> {
    pub fn new(config: &'a Config, db: &'a InstalledDb, ports: &'a PortsTree) -> Self {
        Self { config, db, ports }
    }

    /// Directory holding per-phase state files and the lock
    pub fn state_dir(&self) -> PathBuf {
        self.config.workdir.join("bootstrap")
    }

    /// Parse the manifest: ordered phase names, `#` comments and blank
    /// lines skipped.
    pub fn read_manifest(&self, manifest: &Path) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(manifest).map_err(|e| {
            Error::NotFound(format!("bootstrap manifest {}: {}", manifest.display(), e))
        })?;
        let phases: Vec<String> = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if phases.is_empty() {
            return Err(Error::InvalidInput(format!(
                "manifest {} lists no phases",
                manifest.display()
            )));
        }
        Ok(phases)
    }

    /// Create the bootstrap root skeleton and the state directory
    pub fn prepare(&self) -> Result<()> {
        for dir in ["", "sources", "tools", "porg-stage"] {
            std::fs::create_dir_all(self.config.lfs_root.join(dir))?;
        }
        std::fs::create_dir_all(self.state_dir())?;
        info!("prepared bootstrap root {}", self.config.lfs_root.display());
        Ok(())
    }

    /// State of one phase; missing file means pending
    pub fn phase_state(&self, phase: &str) -> Result<PhaseState> {
        let path = self.phase_state_path(phase);
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::IoError(format!("bad phase state {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PhaseState {
                name: phase.to_string(),
                status: PhaseStatus::Pending,
                extra: String::new(),
                ts: Utc::now(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Status of every phase in manifest order
    pub fn verify(&self, manifest: &Path) -> Result<Vec<PhaseState>> {
        self.read_manifest(manifest)?
            .iter()
            .map(|phase| self.phase_state(phase))
            .collect()
    }

    /// Build all phases from the start
    pub fn build(&self, manifest: &Path, dry_run: bool) -> Result<()> {
        self.run_phases(manifest, dry_run, false, None)
    }

    /// Build from the first non-success phase
    pub fn resume(&self, manifest: &Path) -> Result<()> {
        self.run_phases(manifest, false, true, None)
    }

    /// Re-run one phase unconditionally
    pub fn rebuild(&self, manifest: &Path, phase: &str) -> Result<()> {
        let phases = self.read_manifest(manifest)?;
        if !phases.iter().any(|p| p == phase) {
            return Err(Error::NotFound(format!("phase {phase} not in manifest")));
        }
        self.run_phases(manifest, false, false, Some(phase))
    }

    /// Remove all phase state (keeps the bootstrap root)
    pub fn clean(&self) -> Result<()> {
        let state_dir = self.state_dir();
        if state_dir.exists() {
            std::fs::remove_dir_all(&state_dir)?;
        }
        info!("cleared bootstrap state");
        Ok(())
    }

    fn run_phases(
        &self,
        manifest: &Path,
        dry_run: bool,
        resume: bool,
        only: Option<&str>,
    ) -> Result<()> {
        let _lock = BootstrapLock::acquire(&self.state_dir())?;
        let phases = self.read_manifest(manifest)?;

        for phase in &phases {
            if let Some(only) = only {
                if phase != only {
                    continue;
                }
            } else if resume && self.phase_state(phase)?.status == PhaseStatus::Success {
                info!("phase {} already succeeded, skipping", phase);
                continue;
            }
            if dry_run {
                info!("dry-run: would build phase {}", phase);
                continue;
            }
            self.run_one_phase(phase)?;
        }
        Ok(())
    }

    fn run_one_phase(&self, phase: &str) -> Result<()> {
        info!("bootstrap phase {} starting", phase);
        self.write_phase_state(phase, PhaseStatus::Building, "")?;

        let recipe = self.ports.find(phase)?;
        if !recipe.stage.uses_bootstrap_root() {
            warn!(
                "phase {} recipe has stage=normal; staging will not redirect",
                phase
            );
        }
        let builder = Builder::new(self.config, self.db, BuildOptions::default());
        match builder.build(&recipe) {
            Ok(outcome) => {
                self.write_phase_state(
                    phase,
                    PhaseStatus::Success,
                    &outcome.artifact.display().to_string(),
                )?;
                info!("bootstrap phase {} succeeded", phase);
                Ok(())
            }
            Err(e) => {
                self.write_phase_state(phase, PhaseStatus::Failed, &e.to_string())?;
                Err(e)
            }
        }
    }

    fn phase_state_path(&self, phase: &str) -> PathBuf {
        self.state_dir().join(format!("{phase}.json"))
    }

    fn write_phase_state(&self, phase: &str, status: PhaseStatus, extra: &str) -> Result<()> {
        std::fs::create_dir_all(self.state_dir())?;
        let state = PhaseState {
            name: phase.to_string(),
            status,
            extra: extra.to_string(),
            ts: Utc::now(),
        };
        std::fs::write(
            self.phase_state_path(phase),
            serde_json::to_string_pretty(&state)?,
        )?;
        Ok(())
    }
}
