// src/build/hooks.rs

//! Hook execution
//!
//! Hooks come from two places: the recipe's `hooks:` mapping and global
//! executables under `/etc/porg/hooks/<stage>/` (executable bit decides
//! eligibility). They run with the package identity exported as
//! `PKG_NAME` / `PKG_VERSION` / `PKG_PREFIX`. A non-zero exit is fatal to
//! the current stage unless `force` downgrades it to a warning.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Runs recipe and global hooks for named stages
pub struct HookRunner<'a> {
    recipe: &'a Recipe,
    global_dir: PathBuf,
    /// Extra environment on top of the package identity
    extra_env: Vec<(String, String)>,
    force: bool,
}

impl<'a> HookRunner<'a> {
    pub fn new(recipe: &'a Recipe, global_dir: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            recipe,
            global_dir: global_dir.into(),
            extra_env: Vec::new(),
            force,
        }
    }

    pub fn env_var(mut self, key: &str, value: &str) -> Self {
        self.extra_env.push((key.to_string(), value.to_string()));
        self
    }

    /// Run every hook registered for `stage`, recipe hooks first, then
    /// global ones in name order.
    pub fn run(&self, stage: &str) -> Result<()> {
        for command in self.recipe.hooks_for(stage) {
            self.run_one(stage, command, None)?;
        }
        for script in global_hooks(&self.global_dir, stage) {
            let label = script.display().to_string();
            self.run_one(stage, &label, Some(&script))?;
        }
        Ok(())
    }

    fn run_one(&self, stage: &str, label: &str, script: Option<&Path>) -> Result<()> {
        debug!("hook [{}] {}", stage, label);
        let mut cmd = match script {
            Some(path) => Command::new(path),
            None => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(label);
                c
            }
        };
        cmd.env("PKG_NAME", &self.recipe.name)
            .env("PKG_VERSION", &self.recipe.version)
            .env("PKG_PREFIX", &self.recipe.prefix);
        for (key, value) in &self.extra_env {
            cmd.env(key, value);
        }

        let status = cmd
            .status()
            .map_err(|e| Error::IoError(format!("hook '{label}' failed to start: {e}")))?;
        if status.success() {
            return Ok(());
        }
        let code = status.code().unwrap_or(-1);
        if self.force {
            warn!("hook [{}] '{}' exited {} (forced, continuing)", stage, label, code);
            Ok(())
        } else {
            Err(Error::HookFailed {
                stage: stage.to_string(),
                code,
            })
        }
    }
}

/// Executable files under `<global_dir>/<stage>/`, name-sorted
fn global_hooks(global_dir: &Path, stage: &str) -> Vec<PathBuf> {
    let dir = global_dir.join(stage);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut scripts: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.metadata()
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        })
        .collect();
    scripts.sort();
    if !scripts.is_empty() {
        info!("{} global hook(s) for {}", scripts.len(), stage);
    }
    scripts
}
