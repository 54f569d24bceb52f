// src/commands/bootstrap.rs

//! `porg bootstrap <action>`

use super::Context;
use anyhow::{Context as _, Result};
use porg::bootstrap::{BootstrapOrchestrator, PhaseStatus};
use std::path::PathBuf;
use std::process::Command;

/// Default manifest location
const DEFAULT_MANIFEST: &str = "/etc/porg/bootstrap.manifest";

#[derive(Debug, Clone)]
pub enum BootstrapAction {
    Prepare,
    List,
    Verify,
    Rebuild(String),
    Build { dry: bool },
    Resume,
    Enter,
    Iso,
    Clean,
    Full,
}

pub fn cmd_bootstrap(
    ctx: &Context,
    action: BootstrapAction,
    manifest: Option<PathBuf>,
) -> Result<i32> {
    let manifest = manifest.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST));
    let orchestrator = BootstrapOrchestrator::new(&ctx.config, &ctx.db, &ctx.ports);

    match action {
        BootstrapAction::Prepare => {
            orchestrator.prepare().context("bootstrap prepare failed")?;
            println!("Prepared {}", ctx.config.lfs_root.display());
            Ok(0)
        }
        BootstrapAction::List => {
            for phase in orchestrator.read_manifest(&manifest)? {
                println!("{phase}");
            }
            Ok(0)
        }
        BootstrapAction::Verify => {
            let mut failing = false;
            for state in orchestrator.verify(&manifest)? {
                let status = match state.status {
                    PhaseStatus::Pending => "pending",
                    PhaseStatus::Building => "building",
                    PhaseStatus::Success => "success",
                    PhaseStatus::Failed => "FAILED",
                };
                if state.status == PhaseStatus::Failed {
                    failing = true;
                }
                if state.extra.is_empty() {
                    println!("{:<24} {status}", state.name);
                } else {
                    println!("{:<24} {status} ({})", state.name, state.extra);
                }
            }
            Ok(if failing { 1 } else { 0 })
        }
        BootstrapAction::Rebuild(phase) => {
            ctx.logger.stage(&format!("bootstrap: rebuild {phase}"));
            orchestrator
                .rebuild(&manifest, &phase)
                .with_context(|| format!("rebuild of {phase} failed"))?;
            Ok(0)
        }
        BootstrapAction::Build { dry } => {
            ctx.logger.stage("bootstrap: build all phases");
            orchestrator
                .build(&manifest, dry)
                .context("bootstrap build failed")?;
            Ok(0)
        }
        BootstrapAction::Resume => {
            ctx.logger.stage("bootstrap: resume");
            orchestrator.resume(&manifest).context("bootstrap resume failed")?;
            Ok(0)
        }
        BootstrapAction::Enter => {
            // hand the terminal to a shell chrooted into the bootstrap root
            let status = Command::new("chroot")
                .arg(&ctx.config.lfs_root)
                .arg("/bin/sh")
                .env("LFS", &ctx.config.lfs_root)
                .env("LFS_TGT", &ctx.config.lfs_target)
                .env("USER", &ctx.config.lfs_user)
                .status()
                .context("failed to chroot into the bootstrap root")?;
            Ok(status.code().unwrap_or(2))
        }
        BootstrapAction::Iso => {
            // image generation is an external collaborator
            println!(
                "ISO generation is delegated to an external tool; point it at {}",
                ctx.config.lfs_root.display()
            );
            Ok(0)
        }
        BootstrapAction::Clean => {
            orchestrator.clean().context("bootstrap clean failed")?;
            println!("Bootstrap state cleared.");
            Ok(0)
        }
        BootstrapAction::Full => {
            orchestrator.prepare().context("bootstrap prepare failed")?;
            ctx.logger.stage("bootstrap: full run");
            orchestrator
                .build(&manifest, false)
                .context("bootstrap build failed")?;
            Ok(0)
        }
    }
}
