// src/commands/upgrade.rs

//! `porg upgrade [--pkg P | --world]`

use super::Context;
use anyhow::{Context as _, Result};
use porg::audit::Auditor;
use porg::remove::{RemoveOptions, Remover};
use porg::upgrade::{UpgradeOptions, UpgradeOrchestrator};
use porg::UpgradeScope;

#[derive(Debug, Clone, Default)]
pub struct UpgradeFlags {
    pub package: Option<String>,
    pub world: bool,
    pub check: bool,
    pub sync: bool,
    pub resume: bool,
    pub revdep: bool,
    pub clean: bool,
    pub parallel: usize,
    pub dry_run: bool,
    pub quiet: bool,
}

pub fn cmd_upgrade(ctx: &Context, flags: &UpgradeFlags) -> Result<i32> {
    if flags.sync {
        super::cmd_sync(ctx)?;
    }

    let scope = match (&flags.package, flags.world) {
        (Some(package), _) => UpgradeScope::Single(package.clone()),
        _ => UpgradeScope::World,
    };

    let orchestrator = UpgradeOrchestrator::new(&ctx.config, &ctx.db, &ctx.ports);

    if flags.check {
        let plan = orchestrator.plan(scope).context("failed to plan upgrade")?;
        if plan.needs_rebuild.is_empty() {
            println!("Everything is up to date.");
            return Ok(0);
        }
        println!("Needs rebuild: {}", plan.needs_rebuild.join(" "));
        println!("Upgrade order: {}", plan.upgrade_order.join(" "));
        return Ok(1);
    }

    ctx.logger.stage("upgrade: executing plan");
    let summary = orchestrator
        .execute(
            scope,
            &UpgradeOptions {
                resume: flags.resume,
                dry_run: flags.dry_run,
                quiet: flags.quiet,
                parallel: flags.parallel,
            },
        )
        .context("upgrade run failed")?;

    for package in &summary.upgraded {
        println!("Upgraded {package}");
    }
    if flags.dry_run && !summary.skipped.is_empty() {
        println!("Would upgrade: {}", summary.skipped.join(" "));
    }

    let mut exit = 0;

    if flags.revdep {
        ctx.logger.stage("upgrade: post-upgrade revdep scan");
        let auditor = Auditor::new(&ctx.config, &ctx.db, &ctx.ports);
        let broken = auditor.revdep_scan().context("revdep scan failed")?;
        for b in &broken {
            println!("Broken after upgrade: {} ({})", b.pkg, b.file);
        }
        if !broken.is_empty() {
            exit = 1;
        }
    }

    if flags.clean {
        ctx.logger.stage("upgrade: cleaning orphans");
        let auditor = Auditor::new(&ctx.config, &ctx.db, &ctx.ports);
        let remover = Remover::new(&ctx.config, &ctx.db, &ctx.ports);
        for orphan in auditor.depclean_scan().context("depclean scan failed")? {
            let options = RemoveOptions {
                force: true,
                dry_run: flags.dry_run,
                ..Default::default()
            };
            match remover.remove(&orphan.pkg, options) {
                Ok(_) => println!("Cleaned orphan {}", orphan.pkg),
                Err(e) => {
                    ctx.logger
                        .warn(&format!("failed to clean orphan {}: {e}", orphan.pkg));
                    exit = 3;
                }
            }
        }
    }

    Ok(exit)
}
