// src/commands/audit.rs

//! `porg audit` — the full system audit

use super::Context;
use super::resolve::{cmd_resolve, ResolveFlags};
use anyhow::{Context as _, Result};
use porg::audit::Auditor;
use porg::{Resolver, UpgradeScope};

#[derive(Debug, Clone, Default)]
pub struct AuditFlags {
    pub scan: bool,
    pub fix: bool,
    pub clean: bool,
    pub audit: bool,
    pub rebuild_needed: bool,
    pub all: bool,
    pub json: bool,
    pub dry_run: bool,
    pub quiet: bool,
}

pub fn cmd_audit(ctx: &Context, flags: &AuditFlags) -> Result<i32> {
    let mut exit = 0;

    if flags.audit || flags.all || (!flags.scan && !flags.fix && !flags.clean && !flags.rebuild_needed)
    {
        ctx.logger.stage("audit: full report");
        let auditor = Auditor::new(&ctx.config, &ctx.db, &ctx.ports);
        let report = auditor.full_report().context("audit scans failed")?;
        let path = auditor.write_report(&report).context("failed to write report")?;

        if flags.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Audit report: {}", path.display());
            println!("  broken libraries : {}", report.broken_libs.len());
            println!("  broken symlinks  : {}", report.broken_symlinks.len());
            println!("  orphan packages  : {}", report.orphans.len());
            println!("  libtool .la files: {}", report.pkgconf_la.len());
            println!("  python orphans   : {}", report.python_orphans.len());
            let stats = ctx.db.stats().context("db stats failed")?;
            println!(
                "  installed        : {} package(s), ~{} MiB",
                stats.packages,
                stats.approx_bytes / (1024 * 1024)
            );
        }
        let issues = ctx.db.verify().context("db verify failed")?;
        for issue in &issues {
            println!("  db: {}: {}", issue.key, issue.problem);
        }
        if report.has_findings() || !issues.is_empty() {
            exit = 1;
        }
    }

    if flags.rebuild_needed {
        let resolver = Resolver::new(&ctx.ports, &ctx.db);
        let plan = resolver
            .upgrade_plan(UpgradeScope::World)
            .context("rebuild analysis failed")?;
        if plan.needs_rebuild.is_empty() {
            println!("No rebuilds needed.");
        } else {
            println!("Needs rebuild: {}", plan.needs_rebuild.join(" "));
            exit = 1;
        }
    }

    if flags.scan || flags.fix || flags.clean {
        let sub = cmd_resolve(
            ctx,
            &ResolveFlags {
                scan: flags.scan || flags.fix,
                fix: flags.fix,
                clean: flags.clean,
                json: flags.json,
                dry_run: flags.dry_run,
                quiet: flags.quiet,
                ..Default::default()
            },
        )?;
        exit = exit.max(sub);
    }

    Ok(exit)
}
