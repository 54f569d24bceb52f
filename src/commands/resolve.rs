// src/commands/resolve.rs

//! `porg resolve` — revdep/depclean scans and resolver queries

use super::Context;
use anyhow::{Context as _, Result};
use porg::audit::Auditor;
use porg::remove::{RemoveOptions, Remover};
use porg::workpool::WorkPool;
use porg::{BuildOptions, Builder, InstalledDb, Resolver};
use std::sync::mpsc;

#[derive(Debug, Clone, Default)]
pub struct ResolveFlags {
    /// Optional package for order/graph queries
    pub package: Option<String>,
    pub graph: bool,
    pub scan: bool,
    pub fix: bool,
    pub clean: bool,
    pub all: bool,
    pub parallel: usize,
    pub dry_run: bool,
    pub json: bool,
    pub quiet: bool,
}

pub fn cmd_resolve(ctx: &Context, flags: &ResolveFlags) -> Result<i32> {
    // plain resolver queries take priority over the scans
    if let Some(package) = &flags.package {
        let resolver = Resolver::new(&ctx.ports, &ctx.db);
        if flags.graph {
            for (from, to) in resolver
                .graph_edges(package)
                .with_context(|| format!("failed to graph {package}"))?
            {
                println!("{from} -> {to}");
            }
        } else {
            let order = resolver
                .resolve(package)
                .with_context(|| format!("failed to resolve {package}"))?;
            if flags.json {
                let missing = resolver.missing(package)?;
                println!(
                    "{}",
                    serde_json::json!({"package": package, "order": order, "missing": missing})
                );
            } else {
                println!("{}", order.join("\n"));
            }
        }
        return Ok(0);
    }

    // bare `porg resolve` lists every recipe the ports tree provides
    if !flags.scan && !flags.fix && !flags.clean && !flags.all {
        for name in ctx.ports.all_names() {
            println!("{name}");
        }
        return Ok(0);
    }

    let auditor = Auditor::new(&ctx.config, &ctx.db, &ctx.ports);
    let mut exit = 0;

    let broken = if flags.scan || flags.fix || flags.all {
        ctx.logger.stage("resolve: revdep scan");
        auditor.revdep_scan().context("revdep scan failed")?
    } else {
        Vec::new()
    };
    let orphans = if flags.clean || flags.all {
        ctx.logger.stage("resolve: depclean scan");
        auditor.depclean_scan().context("depclean scan failed")?
    } else {
        Vec::new()
    };

    if flags.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "broken_libs": broken,
                "orphans": orphans,
            }))?
        );
    } else {
        for b in &broken {
            println!("broken: {} {} ({})", b.pkg, b.file, b.ldd.join(", "));
        }
        for o in &orphans {
            println!("orphan: {} ({})", o.pkg, o.prefix);
        }
    }
    if !broken.is_empty() || !orphans.is_empty() {
        exit = 1;
    }

    if flags.fix && !broken.is_empty() {
        if flags.dry_run {
            for b in &broken {
                println!("Would rebuild {}", b.pkg);
            }
        } else {
            ctx.logger
                .stage(&format!("resolve: rebuilding {} broken package(s)", broken.len()));
            exit = fix_broken(ctx, &broken, flags)?;
        }
    }

    if flags.clean && !orphans.is_empty() {
        let remover = Remover::new(&ctx.config, &ctx.db, &ctx.ports);
        for orphan in &orphans {
            let options = RemoveOptions {
                force: true,
                dry_run: flags.dry_run,
                ..Default::default()
            };
            match remover.remove(&orphan.pkg, options) {
                Ok(_) => println!("Removed orphan {}", orphan.pkg),
                Err(e) => {
                    ctx.logger
                        .warn(&format!("failed to remove orphan {}: {e}", orphan.pkg));
                    exit = 3;
                }
            }
        }
    }

    Ok(exit)
}

/// Rebuild broken packages, optionally in parallel
fn fix_broken(
    ctx: &Context,
    broken: &[porg::audit::BrokenLib],
    flags: &ResolveFlags,
) -> Result<i32> {
    let names: Vec<String> = broken
        .iter()
        .map(|b| {
            // DB keys are name-version; recipes go by name
            ctx.db
                .get(&b.pkg)
                .map(|r| r.name)
                .unwrap_or_else(|_| b.pkg.clone())
        })
        .collect();

    let pool = WorkPool::new(flags.parallel.max(1));
    let (tx, rx) = mpsc::channel::<(String, porg::Result<()>)>();
    for name in &names {
        let recipe = match ctx.ports.find(name) {
            Ok(r) => r,
            Err(e) => {
                ctx.logger.warn(&format!("no recipe to rebuild {name}: {e}"));
                continue;
            }
        };
        let config = ctx.config.clone();
        let db = InstalledDb::new(ctx.db.path());
        let quiet = flags.quiet;
        let tx = tx.clone();
        let name = name.clone();
        pool.submit(move || {
            let builder = Builder::new(
                &config,
                &db,
                BuildOptions {
                    quiet,
                    ..Default::default()
                },
            );
            let result = builder.build(&recipe).map(|_| ());
            let _ = tx.send((name, result));
        });
    }
    drop(tx);
    pool.join();

    let mut exit = 0;
    for (name, result) in rx {
        match result {
            Ok(()) => println!("Rebuilt {name}"),
            Err(e) => {
                ctx.logger.error(&format!("rebuild of {name} failed: {e}"));
                exit = 3;
            }
        }
    }
    Ok(exit)
}
