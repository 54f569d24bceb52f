// src/commands/install.rs

//! `porg install <pkg...>`

use super::Context;
use anyhow::{Context as _, Result};
use porg::logger::ProgressLine;
use porg::workpool::WorkPool;
use porg::{BuildOptions, Builder, InstalledDb, Resolver};
use std::collections::HashSet;
use std::sync::mpsc;

/// Resolve, build and register each requested package
pub fn cmd_install(
    ctx: &Context,
    packages: &[String],
    dry_run: bool,
    yes: bool,
    parallel: usize,
    quiet: bool,
) -> Result<i32> {
    let resolver = Resolver::new(&ctx.ports, &ctx.db);

    // merge per-package orders, keeping first occurrence
    let mut order: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for package in packages {
        let resolved = resolver
            .resolve(package)
            .with_context(|| format!("failed to resolve {package}"))?;
        for name in resolved {
            if seen.insert(name.clone()) {
                order.push(name);
            }
        }
    }

    let todo: Vec<String> = order
        .into_iter()
        .filter(|name| {
            let installed = ctx.db.is_installed(name).unwrap_or(false);
            let requested = packages.contains(name);
            !installed || requested
        })
        .collect();

    if todo.is_empty() {
        println!("Nothing to do.");
        return Ok(0);
    }
    println!("Install order: {}", todo.join(" "));
    if dry_run {
        println!("Dry run - nothing was built.");
        return Ok(0);
    }

    ctx.logger
        .stage(&format!("install: {} package(s)", todo.len()));
    if parallel > 1 {
        install_parallel(ctx, &todo, parallel, yes, quiet)
    } else {
        let mut progress = if quiet {
            ProgressLine::disabled()
        } else {
            ProgressLine::new("install", todo.len() as u64)
        };
        for name in &todo {
            build_one(ctx, name, yes, quiet)
                .with_context(|| format!("failed to install {name}"))?;
            progress.advance(1);
        }
        progress.finish();
        Ok(0)
    }
}

fn build_one(ctx: &Context, name: &str, yes: bool, quiet: bool) -> Result<()> {
    let recipe = ctx.ports.find(name)?;
    ctx.logger.stage(&format!("building {}", recipe.key()));
    let builder = Builder::new(
        &ctx.config,
        &ctx.db,
        BuildOptions {
            auto_yes: yes,
            quiet,
            ..Default::default()
        },
    );
    let outcome = builder.build(&recipe)?;
    ctx.logger.info(&format!(
        "installed {} (artifact {})",
        recipe.key(),
        outcome.artifact.display()
    ));
    println!("Installed {}", recipe.key());
    Ok(())
}

/// Parallel installs build independent packages concurrently; ordering
/// inside the todo list already puts dependencies first, so each batch
/// takes the prefix whose dependencies are all done.
fn install_parallel(
    ctx: &Context,
    todo: &[String],
    parallel: usize,
    yes: bool,
    quiet: bool,
) -> Result<i32> {
    let mut done: HashSet<String> = HashSet::new();
    let mut remaining: Vec<String> = todo.to_vec();

    while !remaining.is_empty() {
        // a package is ready when none of its recipe deps is still pending
        let pending: HashSet<&str> = remaining.iter().map(String::as_str).collect();
        let batch: Vec<String> = remaining
            .iter()
            .filter(|name| {
                ctx.ports
                    .find(name)
                    .map(|r| {
                        r.dependencies
                            .for_build_order()
                            .iter()
                            .all(|d| !pending.contains(d.as_str()) || done.contains(d))
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let batch = if batch.is_empty() {
            vec![remaining[0].clone()]
        } else {
            batch
        };

        let pool = WorkPool::new(parallel);
        let (tx, rx) = mpsc::channel::<(String, porg::Result<()>)>();
        for name in &batch {
            let recipe = ctx.ports.find(name)?;
            let config = ctx.config.clone();
            let db = InstalledDb::new(ctx.db.path());
            let tx = tx.clone();
            let name = name.clone();
            pool.submit(move || {
                let builder = Builder::new(
                    &config,
                    &db,
                    BuildOptions {
                        auto_yes: yes,
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

        for (name, result) in rx {
            result.with_context(|| format!("failed to install {name}"))?;
            println!("Installed {name}");
            done.insert(name);
        }
        remaining.retain(|name| !done.contains(name));
    }
    Ok(0)
}
