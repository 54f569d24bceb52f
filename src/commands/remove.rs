// src/commands/remove.rs

//! `porg remove <pkg...>`

use super::Context;
use anyhow::{Context as _, Result};
use porg::{Error, RemoveOptions, Remover};

pub fn cmd_remove(
    ctx: &Context,
    packages: &[String],
    force: bool,
    recursive: bool,
    dry_run: bool,
    yes: bool,
) -> Result<i32> {
    let remover = Remover::new(&ctx.config, &ctx.db, &ctx.ports);
    let options = RemoveOptions {
        force,
        recursive,
        dry_run,
    };

    let mut exit = 0;
    for package in packages {
        ctx.logger.stage(&format!("remove: {package}"));
        if !yes && !dry_run {
            println!("Removing {package} (pass --yes to skip this notice)");
        }
        match remover.remove(package, options) {
            Ok(report) => {
                for key in &report.removed {
                    if dry_run {
                        println!("Would remove {key}");
                    } else {
                        println!("Removed {key}");
                    }
                }
                for prefix in &report.kept_prefixes {
                    println!("Kept prefix {prefix}");
                }
            }
            Err(Error::HasDependents {
                package,
                dependents,
            }) => {
                ctx.logger.error(&format!(
                    "{package} has dependents: {}",
                    dependents.join(", ")
                ));
                println!("Cannot remove {package}; depended on by:");
                for dependent in &dependents {
                    println!("  {dependent}");
                }
                println!("Use --force to remove anyway, --recursive to sweep orphans.");
                exit = 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {package}"));
            }
        }
    }
    Ok(exit)
}
