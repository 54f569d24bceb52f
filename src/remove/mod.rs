// src/remove/mod.rs

//! Package removal
//!
//! Removal refuses when other installed packages depend on the target
//! (unless forced), runs the pre/post-remove hooks, deletes the package's
//! prefix tree only when that is safe, unregisters the record, and can
//! recursively sweep the orphans the removal created. Dry-run computes and
//! logs every decision without touching the filesystem or the DB.

use crate::config::Config;
use crate::db::{InstalledDb, InstalledRecord, CRITICAL_PREFIXES};
use crate::error::{Error, Result};
use crate::build::HookRunner;
use crate::recipe::{PortsTree, Recipe};
use crate::resolver::Resolver;
use std::path::Path;
use tracing::{info, warn};

/// Flags controlling a removal
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub force: bool,
    pub recursive: bool,
    pub dry_run: bool,
}

/// What a removal did (or would do, under dry-run)
#[derive(Debug, Clone, Default)]
pub struct RemoveReport {
    /// DB keys removed, in removal order
    pub removed: Vec<String>,
    /// Prefix trees deleted
    pub deleted_prefixes: Vec<String>,
    /// Prefixes kept because they were critical or shared
    pub kept_prefixes: Vec<String>,
}

/// Removes installed packages
pub struct Remover<'a> {
    config: &'a Config,
    db: &'a InstalledDb,
    ports: &'a PortsTree,
}

impl<'a> Remover<'a> {
    pub fn new(config: &'a Config, db: &'a InstalledDb, ports: &'a PortsTree) -> Self {
        Self { config, db, ports }
    }

    /// Remove `name` per the options
    pub fn remove(&self, name: &str, options: RemoveOptions) -> Result<RemoveReport> {
        let mut report = RemoveReport::default();
        self.remove_into(name, options, &mut report)?;
        Ok(report)
    }

    fn remove_into(
        &self,
        name: &str,
        options: RemoveOptions,
        report: &mut RemoveReport,
    ) -> Result<()> {
        let record = self.db.get(name)?;
        let key = record.key();

        let resolver = Resolver::new(self.ports, self.db);
        let dependents = resolver.reverse_dependents(&record.name)?;
        if !dependents.is_empty() && !options.force {
            return Err(Error::HasDependents {
                package: key,
                dependents,
            });
        }
        if !dependents.is_empty() {
            warn!("removing {} despite dependents: {}", key, dependents.join(", "));
        }

        let recipe = self.hook_recipe(&record);
        let hooks = HookRunner::new(&recipe, &self.config.hooks_dir, options.force);
        if options.dry_run {
            info!("dry-run: would run pre-remove hooks for {}", key);
        } else {
            hooks.run("pre-remove")?;
        }

        self.delete_prefix(&record, options, report)?;

        if options.dry_run {
            info!("dry-run: would unregister {}", key);
            report.removed.push(key.clone());
        } else {
            let removed = self.db.unregister(&key)?;
            report.removed.extend(removed);
        }

        if options.recursive {
            let orphans = resolver.orphans()?;
            for orphan in orphans {
                // never chase our own tail
                if orphan == record.name {
                    continue;
                }
                info!("removing orphan {}", orphan);
                let orphan_options = RemoveOptions {
                    force: true,
                    recursive: false,
                    dry_run: options.dry_run,
                };
                if let Err(e) = self.remove_into(&orphan, orphan_options, report) {
                    warn!("failed to remove orphan {}: {}", orphan, e);
                }
            }
        }

        if options.dry_run {
            info!("dry-run: would run post-remove hooks for {}", key);
        } else {
            hooks.run("post-remove")?;
        }
        Ok(())
    }

    /// Delete the record's prefix tree when safe; keep it (forced) or
    /// refuse otherwise.
    fn delete_prefix(
        &self,
        record: &InstalledRecord,
        options: RemoveOptions,
        report: &mut RemoveReport,
    ) -> Result<()> {
        let prefix = record.prefix.as_str();
        let critical = CRITICAL_PREFIXES.contains(&prefix);
        let shared = self
            .db
            .list()?
            .iter()
            .any(|other| other.key() != record.key() && other.prefix == prefix);

        if critical || shared {
            let why = if critical { "critical" } else { "shared" };
            if options.force {
                warn!("keeping {} prefix {} of {}", why, prefix, record.key());
                report.kept_prefixes.push(prefix.to_string());
                return Ok(());
            }
            return Err(Error::InvalidInput(format!(
                "prefix {} of {} is {}; re-run with --force to remove the package anyway",
                prefix,
                record.key(),
                why
            )));
        }

        if options.dry_run {
            info!("dry-run: would delete prefix tree {}", prefix);
            report.deleted_prefixes.push(prefix.to_string());
            return Ok(());
        }
        if Path::new(prefix).is_dir() {
            std::fs::remove_dir_all(prefix)
                .map_err(|e| Error::IoError(format!("failed to delete {prefix}: {e}")))?;
            info!("deleted prefix tree {}", prefix);
        }
        report.deleted_prefixes.push(prefix.to_string());
        Ok(())
    }

    /// Hooks need a recipe; fall back to a synthetic one when the ports
    /// tree no longer carries the package.
    fn hook_recipe(&self, record: &InstalledRecord) -> Recipe {
        match self.ports.find(&record.name) {
            Ok(recipe) => recipe,
            Err(_) => {
                let text = format!(
                    "name: {}\nversion: {}\nprefix: {}\n",
                    record.name, record.version, record.prefix
                );
                Recipe::from_str_named(&text, record.name.clone())
                    .expect("synthetic recipe is well-formed")
            }
        }
    }
}
