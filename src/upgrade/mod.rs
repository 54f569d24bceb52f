// src/upgrade/mod.rs

//! Upgrade orchestration
//!
//! The plan comes from the resolver; execution walks it in order. Per
//! package: build the new artifact, remove the old version, expand the new
//! artifact into the root, register. The swap is not atomic across the
//! filesystem, but the persisted state names the package and phase so
//! `--resume` re-enters exactly where a crash stopped. With `parallel N`
//! the plan splits into dependency-closed batches: builds run on a worker
//! pool, swaps stay serialized in plan order.

use crate::build::{extract_artifact, BuildOptions, Builder};
use crate::config::Config;
use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::recipe::PortsTree;
use crate::remove::{RemoveOptions, Remover};
use crate::resolver::{Resolver, UpgradePlan, UpgradeScope};
use crate::version::Version;
use crate::workpool::WorkPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{info, warn};

/// Phases of the per-package swap, for resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradePhase {
    Build,
    RemoveOld,
    Expand,
    Register,
}

/// Persisted upgrade state, one JSON object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeState {
    pub target: String,
    pub metafile: Option<PathBuf>,
    pub new_version: String,
    pub installed_version: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub phase: UpgradePhase,
}

/// Flags controlling an upgrade run
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub resume: bool,
    pub dry_run: bool,
    pub quiet: bool,
    pub parallel: usize,
}

/// Counts for the end-of-run summary
#[derive(Debug, Clone, Default)]
pub struct UpgradeSummary {
    pub upgraded: Vec<String>,
    pub skipped: Vec<String>,
}

/// Plans and executes upgrades
pub struct UpgradeOrchestrator<'a> {
    config: &'a Config,
    db: &'a InstalledDb,
    ports: &'a PortsTree,
    /// Filesystem root artifacts expand into; `/` outside tests
    root: PathBuf,
}

impl<'a> UpgradeOrchestrator<'a> {
    pub fn new(config: &'a Config, db: &'a InstalledDb, ports: &'a PortsTree) -> Self {
        Self {
            config,
            db,
            ports,
            root: PathBuf::from("/"),
        }
    }

    /// Override the expansion root (tests, alternate roots)
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    fn state_path(&self) -> PathBuf {
        self.config.workdir.join("upgrade-state.json")
    }

    /// Compute the plan for a scope
    pub fn plan(&self, scope: UpgradeScope) -> Result<UpgradePlan> {
        Resolver::new(self.ports, self.db).upgrade_plan(scope)
    }

    /// Execute a plan; stops at the first fatal per-package failure after
    /// persisting the resume state.
    pub fn execute(&self, scope: UpgradeScope, options: &UpgradeOptions) -> Result<UpgradeSummary> {
        let mut summary = UpgradeSummary::default();

        // a previous run's failure takes priority
        if options.resume {
            if let Some(state) = self.load_state()? {
                info!(
                    "resuming upgrade of {} from phase {:?}",
                    state.target, state.phase
                );
                self.swap_package(&state.target, Some(state.phase), options, &mut summary)?;
                self.clear_state()?;
            }
        }

        // the plan's order spans the whole scope; only the flagged subset
        // gets rebuilt, in that same order
        let plan = self.plan(scope)?;
        if plan.needs_rebuild.is_empty() {
            info!("nothing to upgrade");
            return Ok(summary);
        }
        info!("upgrade order: {}", plan.upgrade_order.join(", "));
        info!("needs rebuild: {}", plan.needs_rebuild.join(", "));
        if options.dry_run {
            summary.skipped = plan.needs_rebuild;
            return Ok(summary);
        }

        let todo: Vec<String> = plan
            .needs_rebuild
            .iter()
            .filter(|p| !summary.upgraded.contains(p))
            .cloned()
            .collect();

        if options.parallel > 1 {
            self.execute_batched(&todo, options, &mut summary)?;
        } else {
            for package in &todo {
                self.swap_package(package, None, options, &mut summary)?;
            }
        }
        Ok(summary)
    }

    /// Per-package flow; `resume_phase` re-enters a crashed swap
    fn swap_package(
        &self,
        package: &str,
        resume_phase: Option<UpgradePhase>,
        options: &UpgradeOptions,
        summary: &mut UpgradeSummary,
    ) -> Result<()> {
        let recipe = self.ports.find(package)?;
        let installed_version = self.db.get(package).ok().map(|r| r.version);

        if let Some(installed) = &installed_version {
            if Version::new(&recipe.version) < Version::new(installed) {
                warn!(
                    "{}: recipe {} older than installed {}, skipping",
                    package, recipe.version, installed
                );
                summary.skipped.push(package.to_string());
                return Ok(());
            }
        }

        let from = resume_phase.unwrap_or(UpgradePhase::Build);
        let mut artifact = None;

        for phase in [
            UpgradePhase::Build,
            UpgradePhase::RemoveOld,
            UpgradePhase::Expand,
            UpgradePhase::Register,
        ] {
            if phase_index(phase) < phase_index(from) {
                continue;
            }
            self.persist_state(package, &recipe.version, &installed_version, phase)?;
            let step = match phase {
                UpgradePhase::Build => {
                    let builder = Builder::new(
                        self.config,
                        self.db,
                        BuildOptions {
                            resume: resume_phase == Some(UpgradePhase::Build) && options.resume,
                            quiet: options.quiet,
                            skip_register: true,
                            ..Default::default()
                        },
                    );
                    builder.build(&recipe).map(|outcome| {
                        artifact = Some(outcome.artifact);
                    })
                }
                UpgradePhase::RemoveOld => {
                    if self.db.is_installed(package)? {
                        let remover = Remover::new(self.config, self.db, self.ports);
                        remover
                            .remove(
                                package,
                                RemoveOptions {
                                    force: true,
                                    ..Default::default()
                                },
                            )
                            .map(|_| ())
                    } else {
                        Ok(())
                    }
                }
                UpgradePhase::Expand => {
                    let path = match &artifact {
                        Some(path) => path.clone(),
                        None => self.cached_artifact(&recipe.key())?,
                    };
                    extract_artifact(&path, &self.root)
                }
                UpgradePhase::Register => self
                    .db
                    .register(
                        &recipe.name,
                        &recipe.version,
                        &recipe.prefix,
                        recipe.dependencies.runtime.clone(),
                        Default::default(),
                    )
                    .map(|_| ()),
            };
            if let Err(e) = step {
                warn!("upgrade of {} failed in {:?}: {}", package, phase, e);
                return Err(e);
            }
        }

        self.clear_state()?;
        summary.upgraded.push(package.to_string());
        info!("upgraded {} to {}", package, recipe.version);
        Ok(())
    }

    /// Batched execution: dependency-closed batches build in parallel,
    /// then swap serially in plan order.
    fn execute_batched(
        &self,
        todo: &[String],
        options: &UpgradeOptions,
        summary: &mut UpgradeSummary,
    ) -> Result<()> {
        for batch in self.partition_batches(todo)? {
            info!("building batch: {}", batch.join(", "));
            let pool = WorkPool::new(options.parallel);
            let (tx, rx) = mpsc::channel::<(String, Result<()>)>();
            for package in &batch {
                let recipe = self.ports.find(package)?;
                let config = self.config.clone();
                let db = self.db.clone();
                let quiet = options.quiet;
                let tx = tx.clone();
                let name = package.clone();
                pool.submit(move || {
                    let builder = Builder::new(
                        &config,
                        &db,
                        BuildOptions {
                            quiet,
                            skip_register: true,
                            ..Default::default()
                        },
                    );
                    let result = builder.build(&recipe).map(|_| ());
                    let _ = tx.send((name, result));
                });
            }
            drop(tx);
            pool.join();

            let results: HashMap<String, Result<()>> = rx.into_iter().collect();
            for package in &batch {
                if let Some(Err(e)) = results.get(package) {
                    return Err(Error::BuildFailed {
                        package: package.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            // artifacts are in the cache; swaps resume from remove-old
            for package in &batch {
                self.swap_package(package, Some(UpgradePhase::RemoveOld), options, summary)?;
            }
        }
        Ok(())
    }

    /// Split the plan into batches where no member depends (transitively,
    /// within the plan) on another member of the same batch.
    fn partition_batches(&self, todo: &[String]) -> Result<Vec<Vec<String>>> {
        let in_plan: HashSet<&str> = todo.iter().map(String::as_str).collect();
        let mut level: HashMap<String, usize> = HashMap::new();
        // todo is already topologically ordered: deps precede dependents
        for package in todo {
            let deps = self
                .db
                .get(package)
                .map(|r| r.dependencies)
                .unwrap_or_default();
            let depth = deps
                .iter()
                .filter(|d| in_plan.contains(d.as_str()))
                .filter_map(|d| level.get(d.as_str()))
                .max()
                .map(|m| m + 1)
                .unwrap_or(0);
            level.insert(package.clone(), depth);
        }
        let max_level = level.values().copied().max().unwrap_or(0);
        let mut batches = vec![Vec::new(); max_level + 1];
        for package in todo {
            batches[level[package]].push(package.clone());
        }
        batches.retain(|b| !b.is_empty());
        Ok(batches)
    }

    fn cached_artifact(&self, key: &str) -> Result<PathBuf> {
        let path = self.config.cache_dir.join("packages").join(format!(
            "{}.{}",
            key,
            self.config.package_format.extension()
        ));
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::NotFound(format!("artifact for {key}")))
        }
    }

    fn persist_state(
        &self,
        target: &str,
        new_version: &str,
        installed_version: &Option<String>,
        phase: UpgradePhase,
    ) -> Result<()> {
        let state = UpgradeState {
            target: target.to_string(),
            metafile: self
                .ports
                .find(target)
                .ok()
                .and_then(|r| r.dir)
                .map(|d| d.join(format!("{target}.yaml"))),
            new_version: new_version.to_string(),
            installed_version: installed_version.clone(),
            timestamp: Utc::now(),
            phase,
        };
        let path = self.state_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = tempfile::NamedTempFile::new_in(path.parent().unwrap_or(Path::new(".")))
            .map_err(|e| Error::IoError(format!("upgrade state temp: {e}")))?;
        tmp.write_all(serde_json::to_string_pretty(&state)?.as_bytes())?;
        tmp.persist(&path)
            .map_err(|e| Error::IoError(format!("upgrade state rename: {e}")))?;
        Ok(())
    }

    fn load_state(&self) -> Result<Option<UpgradeState>> {
        match std::fs::read_to_string(self.state_path()) {
            Ok(content) => Ok(Some(serde_json::from_str(&content).map_err(|e| {
                Error::IoError(format!("bad upgrade state: {e}"))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_state(&self) -> Result<()> {
        match std::fs::remove_file(self.state_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn phase_index(phase: UpgradePhase) -> usize {
    match phase {
        UpgradePhase::Build => 0,
        UpgradePhase::RemoveOld => 1,
        UpgradePhase::Expand => 2,
        UpgradePhase::Register => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
        db: InstalledDb,
        ports: PortsTree,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ports_root = dir.path().join("ports");
        std::fs::create_dir_all(&ports_root).unwrap();
        Fixture {
            config: Config {
                workdir: dir.path().join("work"),
                cache_dir: dir.path().join("cache"),
                ..Config::default()
            },
            db: InstalledDb::new(dir.path().join("installed.json")),
            ports: PortsTree::new(&ports_root),
            dir,
        }
    }

    fn add_recipe(f: &Fixture, name: &str, version: &str) {
        let dir = f.ports.root().join("main").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{name}-{version}.yaml")),
            format!("name: {name}\nversion: {version}\n"),
        )
        .unwrap();
    }

    fn install(f: &Fixture, name: &str, version: &str, deps: &[&str]) {
        let prefix = f.dir.path().join("opt").join(name);
        std::fs::create_dir_all(&prefix).unwrap();
        f.db.register(
            name,
            version,
            prefix.to_str().unwrap(),
            deps.iter().map(|s| s.to_string()).collect(),
            BTreeMap::new(),
        )
        .unwrap();
    }

    #[test]
    fn test_plan_matches_resolver() {
        let f = fixture();
        add_recipe(&f, "libfoo", "1.1");
        add_recipe(&f, "app", "2.0");
        install(&f, "libfoo", "1.0", &[]);
        install(&f, "app", "2.0", &["libfoo"]);

        let orch = UpgradeOrchestrator::new(&f.config, &f.db, &f.ports);
        let plan = orch.plan(UpgradeScope::World).unwrap();
        assert_eq!(plan.upgrade_order, vec!["libfoo", "app"]);
        assert_eq!(plan.needs_rebuild, vec!["libfoo", "app"]);
    }

    #[test]
    fn test_dry_run_reports_without_building() {
        let f = fixture();
        add_recipe(&f, "libfoo", "1.1");
        install(&f, "libfoo", "1.0", &[]);

        let orch = UpgradeOrchestrator::new(&f.config, &f.db, &f.ports);
        let options = UpgradeOptions {
            dry_run: true,
            ..Default::default()
        };
        let summary = orch.execute(UpgradeScope::World, &options).unwrap();
        assert_eq!(summary.skipped, vec!["libfoo"]);
        assert!(summary.upgraded.is_empty());
        // still at the old version
        assert_eq!(f.db.get("libfoo").unwrap().version, "1.0");
    }

    #[test]
    fn test_state_roundtrip() {
        let f = fixture();
        add_recipe(&f, "libfoo", "1.1");
        let orch = UpgradeOrchestrator::new(&f.config, &f.db, &f.ports);

        orch.persist_state("libfoo", "1.1", &Some("1.0".into()), UpgradePhase::Expand)
            .unwrap();
        let state = orch.load_state().unwrap().unwrap();
        assert_eq!(state.target, "libfoo");
        assert_eq!(state.phase, UpgradePhase::Expand);
        assert_eq!(state.installed_version.as_deref(), Some("1.0"));

        orch.clear_state().unwrap();
        assert!(orch.load_state().unwrap().is_none());
    }

    #[test]
    fn test_partition_batches_respects_dependencies() {
        let f = fixture();
        install(&f, "base", "1.0", &[]);
        install(&f, "liba", "1.0", &["base"]);
        install(&f, "libb", "1.0", &["base"]);
        install(&f, "app", "1.0", &["liba", "libb"]);

        let orch = UpgradeOrchestrator::new(&f.config, &f.db, &f.ports);
        let todo = vec![
            "base".to_string(),
            "liba".to_string(),
            "libb".to_string(),
            "app".to_string(),
        ];
        let batches = orch.partition_batches(&todo).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec!["base"]);
        assert_eq!(batches[1], vec!["liba", "libb"]);
        assert_eq!(batches[2], vec!["app"]);
    }

    #[test]
    fn test_downgrade_skipped() {
        let f = fixture();
        add_recipe(&f, "libfoo", "0.9");
        install(&f, "libfoo", "1.0", &[]);

        let orch = UpgradeOrchestrator::new(&f.config, &f.db, &f.ports);
        let mut summary = UpgradeSummary::default();
        orch.swap_package("libfoo", None, &UpgradeOptions::default(), &mut summary)
            .unwrap();
        assert_eq!(summary.skipped, vec!["libfoo"]);
        assert_eq!(f.db.get("libfoo").unwrap().version, "1.0");
    }
}
