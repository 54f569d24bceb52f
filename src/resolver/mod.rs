// src/resolver/mod.rs

//! Dependency resolution over the ports tree and the installed set
//!
//! Builds an in-memory graph by lazily loading recipes for the requested
//! packages, then answers ordering, missing-dependency, reverse-dependency,
//! orphan and upgrade-plan queries against it.

mod graph;

pub use graph::{DepGraph, NodeId};

use crate::db::{InstalledDb, InstalledRecord, CRITICAL_PREFIXES};
use crate::error::{Error, Result};
use crate::recipe::PortsTree;
use crate::version::Version;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Scope of an upgrade plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeScope {
    Single(String),
    World,
}

/// Output of `upgrade_plan`
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpgradePlan {
    /// Topological order over the chosen subgraph
    pub upgrade_order: Vec<String>,
    /// Subset flagged for rebuild
    pub needs_rebuild: Vec<String>,
}

/// Resolver over a ports tree and the installed DB
pub struct Resolver<'a> {
    ports: &'a PortsTree,
    db: &'a InstalledDb,
}

impl<'a> Resolver<'a> {
    pub fn new(ports: &'a PortsTree, db: &'a InstalledDb) -> Self {
        Self { ports, db }
    }

    /// Topological order sufficient to install `name`, dependencies first,
    /// `name` last. Cycles and missing recipes propagate verbatim.
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        let (graph, root) = self.build_graph(name)?;
        let order = graph.topo_order(&[root])?;
        Ok(order.iter().map(|&id| graph.name_of(id).to_string()).collect())
    }

    /// Transitive dependency set of `name` minus the installed set
    pub fn missing(&self, name: &str) -> Result<Vec<String>> {
        let order = self.resolve(name)?;
        let mut missing = Vec::new();
        for pkg in order {
            if pkg != name && !self.db.is_installed(&pkg)? {
                missing.push(pkg);
            }
        }
        Ok(missing)
    }

    /// Installed records directly depending on `name`; returns their keys
    pub fn reverse_dependents(&self, name: &str) -> Result<Vec<String>> {
        let mut dependents: Vec<String> = self
            .db
            .list()?
            .iter()
            .filter(|r| r.dependencies.iter().any(|d| d == name))
            .map(InstalledRecord::key)
            .collect();
        dependents.sort();
        Ok(dependents)
    }

    /// Transitive closure of reverse dependents; returns names
    pub fn reverse_dependents_closure(&self, name: &str) -> Result<Vec<String>> {
        let records = self.db.list()?;
        let graph = installed_graph(&records);
        let Some(id) = graph.id_of(name) else {
            return Ok(Vec::new());
        };
        Ok(graph
            .dependents_closure(id)
            .iter()
            .map(|&id| graph.name_of(id).to_string())
            .collect())
    }

    /// Installed packages nothing depends on, excluding critical prefixes
    pub fn orphans(&self) -> Result<Vec<String>> {
        let records = self.db.list()?;
        let depended_on: HashSet<&str> = records
            .iter()
            .flat_map(|r| r.dependencies.iter().map(String::as_str))
            .collect();
        let mut orphans: Vec<String> = records
            .iter()
            .filter(|r| !depended_on.contains(r.name.as_str()))
            .filter(|r| !CRITICAL_PREFIXES.contains(&r.prefix.as_str()))
            .map(|r| r.name.clone())
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Dependency edges reachable from `name`, one `(from, to)` per edge
    pub fn graph_edges(&self, name: &str) -> Result<Vec<(String, String)>> {
        let (graph, _) = self.build_graph(name)?;
        let mut edges = graph.edges();
        edges.sort();
        Ok(edges)
    }

    /// Plan an upgrade: topological order over the scope's subgraph, with
    /// packages flagged when the recipe is newer than the installed version
    /// or a runtime dependency was rebuilt more recently.
    pub fn upgrade_plan(&self, scope: UpgradeScope) -> Result<UpgradePlan> {
        let records = self.db.list()?;
        let by_name: BTreeMap<&str, &InstalledRecord> =
            records.iter().map(|r| (r.name.as_str(), r)).collect();

        let graph = installed_graph(&records);
        let roots: Vec<NodeId> = match &scope {
            UpgradeScope::World => (0..graph.len()).map(NodeId).collect(),
            UpgradeScope::Single(name) => {
                let id = graph
                    .id_of(name)
                    .ok_or_else(|| Error::NotFound(name.clone()))?;
                let mut roots = vec![id];
                roots.extend(graph.dependents_closure(id));
                roots
            }
        };

        let order = graph.topo_order(&roots)?;
        let mut flagged: HashSet<String> = HashSet::new();
        let mut plan_order = Vec::new();

        for &id in &order {
            let pkg = graph.name_of(id);
            let Some(record) = by_name.get(pkg) else {
                continue;
            };
            let mut rebuild = false;

            // recipe newer than installed
            if let Ok(recipe) = self.ports.find(pkg) {
                if Version::new(&recipe.version).is_newer_than(&Version::new(&record.version)) {
                    debug!("{}: recipe {} newer than installed {}", pkg, recipe.version, record.version);
                    rebuild = true;
                }
            }

            // a runtime dependency rebuilt in this plan, or rebuilt on disk
            // after this package was installed
            if !rebuild {
                for dep in &record.dependencies {
                    if flagged.contains(dep) {
                        rebuild = true;
                        break;
                    }
                    if let Some(dep_record) = by_name.get(dep.as_str()) {
                        if dep_record.installed_at > record.installed_at {
                            rebuild = true;
                            break;
                        }
                    }
                }
            }

            plan_order.push(pkg.to_string());
            if rebuild {
                flagged.insert(pkg.to_string());
            }
        }

        // the order covers the whole subgraph; the flagged subset is what
        // actually gets rebuilt
        let needs_rebuild: Vec<String> = plan_order
            .iter()
            .filter(|p| flagged.contains(*p))
            .cloned()
            .collect();
        Ok(UpgradePlan {
            upgrade_order: plan_order,
            needs_rebuild,
        })
    }

    /// Build the graph reachable from `name`. A dependency without a recipe
    /// is tolerated as a leaf when it is installed, and a hard error
    /// otherwise.
    fn build_graph(&self, name: &str) -> Result<(DepGraph, NodeId)> {
        let mut graph = DepGraph::new();
        let root = graph.add_node(name);
        let mut queue = vec![name.to_string()];
        let mut expanded: HashSet<String> = HashSet::new();

        while let Some(pkg) = queue.pop() {
            if !expanded.insert(pkg.clone()) {
                continue;
            }
            let recipe = match self.ports.find(&pkg) {
                Ok(r) => r,
                Err(Error::MissingRecipe(_)) if pkg != name => {
                    // an installed leaf without a recipe has nothing to expand
                    if self.db.is_installed(&pkg)? {
                        continue;
                    }
                    return Err(Error::MissingRecipe(pkg));
                }
                Err(e) => return Err(e),
            };
            let from = graph.add_node(&pkg);
            for dep in recipe.dependencies.for_build_order() {
                let to = graph.add_node(&dep);
                graph.add_edge(from, to);
                queue.push(dep);
            }
        }
        Ok((graph, root))
    }
}

/// Graph over installed records using their recorded runtime dependencies,
/// restricted to the installed set.
fn installed_graph(records: &[InstalledRecord]) -> DepGraph {
    let names: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let mut graph = DepGraph::new();
    for record in records {
        graph.add_node(&record.name);
    }
    for record in records {
        let from = graph.id_of(&record.name).expect("node was just added");
        for dep in &record.dependencies {
            if names.contains(dep.as_str()) {
                let to = graph.id_of(dep).expect("node was just added");
                graph.add_edge(from, to);
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        ports: PortsTree,
        db: InstalledDb,
        prefix_base: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ports_root = dir.path().join("ports");
        fs::create_dir_all(&ports_root).unwrap();
        let db = InstalledDb::new(dir.path().join("installed.json"));
        let prefix_base = dir.path().join("prefixes");
        Fixture {
            ports: PortsTree::new(&ports_root),
            db,
            prefix_base,
            _dir: dir,
        }
    }

    fn add_recipe(f: &Fixture, name: &str, version: &str, runtime: &[&str]) {
        let dir = f.ports.root().join("main").join(name);
        fs::create_dir_all(&dir).unwrap();
        let mut text = format!("name: {name}\nversion: {version}\n");
        if !runtime.is_empty() {
            text.push_str("dependencies:\n  runtime:\n");
            for dep in runtime {
                text.push_str(&format!("    - {dep}\n"));
            }
        }
        fs::write(dir.join(format!("{name}-{version}.yaml")), text).unwrap();
    }

    fn install(f: &Fixture, name: &str, version: &str, deps: &[&str]) {
        let prefix = f.prefix_base.join(name);
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
    fn test_resolve_orders_deps_first() {
        let f = fixture();
        add_recipe(&f, "app", "1.0", &["libfoo"]);
        add_recipe(&f, "libfoo", "1.0", &["glibc"]);
        add_recipe(&f, "glibc", "2.39", &[]);

        let r = Resolver::new(&f.ports, &f.db);
        assert_eq!(r.resolve("app").unwrap(), vec!["glibc", "libfoo", "app"]);
    }

    #[test]
    fn test_cycle_detected() {
        let f = fixture();
        add_recipe(&f, "a", "1", &["b"]);
        add_recipe(&f, "b", "1", &["c"]);
        add_recipe(&f, "c", "1", &["a"]);

        let r = Resolver::new(&f.ports, &f.db);
        match r.resolve("a") {
            Err(Error::CycleDetected { path }) => {
                for name in ["a", "b", "c"] {
                    assert!(path.contains(&name.to_string()));
                }
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_recipe_propagates() {
        let f = fixture();
        let r = Resolver::new(&f.ports, &f.db);
        assert!(matches!(r.resolve("ghost"), Err(Error::MissingRecipe(_))));
    }

    #[test]
    fn test_installed_dep_without_recipe_is_leaf() {
        let f = fixture();
        add_recipe(&f, "app", "1.0", &["vendor-blob"]);
        install(&f, "vendor-blob", "3.1", &[]);

        let r = Resolver::new(&f.ports, &f.db);
        assert_eq!(r.resolve("app").unwrap(), vec!["vendor-blob", "app"]);
    }

    #[test]
    fn test_missing_filters_installed() {
        let f = fixture();
        add_recipe(&f, "app", "1.0", &["libfoo", "glibc"]);
        add_recipe(&f, "libfoo", "1.0", &[]);
        add_recipe(&f, "glibc", "2.39", &[]);
        install(&f, "glibc", "2.39", &[]);

        let r = Resolver::new(&f.ports, &f.db);
        assert_eq!(r.missing("app").unwrap(), vec!["libfoo"]);
    }

    #[test]
    fn test_reverse_dependents_returns_keys() {
        let f = fixture();
        install(&f, "libfoo", "1.0", &[]);
        install(&f, "app", "2.0", &["libfoo"]);

        let r = Resolver::new(&f.ports, &f.db);
        assert_eq!(r.reverse_dependents("libfoo").unwrap(), vec!["app-2.0"]);
        assert!(r.reverse_dependents("app").unwrap().is_empty());
    }

    #[test]
    fn test_orphans_excludes_depended_and_critical() {
        let f = fixture();
        install(&f, "libfoo", "1.0", &[]);
        install(&f, "app", "2.0", &["libfoo"]);
        install(&f, "stray", "0.1", &[]);

        let r = Resolver::new(&f.ports, &f.db);
        let orphans = r.orphans().unwrap();
        assert!(orphans.contains(&"app".to_string()));
        assert!(orphans.contains(&"stray".to_string()));
        assert!(!orphans.contains(&"libfoo".to_string()));
    }

    #[test]
    fn test_upgrade_plan_world_propagates_rebuild() {
        let f = fixture();
        add_recipe(&f, "libfoo", "1.1", &[]);
        add_recipe(&f, "app", "2.0", &["libfoo"]);
        install(&f, "libfoo", "1.0", &[]);
        install(&f, "app", "2.0", &["libfoo"]);

        let r = Resolver::new(&f.ports, &f.db);
        let plan = r.upgrade_plan(UpgradeScope::World).unwrap();
        assert_eq!(plan.upgrade_order, vec!["libfoo", "app"]);
        assert_eq!(plan.needs_rebuild, vec!["libfoo", "app"]);
    }

    #[test]
    fn test_upgrade_plan_nothing_to_do() {
        let f = fixture();
        add_recipe(&f, "app", "2.0", &[]);
        install(&f, "app", "2.0", &[]);

        let r = Resolver::new(&f.ports, &f.db);
        let plan = r.upgrade_plan(UpgradeScope::World).unwrap();
        assert!(plan.needs_rebuild.is_empty());
        // the order still covers the scope's subgraph
        assert_eq!(plan.upgrade_order, vec!["app".to_string()]);
    }

    #[test]
    fn test_upgrade_plan_single_scope() {
        let f = fixture();
        add_recipe(&f, "libfoo", "1.1", &[]);
        add_recipe(&f, "app", "2.0", &["libfoo"]);
        install(&f, "libfoo", "1.0", &[]);
        install(&f, "app", "2.0", &["libfoo"]);

        let r = Resolver::new(&f.ports, &f.db);
        let plan = r.upgrade_plan(UpgradeScope::Single("libfoo".into())).unwrap();
        // app is pulled in because it depends on the upgraded libfoo
        assert_eq!(plan.needs_rebuild, vec!["libfoo", "app"]);
    }

    #[test]
    fn test_reverse_dependents_closure_is_transitive() {
        let f = fixture();
        install(&f, "libfoo", "1.0", &[]);
        install(&f, "app", "2.0", &["libfoo"]);
        install(&f, "meta", "1.0", &["app"]);

        let r = Resolver::new(&f.ports, &f.db);
        assert_eq!(
            r.reverse_dependents_closure("libfoo").unwrap(),
            vec!["app", "meta"]
        );
        // the direct query stays direct
        assert_eq!(r.reverse_dependents("libfoo").unwrap(), vec!["app-2.0"]);
    }

    #[test]
    fn test_graph_edges() {
        let f = fixture();
        add_recipe(&f, "app", "1.0", &["libfoo"]);
        add_recipe(&f, "libfoo", "1.0", &[]);

        let r = Resolver::new(&f.ports, &f.db);
        assert_eq!(
            r.graph_edges("app").unwrap(),
            vec![("app".to_string(), "libfoo".to_string())]
        );
    }
}
