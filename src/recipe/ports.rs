// src/recipe/ports.rs

//! Ports tree discovery
//!
//! Recipes live under `PORTS_DIR/<category>/<name>/<name>*.y{a,}ml`. The
//! tree is an external collaborator; porg only reads it (except during an
//! explicit `sync`). Lookups are cached per run since recipes are immutable
//! for the run's duration.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lazy, caching view over the recipe tree
pub struct PortsTree {
    root: PathBuf,
    cache: RefCell<HashMap<String, Option<Recipe>>>,
}

impl PortsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find and parse the recipe for `name`; results (including misses)
    /// are memoized for the run.
    pub fn find(&self, name: &str) -> Result<Recipe> {
        if let Some(cached) = self.cache.borrow().get(name) {
            return cached
                .clone()
                .ok_or_else(|| Error::MissingRecipe(name.to_string()));
        }
        let found = self.locate(name).map(|path| Recipe::load(&path)).transpose()?;
        self.cache
            .borrow_mut()
            .insert(name.to_string(), found.clone());
        found.ok_or_else(|| Error::MissingRecipe(name.to_string()))
    }

    /// Whether a recipe exists without forcing a full parse of a miss
    pub fn contains(&self, name: &str) -> bool {
        if let Some(cached) = self.cache.borrow().get(name) {
            return cached.is_some();
        }
        self.locate(name).is_some()
    }

    /// All recipe names the tree currently provides
    pub fn all_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(categories) = std::fs::read_dir(&self.root) else {
            return names;
        };
        for category in categories.filter_map(|e| e.ok()) {
            if !category.path().is_dir() {
                continue;
            }
            let Ok(packages) = std::fs::read_dir(category.path()) else {
                continue;
            };
            for package in packages.filter_map(|e| e.ok()) {
                if package.path().is_dir() {
                    if let Some(name) = package.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }

    /// Locate the metafile for a package: first a directory named after the
    /// package under any category, then a whole-tree glob fallback.
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let direct = format!(
            "{}/*/{}/{}*.y*ml",
            self.root.display(),
            glob_escape(name),
            glob_escape(name)
        );
        if let Some(path) = first_glob_match(&direct) {
            debug!("recipe for {} at {}", name, path.display());
            return Some(path);
        }
        let anywhere = format!("{}/**/{}*.y*ml", self.root.display(), glob_escape(name));
        first_glob_match(&anywhere).filter(|p| {
            // the glob is prefix-based; require an exact name or name-version stem
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem == name || stem.starts_with(&format!("{name}-")))
        })
    }
}

fn first_glob_match(pattern: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = glob::glob(pattern)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn glob_escape(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '*' | '?' | '[' | ']' => vec!['[', c, ']'],
            _ => vec![c],
        })
        .collect()
}
