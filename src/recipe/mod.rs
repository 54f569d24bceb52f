// src/recipe/mod.rs

//! Recipe model and loading
//!
//! A recipe is a declarative file describing how to build one package:
//! sources, patches, build/install command blocks, dependencies and hooks.
//! Recipes are parsed on demand and immutable for the duration of a run.

mod parser;
mod ports;

pub use parser::{parse_document, Value};
pub use ports::PortsTree;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which root a recipe stages into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeStage {
    #[default]
    Normal,
    Bootstrap,
    Toolchain,
}

impl RecipeStage {
    /// Bootstrap and toolchain recipes stage into the alternate root
    pub fn uses_bootstrap_root(&self) -> bool {
        !matches!(self, RecipeStage::Normal)
    }
}

/// One entry in a recipe's source list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_url: Option<String>,
}

impl SourceEntry {
    /// True for git-like sources
    pub fn is_vcs(&self) -> bool {
        self.url.starts_with("git://")
            || self.url.starts_with("git+")
            || self.url.ends_with(".git")
            || self.url.starts_with("vcs://")
    }

    /// Cache file / directory name derived from the URL basename
    pub fn cache_name(&self) -> String {
        let trimmed = self.url.trim_end_matches('/');
        trimmed
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("source")
            .to_string()
    }
}

/// Build/runtime/optional dependency sets (unversioned names)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub runtime: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

impl Dependencies {
    /// Build ∪ runtime, in declaration order, deduplicated
    pub fn for_build_order(&self) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        self.build
            .iter()
            .chain(self.runtime.iter())
            .filter(|d| seen.insert(d.as_str().to_string()))
            .cloned()
            .collect()
    }
}

/// A parsed, normalized recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub stage: RecipeStage,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    /// Patch files, relative to the recipe directory
    #[serde(default)]
    pub patches: Vec<String>,
    /// Multi-line build command block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Multi-line install command block; runs with DESTDIR set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Hook stage name -> ordered commands
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<String>>,
    /// Install prefix; files under the staging root mirror this
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Overlay the artifact onto / after packaging
    #[serde(default)]
    pub expand_to_root: bool,
    /// Directory the recipe file lives in (for patch resolution)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Unrecognized keys, preserved as opaque metadata
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_prefix() -> String {
    "/usr".to_string()
}

impl Recipe {
    /// Canonical installed-DB key
    pub fn key(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Load and normalize a recipe file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("failed to read {}: {}", path.display(), e)))?;
        let mut recipe = Self::from_str_named(&content, file_stem_name(path))?;
        recipe.dir = path.parent().map(Path::to_path_buf);
        Ok(recipe)
    }

    /// Parse recipe text; `fallback_name` is used when `name` is missing
    /// (filename-derived, per the loader contract).
    pub fn from_str_named(content: &str, fallback_name: String) -> Result<Self> {
        let doc = parse_document(content)?;
        let Value::Map(entries) = doc else {
            return Err(Error::ParseError {
                line: 1,
                column: 1,
                reason: "recipe must be a mapping".to_string(),
            });
        };

        let mut recipe = Recipe {
            name: String::new(),
            version: String::new(),
            stage: RecipeStage::Normal,
            sources: Vec::new(),
            patches: Vec::new(),
            build: None,
            install: None,
            dependencies: Dependencies::default(),
            hooks: BTreeMap::new(),
            prefix: default_prefix(),
            expand_to_root: false,
            dir: None,
            extra: BTreeMap::new(),
        };

        // Single-source convenience keys, folded into `sources` afterwards
        let mut single_source: Option<String> = None;
        let mut single_sha256: Option<String> = None;
        let mut single_gpg: Option<String> = None;

        for (key, value) in entries {
            match key.as_str() {
                "name" => recipe.name = value.as_scalar().unwrap_or_default(),
                "version" => recipe.version = value.as_scalar().unwrap_or_default(),
                "stage" => {
                    recipe.stage = match value.as_scalar().unwrap_or_default().as_str() {
                        "bootstrap" => RecipeStage::Bootstrap,
                        "toolchain" => RecipeStage::Toolchain,
                        _ => RecipeStage::Normal,
                    }
                }
                "source" => single_source = value.as_scalar(),
                "sha256" => single_sha256 = value.as_scalar(),
                "gpg" => single_gpg = value.as_scalar(),
                "sources" => recipe.sources = parse_sources(&value),
                "patches" => recipe.patches = value.as_string_list(),
                "build" => recipe.build = value.as_scalar().filter(|s| !s.is_empty()),
                "install" => recipe.install = value.as_scalar().filter(|s| !s.is_empty()),
                "dependencies" => {
                    if let Value::Map(deps) = value {
                        for (dkey, dval) in deps {
                            match dkey.as_str() {
                                "build" => recipe.dependencies.build = dval.as_string_list(),
                                "runtime" => recipe.dependencies.runtime = dval.as_string_list(),
                                "optional" => recipe.dependencies.optional = dval.as_string_list(),
                                _ => {}
                            }
                        }
                    }
                }
                // aliases the ports tree has historically used
                "depends" | "run_depends" => {
                    recipe.dependencies.runtime = value.as_string_list()
                }
                "build_depends" => recipe.dependencies.build = value.as_string_list(),
                "hooks" => {
                    if let Value::Map(stages) = value {
                        for (stage, cmds) in stages {
                            recipe.hooks.insert(stage, cmds.as_string_list());
                        }
                    }
                }
                "prefix" => {
                    if let Some(p) = value.as_scalar().filter(|s| !s.is_empty()) {
                        recipe.prefix = p;
                    }
                }
                "expand_to_root" => {
                    recipe.expand_to_root = matches!(
                        value.as_scalar().unwrap_or_default().as_str(),
                        "true" | "yes" | "1"
                    )
                }
                _ => {
                    recipe
                        .extra
                        .insert(key, value.as_scalar().unwrap_or_else(|| value.to_flat_string()));
                }
            }
        }

        if let Some(url) = single_source {
            recipe.sources.insert(
                0,
                SourceEntry {
                    url,
                    checksum: single_sha256,
                    signature_url: single_gpg,
                },
            );
        }

        if recipe.name.is_empty() {
            recipe.name = fallback_name;
        }
        if recipe.version.is_empty() {
            recipe.version = "0.0.0".to_string();
        }

        Ok(recipe)
    }

    /// Hooks registered for a stage, empty when none
    pub fn hooks_for(&self, stage: &str) -> &[String] {
        self.hooks.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `sources` accepts both scalar URLs and maps with url/checksum/signature_url
fn parse_sources(value: &Value) -> Vec<SourceEntry> {
    let Value::List(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Scalar(url) if !url.is_empty() => Some(SourceEntry {
                url: url.clone(),
                checksum: None,
                signature_url: None,
            }),
            Value::Map(fields) => {
                let mut url = None;
                let mut checksum = None;
                let mut signature_url = None;
                for (k, v) in fields {
                    match k.as_str() {
                        "url" => url = v.as_scalar(),
                        "checksum" | "sha256" => checksum = v.as_scalar(),
                        "signature_url" | "gpg" => signature_url = v.as_scalar(),
                        _ => {}
                    }
                }
                url.map(|url| SourceEntry {
                    url,
                    checksum,
                    signature_url,
                })
            }
            _ => None,
        })
        .collect()
}

/// Derive a package name from a recipe filename: `hello-2.12.yaml` -> `hello`
fn file_stem_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");
    // strip a trailing -<version-ish> run
    match stem.rfind('-') {
        Some(pos) if stem[pos + 1..].chars().next().is_some_and(|c| c.is_ascii_digit()) => {
            stem[..pos].to_string()
        }
        _ => stem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
name: hello
version: \"2.12\"
prefix: /usr
sources:
  - url: https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz
    sha256: cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab
  - url: ftp://mirror.example.org/hello-2.12.tar.gz
patches:
  - hello-2.12-musl.patch
build: |
  ./configure --prefix=/usr
  make
install: |
  make DESTDIR=$DESTDIR install
dependencies:
  build:
    - make
  runtime:
    - glibc
hooks:
  post-install:
    - ldconfig
";

    #[test]
    fn test_parse_full_recipe() {
        let recipe = Recipe::from_str_named(SAMPLE, "fallback".into()).unwrap();
        assert_eq!(recipe.name, "hello");
        assert_eq!(recipe.version, "2.12");
        assert_eq!(recipe.sources.len(), 2);
        assert_eq!(
            recipe.sources[0].checksum.as_deref(),
            Some("cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab")
        );
        assert!(recipe.sources[1].checksum.is_none());
        assert_eq!(recipe.patches, vec!["hello-2.12-musl.patch"]);
        assert!(recipe.build.as_deref().unwrap().contains("./configure"));
        assert!(recipe.install.as_deref().unwrap().contains("$DESTDIR"));
        assert_eq!(recipe.dependencies.build, vec!["make"]);
        assert_eq!(recipe.dependencies.runtime, vec!["glibc"]);
        assert_eq!(recipe.hooks_for("post-install"), ["ldconfig"]);
        assert_eq!(recipe.key(), "hello-2.12");
    }

    #[test]
    fn test_single_source_convenience_folds() {
        let text = "\
name: zlib
version: 1.3.1
source: https://zlib.net/zlib-1.3.1.tar.gz
sha256: abcd
gpg: https://zlib.net/zlib-1.3.1.tar.gz.asc
";
        let recipe = Recipe::from_str_named(text, "zlib".into()).unwrap();
        assert_eq!(recipe.sources.len(), 1);
        assert_eq!(recipe.sources[0].checksum.as_deref(), Some("abcd"));
        assert!(recipe.sources[0].signature_url.is_some());
    }

    #[test]
    fn test_missing_name_version_defaults() {
        let recipe = Recipe::from_str_named("prefix: /opt/x\n", "mytool-1.2".into()).unwrap();
        assert_eq!(recipe.name, "mytool-1.2");
        assert_eq!(recipe.version, "0.0.0");
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let recipe =
            Recipe::from_str_named("name: x\nversion: 1\nmaintainer: someone\n", "x".into())
                .unwrap();
        assert_eq!(recipe.extra.get("maintainer").map(String::as_str), Some("someone"));
    }

    #[test]
    fn test_depends_alias_maps_to_runtime() {
        let text = "name: app\nversion: 1\ndepends:\n  - libfoo\nbuild_depends:\n  - cmake\n";
        let recipe = Recipe::from_str_named(text, "app".into()).unwrap();
        assert_eq!(recipe.dependencies.runtime, vec!["libfoo"]);
        assert_eq!(recipe.dependencies.build, vec!["cmake"]);
    }

    #[test]
    fn test_stage_redirects() {
        let recipe =
            Recipe::from_str_named("name: gcc-pass1\nversion: 13.2.0\nstage: toolchain\n", "g".into())
                .unwrap();
        assert!(recipe.stage.uses_bootstrap_root());
    }

    #[test]
    fn test_vcs_source_detection() {
        let entry = SourceEntry {
            url: "https://git.example.org/tool.git".into(),
            checksum: None,
            signature_url: None,
        };
        assert!(entry.is_vcs());
        assert_eq!(entry.cache_name(), "tool.git");
    }

    #[test]
    fn test_file_stem_name() {
        assert_eq!(file_stem_name(Path::new("/p/hello-2.12.yaml")), "hello");
        assert_eq!(file_stem_name(Path::new("/p/plain.yml")), "plain");
    }

    #[test]
    fn test_for_build_order_dedup() {
        let deps = Dependencies {
            build: vec!["a".into(), "b".into()],
            runtime: vec!["b".into(), "c".into()],
            optional: vec![],
        };
        assert_eq!(deps.for_build_order(), vec!["a", "b", "c"]);
    }
}
