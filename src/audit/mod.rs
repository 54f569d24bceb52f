// src/audit/mod.rs

//! System auditing: revdep, depclean and best-effort health sweeps
//!
//! The revdep scan walks each installed package's binary and library
//! directories looking for ELF files whose dynamic dependencies no longer
//! resolve; a package is broken at its first unresolvable binary. The
//! depclean scan reuses the resolver's orphan query. Best-effort sweeps
//! (dangling symlinks, libtool droppings, an external vulnerability
//! scanner when one is installed) are report-only. Everything lands in a
//! single JSON report with a stable schema.

mod elf;

pub use elf::{elf_needed, unresolved_libs};

use crate::build::is_elf;
use crate::config::Config;
use crate::db::InstalledDb;
use crate::error::{Error, Result};
use crate::recipe::PortsTree;
use crate::resolver::Resolver;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Subdirectories of a prefix the revdep scan inspects
const SCAN_SUBDIRS: &[&str] = &[
    "bin", "sbin", "lib", "lib64", "usr/bin", "usr/sbin", "usr/lib", "usr/lib64",
];

/// Bound on the external security scanner
const SCANNER_TIMEOUT: Duration = Duration::from_secs(300);

/// A package with at least one unresolvable binary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BrokenLib {
    pub pkg: String,
    pub file: String,
    pub ldd: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokenSymlink {
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanEntry {
    pub pkg: String,
    pub prefix: String,
}

/// The collated audit report (stable schema)
#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub generated_at: String,
    pub host: String,
    pub kernel: String,
    pub broken_libs: Vec<BrokenLib>,
    pub broken_symlinks: Vec<BrokenSymlink>,
    pub orphans: Vec<OrphanEntry>,
    pub pkgconf_la: Vec<String>,
    pub python_orphans: Vec<String>,
    pub security: Option<serde_json::Value>,
}

impl AuditReport {
    /// True when any scan found something actionable
    pub fn has_findings(&self) -> bool {
        !self.broken_libs.is_empty()
            || !self.broken_symlinks.is_empty()
            || !self.orphans.is_empty()
    }
}

/// Runs the scans and collates the report
pub struct Auditor<'a> {
    config: &'a Config,
    db: &'a InstalledDb,
    ports: &'a PortsTree,
}

impl<'a> Auditor<'a> {
    pub fn new(config: &'a Config, db: &'a InstalledDb, ports: &'a PortsTree) -> Self {
        Self { config, db, ports }
    }

    /// Revdep: first broken binary per package
    pub fn revdep_scan(&self) -> Result<Vec<BrokenLib>> {
        let mut broken = Vec::new();
        for record in self.db.list()? {
            let prefix = Path::new(&record.prefix);
            if !prefix.is_dir() {
                continue;
            }
            'package: for subdir in SCAN_SUBDIRS {
                let dir = prefix.join(subdir);
                if !dir.is_dir() {
                    continue;
                }
                for entry in walkdir::WalkDir::new(&dir)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                {
                    let path = entry.path();
                    if !is_elf(path) {
                        continue;
                    }
                    // statically linked images have nothing to resolve
                    match elf_needed(path) {
                        Ok(needed) if needed.is_empty() => continue,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("unparseable ELF {}: {}", path.display(), e);
                            continue;
                        }
                    }
                    let missing = unresolved_libs(path);
                    if !missing.is_empty() {
                        info!("{}: {} misses {}", record.key(), path.display(), missing.join(", "));
                        broken.push(BrokenLib {
                            pkg: record.key(),
                            file: path.display().to_string(),
                            ldd: missing,
                        });
                        // one broken binary condemns the package
                        break 'package;
                    }
                }
            }
        }
        Ok(broken)
    }

    /// Depclean: resolver orphans paired with their prefixes
    pub fn depclean_scan(&self) -> Result<Vec<OrphanEntry>> {
        let resolver = Resolver::new(self.ports, self.db);
        let mut entries = Vec::new();
        for name in resolver.orphans()? {
            let prefix = self.db.get(&name).map(|r| r.prefix).unwrap_or_default();
            entries.push(OrphanEntry { pkg: name, prefix });
        }
        Ok(entries)
    }

    /// Dangling symlinks under the installed prefixes
    pub fn broken_symlinks(&self) -> Result<Vec<BrokenSymlink>> {
        let mut found = Vec::new();
        for record in self.db.list()? {
            let prefix = Path::new(&record.prefix);
            if !prefix.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(prefix)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path_is_symlink())
            {
                if !entry.path().exists() {
                    found.push(BrokenSymlink {
                        path: entry.path().display().to_string(),
                    });
                }
            }
        }
        Ok(found)
    }

    /// Leftover libtool archives under the installed prefixes
    pub fn la_files(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for record in self.db.list()? {
            let prefix = Path::new(&record.prefix);
            if !prefix.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(prefix)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("la") {
                    found.push(entry.path().display().to_string());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Python site-packages entries no installed package accounts for
    pub fn python_orphans(&self) -> Result<Vec<String>> {
        let installed: Vec<String> = self
            .db
            .list()?
            .iter()
            .map(|r| r.name.to_lowercase().replace('-', "_"))
            .collect();
        let mut orphans = Vec::new();
        for lib_dir in ["/usr/lib", "/usr/lib64"] {
            let Ok(pythons) = std::fs::read_dir(lib_dir) else {
                continue;
            };
            for python in pythons.filter_map(|e| e.ok()) {
                let name = python.file_name();
                if !name.to_string_lossy().starts_with("python") {
                    continue;
                }
                let site = python.path().join("site-packages");
                let Ok(packages) = std::fs::read_dir(&site) else {
                    continue;
                };
                for package in packages.filter_map(|e| e.ok()) {
                    let pkg_name = package.file_name().to_string_lossy().to_lowercase();
                    if pkg_name.starts_with('_') || pkg_name.ends_with(".dist-info") {
                        continue;
                    }
                    let base = pkg_name.split('.').next().unwrap_or(&pkg_name).to_string();
                    if !installed.iter().any(|i| i.contains(&base)) {
                        orphans.push(package.path().display().to_string());
                    }
                }
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    /// Invoke an external vulnerability scanner when one is installed;
    /// absence is not a finding.
    pub fn security_scan(&self) -> Option<serde_json::Value> {
        let scanner = "porg-security-scan";
        let mut child = Command::new(scanner)
            .arg("--json")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        match child.wait_timeout(SCANNER_TIMEOUT) {
            Ok(Some(status)) if status.success() => {
                let output = child.wait_with_output().ok()?;
                serde_json::from_slice(&output.stdout).ok()
            }
            Ok(Some(_)) => None,
            Ok(None) => {
                warn!("{} exceeded {:?}, killing it", scanner, SCANNER_TIMEOUT);
                let _ = child.kill();
                None
            }
            Err(e) => {
                debug!("{} failed: {}", scanner, e);
                None
            }
        }
    }

    /// Run every scan and collate the report
    pub fn full_report(&self) -> Result<AuditReport> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| Error::IoError(format!("uname failed: {e}")))?;
        Ok(AuditReport {
            generated_at: Utc::now().to_rfc3339(),
            host: uts.nodename().to_string_lossy().to_string(),
            kernel: uts.release().to_string_lossy().to_string(),
            broken_libs: self.revdep_scan()?,
            broken_symlinks: self.broken_symlinks()?,
            orphans: self.depclean_scan()?,
            pkgconf_la: self.la_files()?,
            python_orphans: self.python_orphans()?,
            security: self.security_scan(),
        })
    }

    /// Write a report under `LOG_DIR` and return its path
    pub fn write_report(&self, report: &AuditReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.log_dir)?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = self.config.log_dir.join(format!("audit-{stamp}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
        info!("audit report written to {}", path.display());
        Ok(path)
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
                log_dir: dir.path().join("log"),
                ..Config::default()
            },
            db: InstalledDb::new(dir.path().join("installed.json")),
            ports: PortsTree::new(&ports_root),
            dir,
        }
    }

    #[test]
    fn test_revdep_skips_healthy_scripts() {
        let f = fixture();
        let prefix = f.dir.path().join("opt/tool");
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        std::fs::write(prefix.join("bin/tool"), b"#!/bin/sh\nexit 0\n").unwrap();
        f.db.register("tool", "1.0", prefix.to_str().unwrap(), vec![], BTreeMap::new())
            .unwrap();

        let auditor = Auditor::new(&f.config, &f.db, &f.ports);
        assert!(auditor.revdep_scan().unwrap().is_empty());
    }

    #[test]
    fn test_broken_symlink_detected() {
        let f = fixture();
        let prefix = f.dir.path().join("opt/tool");
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", prefix.join("bin/dangling")).unwrap();
        f.db.register("tool", "1.0", prefix.to_str().unwrap(), vec![], BTreeMap::new())
            .unwrap();

        let auditor = Auditor::new(&f.config, &f.db, &f.ports);
        let symlinks = auditor.broken_symlinks().unwrap();
        assert_eq!(symlinks.len(), 1);
        assert!(symlinks[0].path.ends_with("dangling"));
    }

    #[test]
    fn test_la_files_found() {
        let f = fixture();
        let prefix = f.dir.path().join("opt/lib");
        std::fs::create_dir_all(prefix.join("lib")).unwrap();
        std::fs::write(prefix.join("lib/libfoo.la"), b"# libtool\n").unwrap();
        std::fs::write(prefix.join("lib/libfoo.so"), b"\x7fELF").unwrap();
        f.db.register("libfoo", "1.0", prefix.to_str().unwrap(), vec![], BTreeMap::new())
            .unwrap();

        let auditor = Auditor::new(&f.config, &f.db, &f.ports);
        let la = auditor.la_files().unwrap();
        assert_eq!(la.len(), 1);
        assert!(la[0].ends_with("libfoo.la"));
    }

    #[test]
    fn test_report_written_with_schema() {
        let f = fixture();
        let auditor = Auditor::new(&f.config, &f.db, &f.ports);
        let report = auditor.full_report().unwrap();
        assert!(!report.has_findings());

        let path = auditor.write_report(&report).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        for field in [
            "generated_at",
            "host",
            "kernel",
            "broken_libs",
            "broken_symlinks",
            "orphans",
            "pkgconf_la",
            "python_orphans",
            "security",
        ] {
            assert!(parsed.get(field).is_some(), "missing field {field}");
        }
    }

    #[test]
    fn test_orphans_include_prefix() {
        let f = fixture();
        let prefix = f.dir.path().join("opt/stray");
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        f.db.register("stray", "0.1", prefix.to_str().unwrap(), vec![], BTreeMap::new())
            .unwrap();

        let auditor = Auditor::new(&f.config, &f.db, &f.ports);
        let orphans = auditor.depclean_scan().unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].pkg, "stray");
        assert_eq!(orphans[0].prefix, prefix.to_str().unwrap());
    }
}
