// tests/common/mod.rs

//! Shared fixtures for integration tests
//!
//! Everything runs against temp directories: a private ports tree, a
//! private installed DB and a config whose paths all stay inside the
//! fixture. Keep the `TempDir` alive for the duration of the test.

// not every test binary uses every helper
#![allow(dead_code)]

use porg::{Config, InstalledDb, PortsTree};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub db: InstalledDb,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            ports_dir: dir.path().join("ports"),
            workdir: dir.path().join("work"),
            cache_dir: dir.path().join("cache"),
            log_dir: dir.path().join("log"),
            hooks_dir: dir.path().join("hooks"),
            installed_db: dir.path().join("db/installed.json"),
            lfs_root: dir.path().join("lfs"),
            ..Config::default()
        };
        std::fs::create_dir_all(&config.ports_dir).unwrap();
        let db = InstalledDb::new(&config.installed_db);
        Self { dir, config, db }
    }

    pub fn ports(&self) -> PortsTree {
        PortsTree::new(&self.config.ports_dir)
    }

    /// Drop a recipe file into the ports tree and return its directory
    pub fn add_recipe(&self, name: &str, version: &str, body: &str) -> PathBuf {
        let dir = self.config.ports_dir.join("main").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let text = format!("name: {name}\nversion: {version}\n{body}");
        std::fs::write(dir.join(format!("{name}-{version}.yaml")), text).unwrap();
        dir
    }

    /// Register an installed record with a real (temp) prefix
    pub fn install(&self, name: &str, version: &str, deps: &[&str]) -> String {
        let prefix = self.dir.path().join("opt").join(name);
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        self.db
            .register(
                name,
                version,
                prefix.to_str().unwrap(),
                deps.iter().map(|s| s.to_string()).collect(),
                BTreeMap::new(),
            )
            .unwrap();
        prefix.to_str().unwrap().to_string()
    }

    /// Create a `file://` source tarball holding one `hello` script;
    /// returns (url, sha256).
    pub fn make_source_tarball(&self, name: &str, version: &str) -> (String, String) {
        let tree = self.dir.path().join(format!("{name}-{version}"));
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("hello"), b"#!/bin/sh\necho hello\n").unwrap();

        let tarball = self.dir.path().join(format!("{name}-{version}.tar.gz"));
        let status = Command::new("tar")
            .args([
                "-czf",
                tarball.to_str().unwrap(),
                "-C",
                self.dir.path().to_str().unwrap(),
                &format!("{name}-{version}"),
            ])
            .status()
            .unwrap();
        assert!(status.success());

        let digest = porg::source::sha256_file(&tarball).unwrap();
        (format!("file://{}", tarball.display()), digest)
    }
}

/// Test isolation: run the command directly on the host, mapping the
/// sandbox's in-tree paths back to their host locations.
pub struct HostExec;

impl porg::sandbox::Isolation for HostExec {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn run(&self, spec: &porg::sandbox::SandboxSpec, command: &str) -> porg::Result<i32> {
        let cwd = spec
            .binds_rw
            .iter()
            .find(|(_, inside)| inside == &spec.workdir)
            .map(|(host, _)| host.clone())
            .unwrap_or_else(|| spec.root.clone());
        let destdir = spec.root.join("destdir");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&cwd);
        for (key, value) in &spec.env {
            if key == "DESTDIR" {
                cmd.env(key, &destdir);
            } else {
                cmd.env(key, value);
            }
        }
        let status = cmd
            .status()
            .map_err(|e| porg::Error::IoError(e.to_string()))?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// A temp prefix string for recipes that need one
pub fn temp_prefix(fixture: &Fixture, name: &str) -> String {
    let prefix = fixture.dir.path().join("prefix").join(name);
    std::fs::create_dir_all(&prefix).unwrap();
    prefix.to_str().unwrap().to_string()
}
