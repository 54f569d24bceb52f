// src/db/mod.rs

//! Installed-package database
//!
//! A single JSON object mapping `"{name}-{version}"` to an installed
//! record, sorted by key for diff-friendliness. This module exclusively
//! owns the file: every mutation takes the lock directory, rewrites the
//! whole document to a temp file in the same directory and renames it into
//! place, so readers observe either the previous or the new content and
//! never a torn write.

mod lock;

pub use lock::DirLock;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefixes that are never deleted or treated as package-private
pub const CRITICAL_PREFIXES: &[&str] = &["/", "/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc"];

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub name: String,
    pub version: String,
    pub prefix: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl InstalledRecord {
    pub fn key(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Aggregate numbers for `porg audit`
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub packages: usize,
    pub approx_bytes: u64,
}

/// A problem found by `verify`
#[derive(Debug, Clone, Serialize)]
pub struct VerifyIssue {
    pub key: String,
    pub problem: String,
}

/// Handle on the installed DB file
#[derive(Debug, Clone)]
pub struct InstalledDb {
    path: PathBuf,
}

impl InstalledDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Load the whole map; a missing file is an empty DB
    fn load(&self) -> Result<BTreeMap<String, InstalledRecord>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::DbCorrupt(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write-to-temp-then-rename in the DB's own directory
    fn store(&self, records: &BTreeMap<String, InstalledRecord>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("bad DB path {}", self.path.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| Error::IoError(format!("failed to create temp DB file: {e}")))?;
        let json = serde_json::to_string_pretty(records)?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| Error::IoError(format!("failed to replace DB file: {e}")))?;
        Ok(())
    }

    /// Insert a record; the single-version invariant removes any other
    /// version of the same name first.
    pub fn register(
        &self,
        name: &str,
        version: &str,
        prefix: &str,
        dependencies: Vec<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<InstalledRecord> {
        validate_prefix(prefix)?;
        let _lock = DirLock::acquire(self.lock_path())?;

        let mut records = self.load()?;
        records.retain(|_, r| r.name != name);

        let record = InstalledRecord {
            name: name.to_string(),
            version: version.to_string(),
            prefix: prefix.to_string(),
            installed_at: Utc::now(),
            dependencies,
            metadata,
        };
        info!("registering {}", record.key());
        records.insert(record.key(), record.clone());
        self.store(&records)?;
        Ok(record)
    }

    /// Remove all records matching a partial key; returns the removed keys
    pub fn unregister(&self, query: &str) -> Result<Vec<String>> {
        let _lock = DirLock::acquire(self.lock_path())?;

        let mut records = self.load()?;
        let removed: Vec<String> = records
            .iter()
            .filter(|(key, record)| key_matches(query, key, &record.name))
            .map(|(key, _)| key.clone())
            .collect();
        if removed.is_empty() {
            return Err(Error::NotFound(query.to_string()));
        }
        for key in &removed {
            records.remove(key);
        }
        info!("unregistered {}", removed.join(", "));
        self.store(&records)?;
        Ok(removed)
    }

    /// First record matching a partial key
    pub fn get(&self, query: &str) -> Result<InstalledRecord> {
        self.load()?
            .into_iter()
            .find(|(key, record)| key_matches(query, key, &record.name))
            .map(|(_, record)| record)
            .ok_or_else(|| Error::NotFound(query.to_string()))
    }

    /// All records, in key order
    pub fn list(&self) -> Result<Vec<InstalledRecord>> {
        Ok(self.load()?.into_values().collect())
    }

    pub fn is_installed(&self, query: &str) -> Result<bool> {
        Ok(self
            .load()?
            .iter()
            .any(|(key, record)| key_matches(query, key, &record.name)))
    }

    /// Copy the current DB to `dest/installed.json.bak.{ts}`
    pub fn backup(&self, dest_dir: Option<&Path>) -> Result<PathBuf> {
        let dest_dir = match dest_dir {
            Some(d) => d.to_path_buf(),
            None => self
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        std::fs::create_dir_all(&dest_dir)?;
        let ts = Utc::now().format("%Y%m%d%H%M%S");
        let dest = dest_dir.join(format!("installed.json.bak.{ts}"));
        if self.path.exists() {
            std::fs::copy(&self.path, &dest)?;
        } else {
            std::fs::write(&dest, b"{}\n")?;
        }
        debug!("backed up DB to {}", dest.display());
        Ok(dest)
    }

    /// Replace the DB with the contents of a backup file
    pub fn restore(&self, src: &Path) -> Result<()> {
        if !src.is_file() {
            return Err(Error::NotFound(src.display().to_string()));
        }
        let content = std::fs::read_to_string(src)?;
        let records: BTreeMap<String, InstalledRecord> = serde_json::from_str(&content)
            .map_err(|e| Error::DbCorrupt(format!("invalid backup {}: {}", src.display(), e)))?;

        let _lock = DirLock::acquire(self.lock_path())?;
        self.store(&records)?;
        info!("restored DB from {}", src.display());
        Ok(())
    }

    /// Package count and an approximate on-disk total across prefixes
    pub fn stats(&self) -> Result<DbStats> {
        let records = self.load()?;
        let mut prefixes: Vec<&str> = records.values().map(|r| r.prefix.as_str()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();

        let mut approx_bytes = 0u64;
        for prefix in prefixes {
            // critical prefixes hold far more than our packages; skip them
            if CRITICAL_PREFIXES.contains(&prefix) {
                continue;
            }
            for entry in walkdir::WalkDir::new(prefix)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if let Ok(meta) = entry.metadata() {
                    if meta.is_file() {
                        approx_bytes += meta.len();
                    }
                }
            }
        }
        Ok(DbStats {
            packages: records.len(),
            approx_bytes,
        })
    }

    /// Sanity-check every record's prefix on disk
    pub fn verify(&self) -> Result<Vec<VerifyIssue>> {
        let records = self.load()?;
        let mut issues = Vec::new();
        for (key, record) in &records {
            let prefix = Path::new(&record.prefix);
            if !prefix.is_dir() {
                issues.push(VerifyIssue {
                    key: key.clone(),
                    problem: format!("prefix {} does not exist", record.prefix),
                });
            } else if !prefix.join("bin").is_dir() && !prefix.join("usr/bin").is_dir() {
                issues.push(VerifyIssue {
                    key: key.clone(),
                    problem: format!("prefix {} has no bin or usr/bin", record.prefix),
                });
            }
        }
        Ok(issues)
    }
}

/// Partial-key matching used uniformly by get/unregister/is_installed:
/// exact key, `"{query}-"` key prefix, or name-field equality.
fn key_matches(query: &str, key: &str, name: &str) -> bool {
    key == query || key.starts_with(&format!("{query}-")) || name == query
}

/// A registerable prefix is `/` or an existing/creatable writable directory
fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix == "/" {
        return Ok(());
    }
    if prefix.is_empty() || !prefix.starts_with('/') {
        return Err(Error::InvalidInput(format!("invalid prefix '{prefix}'")));
    }
    let path = Path::new(prefix);
    if !path.is_dir() {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::InvalidInput(format!("prefix '{prefix}' not creatable: {e}")))?;
    }
    let probe = path.join(".porg-write-probe");
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(e) => Err(Error::InvalidInput(format!(
            "prefix '{prefix}' not writable: {e}"
        ))),
    }
}
