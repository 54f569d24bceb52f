// src/config.rs

//! Runtime configuration loaded from /etc/porg/porg.conf
//!
//! The config file is plain `KEY=VALUE` lines; `#` starts a comment and
//! values may be single- or double-quoted. Unrecognized keys are preserved
//! so newer tools can round-trip older files.

use crate::error::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file location
pub const DEFAULT_CONF_PATH: &str = "/etc/porg/porg.conf";

/// Isolation primitive selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChrootMethod {
    /// Namespace sandbox (unshare + bind mounts)
    #[default]
    Sandbox,
    /// Plain chroot; requires privilege
    Chroot,
}

/// Artifact compression selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackageFormat {
    #[default]
    Zstd,
    Xz,
    Gzip,
    Tar,
}

impl PackageFormat {
    /// File extension after `.tar`
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zstd => "tar.zst",
            Self::Xz => "tar.xz",
            Self::Gzip => "tar.gz",
            Self::Tar => "tar",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "zst" | "zstd" => Some(Self::Zstd),
            "xz" => Some(Self::Xz),
            "gz" | "gzip" => Some(Self::Gzip),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Recipe tree root
    pub ports_dir: PathBuf,
    /// Per-build work base
    pub workdir: PathBuf,
    /// Source and artifact cache
    pub cache_dir: PathBuf,
    /// Session logs and reports
    pub log_dir: PathBuf,
    /// Global hook scripts: `<hooks_dir>/<stage>/*` with the executable bit
    pub hooks_dir: PathBuf,
    /// Minimum level written to the session log
    pub log_level: String,
    /// Colorize terminal output
    pub log_color: bool,
    /// Mirror events as JSON lines alongside the text log
    pub log_json: bool,
    /// Compress session logs older than this many days
    pub log_rotate_days: u32,
    /// Installed DB file
    pub installed_db: PathBuf,
    /// Build parallelism exported as JOBS
    pub jobs: usize,
    /// Isolation primitive
    pub chroot_method: ChrootMethod,
    /// Artifact compression
    pub package_format: PackageFormat,
    /// Run the strip pass over staged ELF files
    pub strip_binaries: bool,
    /// Fail when a signature URL is present but verification fails
    pub strict_gpg: bool,
    /// Trusted keyring for gpgv
    pub gpg_keyring: Option<PathBuf>,
    /// Orchestrator-level parallelism bound
    pub parallel_n: usize,
    /// Bootstrap root
    pub lfs_root: PathBuf,
    /// Bootstrap build user
    pub lfs_user: String,
    /// Bootstrap target triplet
    pub lfs_target: String,
    /// Ports sync remote
    pub git_repo: Option<String>,
    /// Ports sync branch
    pub git_branch: String,
    /// Keys we did not recognize, preserved verbatim
    pub extra: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            ports_dir: PathBuf::from("/usr/ports"),
            workdir: PathBuf::from("/var/tmp/porg"),
            cache_dir: PathBuf::from("/var/cache/porg"),
            log_dir: PathBuf::from("/var/log/porg"),
            hooks_dir: PathBuf::from("/etc/porg/hooks"),
            log_level: "INFO".to_string(),
            log_color: true,
            log_json: false,
            log_rotate_days: 14,
            installed_db: PathBuf::from("/var/lib/porg/db/installed.json"),
            jobs,
            chroot_method: ChrootMethod::Sandbox,
            package_format: PackageFormat::Zstd,
            strip_binaries: true,
            strict_gpg: false,
            gpg_keyring: None,
            parallel_n: 1,
            lfs_root: PathBuf::from("/mnt/lfs"),
            lfs_user: "lfs".to_string(),
            lfs_target: "x86_64-lfs-linux-gnu".to_string(),
            git_repo: None,
            git_branch: "main".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONF_PATH))
    }

    /// Load from a specific path; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if !path.is_file() {
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)?;
        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = unquote(value.trim());
            config.apply(key, &value);
        }
        Ok(config)
    }

    /// Apply a single KEY=VALUE pair
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "PORTS_DIR" => self.ports_dir = PathBuf::from(value),
            "WORKDIR" => self.workdir = PathBuf::from(value),
            "CACHE_DIR" => self.cache_dir = PathBuf::from(value),
            "LOG_DIR" => self.log_dir = PathBuf::from(value),
            "LOG_LEVEL" => self.log_level = value.to_uppercase(),
            "LOG_COLOR" => self.log_color = parse_bool(value, self.log_color),
            "LOG_JSON" => self.log_json = parse_bool(value, self.log_json),
            "LOG_ROTATE_DAYS" => {
                if let Ok(n) = value.parse() {
                    self.log_rotate_days = n;
                }
            }
            "INSTALLED_DB" => self.installed_db = PathBuf::from(value),
            "JOBS" => {
                if let Ok(n) = value.parse::<usize>() {
                    if n > 0 {
                        self.jobs = n;
                    }
                }
            }
            "CHROOT_METHOD" => {
                self.chroot_method = match value {
                    "chroot" => ChrootMethod::Chroot,
                    _ => ChrootMethod::Sandbox,
                }
            }
            "PACKAGE_FORMAT" => {
                if let Some(f) = PackageFormat::parse(value) {
                    self.package_format = f;
                }
            }
            "STRIP_BINARIES" => self.strip_binaries = parse_bool(value, self.strip_binaries),
            "STRICT_GPG" => self.strict_gpg = parse_bool(value, self.strict_gpg),
            "GPG_KEYRING" => self.gpg_keyring = Some(PathBuf::from(value)),
            "PARALLEL_N" => {
                if let Ok(n) = value.parse::<usize>() {
                    if n > 0 {
                        self.parallel_n = n;
                    }
                }
            }
            "LFS" => self.lfs_root = PathBuf::from(value),
            "LFS_USER" => self.lfs_user = value.to_string(),
            "LFS_TGT" => self.lfs_target = value.to_string(),
            "GIT_REPO" => self.git_repo = Some(value.to_string()),
            "GIT_BRANCH" => self.git_branch = value.to_string(),
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    /// Staging base for a given recipe stage
    pub fn stage_base(&self, bootstrap: bool) -> PathBuf {
        if bootstrap {
            self.lfs_root.join("porg-stage")
        } else {
            self.workdir.join("stage")
        }
    }
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => true,
        "0" | "no" | "false" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("porg.conf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/porg.conf")).unwrap();
        assert_eq!(config.ports_dir, PathBuf::from("/usr/ports"));
        assert_eq!(config.package_format, PackageFormat::Zstd);
    }

    #[test]
    fn test_parse_known_keys() {
        let (_dir, path) = write_conf(
            "PORTS_DIR=/srv/ports\n\
             JOBS=8\n\
             PACKAGE_FORMAT=xz   # prefer xz\n\
             CHROOT_METHOD=chroot\n\
             STRICT_GPG=yes\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ports_dir, PathBuf::from("/srv/ports"));
        assert_eq!(config.jobs, 8);
        assert_eq!(config.package_format, PackageFormat::Xz);
        assert_eq!(config.chroot_method, ChrootMethod::Chroot);
        assert!(config.strict_gpg);
    }

    #[test]
    fn test_quoted_values_and_comments() {
        let (_dir, path) = write_conf(
            "# porg configuration\n\
             LOG_DIR=\"/var/log/porg-test\"\n\
             LFS_USER='builder'\n\
             \n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/var/log/porg-test"));
        assert_eq!(config.lfs_user, "builder");
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let (_dir, path) = write_conf("FUTURE_KNOB=whatever\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.extra.get("FUTURE_KNOB").map(String::as_str), Some("whatever"));
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let (_dir, path) = write_conf("JOBS=0\n");
        let config = Config::load(&path).unwrap();
        assert!(config.jobs >= 1);
    }

    #[test]
    fn test_package_format_extensions() {
        assert_eq!(PackageFormat::Zstd.extension(), "tar.zst");
        assert_eq!(PackageFormat::Tar.extension(), "tar");
    }
}
