// src/logger/mod.rs

//! Session-scoped logging
//!
//! Each orchestrator run owns one session log file under `LOG_DIR`. Events
//! are leveled (`DEBUG < INFO < WARN < ERROR < STAGE`), timestamped in UTC,
//! counted per level, and optionally mirrored as JSON lines. Writes are
//! line-buffered so concurrent appenders interleave at message granularity.
//!
//! Module-internal diagnostics continue to go through `tracing`; the
//! session log is the user-facing record of a run.

mod perf;
mod progress;

pub use perf::{run_with_perf, PerfReport};
pub use progress::ProgressLine;

use crate::error::Result;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Event severity; STAGE marks pipeline milestones and always prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Stage,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Stage => "STAGE",
        }
    }

    pub fn parse(s: &str) -> Level {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Level::Debug,
            "WARN" => Level::Warn,
            "ERROR" => Level::Error,
            "STAGE" => Level::Stage,
            _ => Level::Info,
        }
    }
}

/// Per-level event counters for the end-of-run summary
#[derive(Debug, Default, Clone, Serialize)]
pub struct LevelCounters {
    pub debug: u64,
    pub info: u64,
    pub warn: u64,
    pub error: u64,
    pub stage: u64,
}

struct Inner {
    file: BufWriter<File>,
    json: Option<BufWriter<File>>,
    counters: LevelCounters,
}

/// One session's log appender
pub struct SessionLogger {
    path: PathBuf,
    min_level: Level,
    quiet: bool,
    color: bool,
    inner: Mutex<Inner>,
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    ts: String,
    level: &'static str,
    message: &'a str,
}

impl SessionLogger {
    /// Open a new session log `porg-YYYYmmdd-HHMMSS.log` under `log_dir`
    pub fn open(log_dir: &Path, min_level: Level, quiet: bool, json_mirror: bool) -> Result<Self> {
        Self::open_with_color(log_dir, min_level, quiet, json_mirror, false)
    }

    /// `open`, with colored terminal output per `LOG_COLOR`
    pub fn open_with_color(
        log_dir: &Path,
        min_level: Level,
        quiet: bool,
        json_mirror: bool,
        color: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = log_dir.join(format!("porg-{stamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let json = if json_mirror {
            let json_path = path.with_extension("jsonl");
            Some(BufWriter::new(
                OpenOptions::new().create(true).append(true).open(json_path)?,
            ))
        } else {
            None
        };
        Ok(Self {
            path,
            min_level,
            quiet,
            color,
            inner: Mutex::new(Inner {
                file: BufWriter::new(file),
                json,
                counters: LevelCounters::default(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event; flushed per line so interleaving stays
    /// message-atomic across processes sharing the file.
    pub fn event(&self, level: Level, message: &str) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match level {
            Level::Debug => inner.counters.debug += 1,
            Level::Info => inner.counters.info += 1,
            Level::Warn => inner.counters.warn += 1,
            Level::Error => inner.counters.error += 1,
            Level::Stage => inner.counters.stage += 1,
        }
        if level < self.min_level {
            return;
        }
        let ts = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let line = format!("{ts} [{}] {message}\n", level.as_str());
        if inner.file.write_all(line.as_bytes()).is_ok() {
            let _ = inner.file.flush();
        }
        if let Some(json) = inner.json.as_mut() {
            let event = JsonEvent {
                ts: ts.to_string(),
                level: level.as_str(),
                message,
            };
            if let Ok(mut encoded) = serde_json::to_vec(&event) {
                encoded.push(b'\n');
                if json.write_all(&encoded).is_ok() {
                    let _ = json.flush();
                }
            }
        }
        if !self.quiet || level >= Level::Error {
            if self.color {
                println!("\x1b[{}m[{}]\x1b[0m {message}", level_color(level), level.as_str());
            } else {
                println!("[{}] {message}", level.as_str());
            }
        }
    }

    pub fn debug(&self, message: &str) {
        self.event(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.event(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.event(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.event(Level::Error, message);
    }

    pub fn stage(&self, message: &str) {
        self.event(Level::Stage, message);
    }

    pub fn counters(&self) -> LevelCounters {
        match self.inner.lock() {
            Ok(guard) => guard.counters.clone(),
            Err(poisoned) => poisoned.into_inner().counters.clone(),
        }
    }
}

/// ANSI color for a level's terminal tag
fn level_color(level: Level) -> &'static str {
    match level {
        Level::Debug => "2",
        Level::Info => "32",
        Level::Warn => "33",
        Level::Error => "31",
        Level::Stage => "1;36",
    }
}

/// Compress session logs older than `compress_days`; delete compressed
/// logs older than `remove_days`.
pub fn rotate_logs(log_dir: &Path, compress_days: u32, remove_days: u32) -> Result<(usize, usize)> {
    let mut compressed = 0;
    let mut removed = 0;
    let now = std::time::SystemTime::now();
    let day = std::time::Duration::from_secs(24 * 3600);

    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return Ok((0, 0));
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) if n.starts_with("porg-") => n.to_string(),
            _ => continue,
        };
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let Ok(age) = now.duration_since(modified) else { continue };

        if name.ends_with(".gz") {
            if age > day * remove_days {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        } else if (name.ends_with(".log") || name.ends_with(".jsonl")) && age > day * compress_days {
            match compress_file(&path) {
                Ok(()) => {
                    let _ = std::fs::remove_file(&path);
                    compressed += 1;
                }
                Err(e) => warn!("failed to compress {}: {}", path.display(), e),
            }
        }
    }
    Ok((compressed, removed))
}

fn compress_file(path: &Path) -> Result<()> {
    let mut input = File::open(path)?;
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}
