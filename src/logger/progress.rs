// src/logger/progress.rs

//! Throttled single-line progress printer
//!
//! Redraws `[filled/total] percent load cpu rss eta` on one terminal line,
//! at most once per 100 ms. Load average comes from `/proc/loadavg`, CPU
//! and RSS from `/proc/self/{stat,status}`.

use std::io::Write;
use std::time::{Duration, Instant};

/// Minimum interval between redraws
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// A `[filled/total]` progress line
pub struct ProgressLine {
    label: String,
    total: u64,
    filled: u64,
    started: Instant,
    last_draw: Option<Instant>,
    enabled: bool,
}

impl ProgressLine {
    pub fn new(label: impl Into<String>, total: u64) -> Self {
        Self {
            label: label.into(),
            total,
            filled: 0,
            started: Instant::now(),
            last_draw: None,
            enabled: true,
        }
    }

    /// A disabled line swallows updates; used under --quiet
    pub fn disabled() -> Self {
        let mut line = Self::new("", 0);
        line.enabled = false;
        line
    }

    pub fn advance(&mut self, amount: u64) {
        self.set(self.filled + amount);
    }

    pub fn set(&mut self, filled: u64) {
        self.filled = filled;
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if let Some(last) = self.last_draw {
            if now.duration_since(last) < REDRAW_INTERVAL && self.filled < self.total {
                return;
            }
        }
        self.last_draw = Some(now);
        self.draw();
    }

    /// End the line, leaving the final state visible
    pub fn finish(&mut self) {
        if !self.enabled {
            return;
        }
        self.last_draw = None;
        self.draw();
        eprintln!();
    }

    fn draw(&self) {
        let percent = if self.total > 0 {
            self.filled as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
        let eta = self.eta_seconds();
        let line = format!(
            "\r{} [{}/{}] {:5.1}% load {} cpu {:4.1}% rss {} MiB eta {}   ",
            self.label,
            self.filled,
            self.total,
            percent,
            load_average().unwrap_or_else(|| "?".to_string()),
            cpu_percent().unwrap_or(0.0),
            rss_mib().unwrap_or(0),
            format_eta(eta),
        );
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }

    fn eta_seconds(&self) -> Option<u64> {
        if self.filled == 0 || self.total == 0 || self.filled >= self.total {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = self.filled as f64 / elapsed;
        Some(((self.total - self.filled) as f64 / rate) as u64)
    }
}

fn format_eta(eta: Option<u64>) -> String {
    match eta {
        Some(secs) if secs >= 3600 => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
        Some(secs) if secs >= 60 => format!("{}m{:02}s", secs / 60, secs % 60),
        Some(secs) => format!("{secs}s"),
        None => "--".to_string(),
    }
}

/// One-minute load average from /proc/loadavg
fn load_average() -> Option<String> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    content.split_whitespace().next().map(str::to_string)
}

/// Process CPU share since start, from /proc/self/stat utime+stime
fn cpu_percent() -> Option<f64> {
    let content = std::fs::read_to_string("/proc/self/stat").ok()?;
    // fields 14 and 15 (1-based) after the parenthesized comm
    let after_comm = content.rsplit(')').next()?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let ticks = utime + stime;
    let hz = 100.0; // USER_HZ on every supported target
    let uptime = std::fs::read_to_string("/proc/uptime").ok()?;
    let start: f64 = uptime.split_whitespace().next()?.parse().ok()?;
    if start <= 0.0 {
        return None;
    }
    Some((ticks as f64 / hz) / start * 100.0)
}

/// Resident set size in MiB from /proc/self/status VmRSS
fn rss_mib() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vmrss_kib(&content).map(|kib| kib / 1024)
}

/// Extract VmRSS (kB) from a /proc status blob
pub(crate) fn parse_vmrss_kib(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vmrss() {
        let status = "Name:\tporg\nVmPeak:\t  200 kB\nVmRSS:\t  14336 kB\n";
        assert_eq!(parse_vmrss_kib(status), Some(14336));
        assert_eq!(parse_vmrss_kib("Name: x\n"), None);
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(42)), "42s");
        assert_eq!(format_eta(Some(125)), "2m05s");
        assert_eq!(format_eta(Some(7322)), "2h02m");
    }

    #[test]
    fn test_disabled_line_is_silent() {
        let mut line = ProgressLine::disabled();
        line.advance(10);
        line.finish();
    }

    #[test]
    fn test_eta_none_at_start_and_end() {
        let mut line = ProgressLine::new("x", 10);
        assert_eq!(line.eta_seconds(), None);
        line.filled = 10;
        assert_eq!(line.eta_seconds(), None);
        line.filled = 5;
        assert!(line.eta_seconds().is_some());
    }
}
