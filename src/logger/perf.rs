// src/logger/perf.rs

//! Perf wrapper: run a child command while sampling its memory
//!
//! Samples `/proc/{pid}/status` VmRSS at 100 ms intervals until the child
//! exits, then reports peak RSS, wall time and exit code as a structured
//! PERF line on the session log.

use super::progress::parse_vmrss_kib;
use super::SessionLogger;
use crate::error::{Error, Result};
use serde::Serialize;
use std::process::Command;
use std::time::{Duration, Instant};

/// Sampling cadence
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a perf-wrapped command
#[derive(Debug, Clone, Serialize)]
pub struct PerfReport {
    pub command: String,
    pub exit_code: i32,
    pub wall_secs: f64,
    pub peak_rss_kib: u64,
    pub samples: u64,
}

/// Spawn `program args...`, sample its VmRSS until exit, and emit a PERF
/// line on `logger` when one is given.
pub fn run_with_perf(
    program: &str,
    args: &[String],
    logger: Option<&SessionLogger>,
) -> Result<PerfReport> {
    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|e| Error::IoError(format!("failed to spawn {program}: {e}")))?;
    let pid = child.id();
    let status_path = format!("/proc/{pid}/status");

    let mut peak_rss_kib = 0u64;
    let mut samples = 0u64;
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code().unwrap_or(-1),
            Ok(None) => {
                if let Ok(status) = std::fs::read_to_string(&status_path) {
                    if let Some(rss) = parse_vmrss_kib(&status) {
                        peak_rss_kib = peak_rss_kib.max(rss);
                        samples += 1;
                    }
                }
                std::thread::sleep(SAMPLE_INTERVAL);
            }
            Err(e) => return Err(Error::IoError(format!("wait on {program} failed: {e}"))),
        }
    };

    let report = PerfReport {
        command: if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        },
        exit_code,
        wall_secs: started.elapsed().as_secs_f64(),
        peak_rss_kib,
        samples,
    };
    if let Some(logger) = logger {
        logger.info(&format!(
            "PERF cmd='{}' exit={} wall={:.2}s peak_rss={}KiB samples={}",
            report.command, report.exit_code, report.wall_secs, report.peak_rss_kib, report.samples
        ));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_captures_exit_code() {
        let report = run_with_perf("sh", &["-c".into(), "exit 3".into()], None).unwrap();
        assert_eq!(report.exit_code, 3);
        assert!(report.wall_secs >= 0.0);
    }

    #[test]
    fn test_perf_samples_long_child() {
        let report =
            run_with_perf("sh", &["-c".into(), "sleep 0.35".into()], None).unwrap();
        assert_eq!(report.exit_code, 0);
        assert!(report.samples >= 1, "expected at least one sample");
        assert!(report.peak_rss_kib > 0);
    }

    #[test]
    fn test_perf_missing_program() {
        assert!(run_with_perf("/nonexistent/prog", &[], None).is_err());
    }
}
