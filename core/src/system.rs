//! Device telemetry for the sidebar and the "optimize performance" action.
//!
//! Nothing here touches the conversation store; failures are returned to the
//! caller, which reports them and carries on.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;
use tracing::info;

use crate::error::Result;

pub const MEMINFO_PATH: &str = "/proc/meminfo";

/// Memory usage at or above this percentage is flagged as high.
pub const HIGH_MEMORY_PERCENT: f64 = 80.0;

/// CPU temperature at or above this many degrees Celsius is flagged as high.
pub const HIGH_TEMPERATURE_CELSIUS: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemoryUsage {
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    /// Used memory in percent, rounded to one decimal.
    pub fn percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        round1(self.used_kb() as f64 * 100.0 / self.total_kb as f64)
    }
}

/// Snapshot shown in the sidebar. A `None` reading is displayed as
/// unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DeviceStats {
    pub memory_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
}

impl DeviceStats {
    pub fn memory_high(&self) -> bool {
        self.memory_percent.is_some_and(|p| p >= HIGH_MEMORY_PERCENT)
    }

    pub fn temperature_high(&self) -> bool {
        self.temperature_celsius.is_some_and(|t| t >= HIGH_TEMPERATURE_CELSIUS)
    }
}

/// Parse `/proc/meminfo`. `MemAvailable` is preferred; kernels that lack it
/// fall back to `MemFree`.
pub fn parse_meminfo(contents: &str) -> Option<MemoryUsage> {
    let mut total = None;
    let mut available = None;
    let mut free = None;
    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());
        match key.trim() {
            "MemTotal" => total = value,
            "MemAvailable" => available = value,
            "MemFree" => free = value,
            _ => {}
        }
    }
    Some(MemoryUsage {
        total_kb: total?,
        available_kb: available.or(free)?,
    })
}

/// Parse a thermal zone reading in millidegrees into degrees Celsius with one
/// decimal.
pub fn parse_millidegrees(contents: &str) -> Option<f64> {
    let milli: i64 = contents.trim().parse().ok()?;
    Some(round1(milli as f64 / 1000.0))
}

pub async fn read_memory_usage(path: &Path) -> Result<MemoryUsage> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse_meminfo(&contents)
        .ok_or_else(|| invalid_data(format!("unrecognized meminfo in {}", path.display())).into())
}

pub async fn read_cpu_temperature(path: &Path) -> Result<f64> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse_millidegrees(&contents).ok_or_else(|| {
        invalid_data(format!(
            "unrecognized temperature `{}` in {}",
            contents.trim(),
            path.display()
        ))
        .into()
    })
}

/// Read both gauges. Unreadable sources become `None`.
pub async fn collect_device_stats(meminfo_path: &Path, thermal_zone_path: &Path) -> DeviceStats {
    let memory_percent = match read_memory_usage(meminfo_path).await {
        Ok(usage) => Some(usage.percent()),
        Err(e) => {
            debug!("memory usage unavailable: {e}");
            None
        }
    };
    let temperature_celsius = match read_cpu_temperature(thermal_zone_path).await {
        Ok(celsius) => Some(celsius),
        Err(e) => {
            debug!("temperature unavailable: {e}");
            None
        }
    };
    DeviceStats {
        memory_percent,
        temperature_celsius,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl OptimizeReport {
    /// One-line summary for the status area.
    pub fn summary(&self) -> String {
        if self.success {
            let out = self.stdout.trim();
            if out.is_empty() {
                "Optimization complete".to_string()
            } else {
                format!("Optimization complete: {}", first_line(out))
            }
        } else {
            let detail = first_line(self.stderr.trim());
            match self.exit_code {
                Some(code) => format!("Optimization failed (exit {code}): {detail}"),
                None => format!("Optimization failed: {detail}"),
            }
        }
    }
}

/// Run the configured optimize command once and capture its output. The
/// command line is split with shell quoting rules; no shell is involved.
pub async fn run_optimize(command_line: &str) -> Result<OptimizeReport> {
    let argv = shlex::split(command_line)
        .filter(|argv| !argv.is_empty())
        .ok_or_else(|| invalid_data(format!("invalid optimize command `{command_line}`")))?;
    let (program, args) = argv.split_at(1);

    info!("running optimize command: {command_line}");
    let output = Command::new(&program[0])
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    let report = OptimizeReport {
        success: output.status.success(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    info!("optimize command finished: {:?}", report.exit_code);
    Ok(report)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const MEMINFO: &str = "\
MemTotal:        8000000 kB
MemFree:          500000 kB
MemAvailable:    1600000 kB
Buffers:          100000 kB
";

    #[test]
    fn meminfo_prefers_available() {
        let usage = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(
            usage,
            MemoryUsage {
                total_kb: 8_000_000,
                available_kb: 1_600_000,
            }
        );
        assert_eq!(usage.percent(), 80.0);
    }

    #[test]
    fn meminfo_falls_back_to_free() {
        let usage = parse_meminfo("MemTotal: 1000 kB\nMemFree: 250 kB\n").unwrap();
        assert_eq!(usage.percent(), 75.0);
        assert_eq!(parse_meminfo("Buffers: 1 kB\n"), None);
    }

    #[test]
    fn millidegrees_round_to_one_decimal() {
        assert_eq!(parse_millidegrees("45678\n"), Some(45.7));
        assert_eq!(parse_millidegrees("70000"), Some(70.0));
        assert_eq!(parse_millidegrees("hot"), None);
    }

    #[test]
    fn high_flags_use_inclusive_thresholds() {
        let stats = DeviceStats {
            memory_percent: Some(80.0),
            temperature_celsius: Some(69.9),
        };
        assert!(stats.memory_high());
        assert!(!stats.temperature_high());
        assert!(!DeviceStats::default().memory_high());
    }

    #[tokio::test]
    async fn collects_stats_from_files() {
        let dir = TempDir::new().unwrap();
        let meminfo = dir.path().join("meminfo");
        let thermal = dir.path().join("temp");
        std::fs::write(&meminfo, MEMINFO).unwrap();
        std::fs::write(&thermal, "71234\n").unwrap();

        let stats = collect_device_stats(&meminfo, &thermal).await;
        assert_eq!(
            stats,
            DeviceStats {
                memory_percent: Some(80.0),
                temperature_celsius: Some(71.2),
            }
        );
        assert!(stats.temperature_high());
    }

    #[test]
    fn missing_sources_are_unavailable() {
        let dir = TempDir::new().unwrap();
        let stats = tokio_test::block_on(collect_device_stats(
            &dir.path().join("nope"),
            &dir.path().join("nada"),
        ));
        assert_eq!(stats, DeviceStats::default());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn optimize_reports_success_and_failure() {
        let ok = run_optimize("echo 'tuned for speed'").await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.summary(), "Optimization complete: tuned for speed");

        let failed = run_optimize("sh -c 'echo boom >&2; exit 3'").await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.summary(), "Optimization failed (exit 3): boom");
    }

    #[tokio::test]
    async fn optimize_missing_program_is_an_error() {
        assert!(run_optimize("definitely-not-installed-localchat").await.is_err());
        assert!(run_optimize("   ").await.is_err());
    }
}
