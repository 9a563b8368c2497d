use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Host process and load inspection used by the busy detector.
pub trait ProcessProbe {
    fn worker_process_present(&self, process_name: &str) -> Result<bool>;

    /// `Ok(None)` when the host offers no CPU sample.
    fn cpu_utilization_percent(&self, window: Duration) -> Result<Option<f64>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn worker_process_present(&self, process_name: &str) -> Result<bool> {
        if cfg!(windows) {
            let output = build_tasklist_command(process_name)
                .output()
                .context("failed to list processes: tasklist failed to start")?;
            if !output.status.success() {
                return Err(anyhow!("failed to list processes: status={}", output.status));
            }
            return Ok(parse_tasklist_output(
                &String::from_utf8_lossy(&output.stdout),
                process_name,
            ));
        }

        let output = build_pgrep_command(process_name)
            .output()
            .context("failed to list processes: pgrep failed to start")?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(anyhow!(
                "failed to list processes: pgrep status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    fn cpu_utilization_percent(&self, window: Duration) -> Result<Option<f64>> {
        if !cfg!(target_os = "linux") {
            return Ok(None);
        }
        let before = read_proc_stat()?;
        std::thread::sleep(window);
        let after = read_proc_stat()?;
        Ok(cpu_percent_between(before, after))
    }
}

pub(crate) fn build_pgrep_command(process_name: &str) -> Command {
    let mut command = Command::new("pgrep");
    command.arg("-f").arg(process_name);
    command
}

pub(crate) fn build_tasklist_command(process_name: &str) -> Command {
    let mut command = Command::new("tasklist");
    command
        .arg("/FI")
        .arg(format!("IMAGENAME eq {process_name}.exe"))
        .arg("/NH");
    command
}

pub(crate) fn parse_tasklist_output(stdout: &str, process_name: &str) -> bool {
    let needle = process_name.to_ascii_lowercase();
    stdout
        .lines()
        .any(|line| line.trim().to_ascii_lowercase().starts_with(&needle))
}

/// Aggregate `(idle, total)` jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

fn read_proc_stat() -> Result<CpuTimes> {
    let raw = std::fs::read_to_string("/proc/stat").context("failed to read /proc/stat")?;
    parse_proc_stat(&raw)
}

pub(crate) fn parse_proc_stat(raw: &str) -> Result<CpuTimes> {
    let line = raw
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| anyhow!("no aggregate cpu line in /proc/stat"))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("invalid /proc/stat field '{value}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    if fields.len() < 4 {
        return Err(anyhow!("truncated cpu line in /proc/stat"));
    }

    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().sum();
    Ok(CpuTimes { idle, total })
}

pub(crate) fn cpu_percent_between(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    let idle = after.idle.checked_sub(before.idle)?;
    if total == 0 || idle > total {
        return None;
    }
    Some((total - idle) as f64 * 100.0 / total as f64)
}
