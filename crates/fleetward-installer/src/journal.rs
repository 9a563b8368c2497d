use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use fleetward_core::FailureKind;
use serde::{Deserialize, Serialize};

use crate::layout::RunnerLayout;

const RUN_RECORD_VERSION: u32 = 1;

/// Read-only facts about one orchestration run, rewritten at every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub version: u32,
    pub run_id: String,
    pub installed_version: String,
    pub target_version: String,
    pub stage: String,
    pub status: String,
    #[serde(default)]
    pub last_error: Option<FailureKind>,
    #[serde(default)]
    pub backup_id: Option<String>,
    pub started_at_unix: u64,
    pub updated_at_unix: u64,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        installed_version: impl Into<String>,
        target_version: impl Into<String>,
        started_at_unix: u64,
    ) -> Self {
        Self {
            version: RUN_RECORD_VERSION,
            run_id: run_id.into(),
            installed_version: installed_version.into(),
            target_version: target_version.into(),
            stage: "preflight".to_string(),
            status: "running".to_string(),
            last_error: None,
            backup_id: None,
            started_at_unix,
            updated_at_unix: started_at_unix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub stage: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at_unix: u64,
}

/// Writes the run record and points `runs/latest` at it.
pub fn write_run_record(layout: &RunnerLayout, record: &RunRecord) -> Result<PathBuf> {
    let path = layout.run_record_path(&record.run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let rendered =
        serde_json::to_string_pretty(record).context("failed to serialize run record")?;
    fs::write(&path, rendered)
        .with_context(|| format!("failed to write run record: {}", path.display()))?;

    let latest = layout.latest_run_path();
    fs::write(&latest, format!("{}\n", record.run_id))
        .with_context(|| format!("failed to write latest run pointer: {}", latest.display()))?;
    Ok(path)
}

pub fn read_run_record(layout: &RunnerLayout, run_id: &str) -> Result<Option<RunRecord>> {
    let path = layout.run_record_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run record: {}", path.display()));
        }
    };
    let record = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing run record: {}", path.display()))?;
    Ok(Some(record))
}

pub fn read_latest_run(layout: &RunnerLayout) -> Result<Option<RunRecord>> {
    let path = layout.latest_run_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read latest run pointer: {}", path.display()));
        }
    };

    let run_id = raw.trim();
    if run_id.is_empty() {
        return Ok(None);
    }
    read_run_record(layout, run_id)
}

pub fn append_journal_entry(
    layout: &RunnerLayout,
    run_id: &str,
    entry: &JournalEntry,
) -> Result<PathBuf> {
    let path = layout.run_journal_path(run_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let line = serde_json::to_string(entry).context("failed to serialize journal entry")?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open run journal: {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("failed to append run journal: {}", path.display()))?;
    file.write_all(b"\n").with_context(|| {
        format!("failed to append run journal newline: {}", path.display())
    })?;
    file.flush()
        .with_context(|| format!("failed to flush run journal: {}", path.display()))?;
    Ok(path)
}

pub fn read_journal(layout: &RunnerLayout, run_id: &str) -> Result<Vec<JournalEntry>> {
    let path = layout.run_journal_path(run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read run journal: {}", path.display()));
        }
    };

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|err| {
                anyhow!(
                    "invalid run journal line {} in {}: {err}",
                    index + 1,
                    path.display()
                )
            })
        })
        .collect()
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}
