use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fleetward_core::validated_relative_path;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs_utils::{copy_entry, remove_entry_if_exists};
use crate::journal::current_unix_timestamp;
use crate::layout::RunnerLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created_at_unix: u64,
    pub source_installation_path: PathBuf,
    /// Relative paths captured into the snapshot.
    pub files: Vec<String>,
    /// Allow-listed paths that did not exist when the snapshot was taken.
    #[serde(default)]
    pub missing: Vec<String>,
}

/// An immutable snapshot of the allow-listed state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub dir: PathBuf,
    pub metadata: BackupMetadata,
}

impl Backup {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn captured_path(&self, rel_path: &str) -> PathBuf {
        self.dir.join(rel_path)
    }
}

/// Copies every allow-listed state file that exists into a fresh snapshot.
///
/// Missing sources are recorded and logged, not treated as failures; a runner
/// that never registered has nothing to preserve. Any copy failure removes the
/// partial snapshot and is returned as an error.
pub fn create_backup(layout: &RunnerLayout, state_files: &[String]) -> Result<Backup> {
    let created_at_unix = current_unix_timestamp()?;
    let backups_dir = layout.backups_dir();
    fs::create_dir_all(&backups_dir)
        .with_context(|| format!("failed to create {}", backups_dir.display()))?;

    let (id, dir) = claim_backup_dir(layout, created_at_unix)?;
    let result = populate_backup(layout, &dir, &id, created_at_unix, state_files);
    match result {
        Ok(metadata) => {
            info!(
                backup = %dir.display(),
                captured = metadata.files.len(),
                missing = metadata.missing.len(),
                "created state backup"
            );
            Ok(Backup { dir, metadata })
        }
        Err(err) => {
            if let Err(cleanup_err) = remove_entry_if_exists(&dir) {
                warn!(backup = %dir.display(), error = %cleanup_err, "failed to remove partial backup");
            }
            Err(err)
        }
    }
}

fn claim_backup_dir(layout: &RunnerLayout, created_at_unix: u64) -> Result<(String, PathBuf)> {
    let base = format!("backup-{created_at_unix}-{}", std::process::id());
    for attempt in 0..100_u32 {
        let id = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let dir = layout.backup_dir(&id);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((id, dir)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create backup dir {}", dir.display()));
            }
        }
    }
    Err(anyhow!("could not claim a unique backup directory for {base}"))
}

fn populate_backup(
    layout: &RunnerLayout,
    dir: &Path,
    id: &str,
    created_at_unix: u64,
    state_files: &[String],
) -> Result<BackupMetadata> {
    let mut files = Vec::new();
    let mut missing = Vec::new();

    for rel in state_files {
        let rel_path = validated_relative_path(rel)?;
        let source = layout.install_dir().join(rel_path);
        match fs::symlink_metadata(&source) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(file = %rel, "state file not present; backup skipped for this file");
                missing.push(rel.clone());
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", source.display()));
            }
        }

        copy_entry(&source, &dir.join(rel_path))
            .with_context(|| format!("failed to capture state file '{rel}'"))?;
        debug!(file = %rel, "captured state file");
        files.push(rel.clone());
    }

    let metadata = BackupMetadata {
        id: id.to_string(),
        created_at_unix,
        source_installation_path: layout.install_dir().to_path_buf(),
        files,
        missing,
    };

    // Written last: a snapshot without metadata is incomplete and never restored.
    let metadata_path = layout.backup_metadata_path(id);
    let rendered =
        serde_json::to_string_pretty(&metadata).context("failed to serialize backup metadata")?;
    fs::write(&metadata_path, rendered)
        .with_context(|| format!("failed to write {}", metadata_path.display()))?;
    Ok(metadata)
}

/// Complete backups, newest first.
pub fn list_backups(layout: &RunnerLayout) -> Result<Vec<Backup>> {
    let backups_dir = layout.backups_dir();
    let entries = match fs::read_dir(&backups_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", backups_dir.display()));
        }
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(ToOwned::to_owned) else {
            continue;
        };
        match read_backup(layout, &id)? {
            Some(backup) => backups.push(backup),
            None => warn!(backup = %entry.path().display(), "ignoring incomplete backup"),
        }
    }

    backups.sort_by(|left, right| {
        right
            .metadata
            .created_at_unix
            .cmp(&left.metadata.created_at_unix)
            .then_with(|| right.metadata.id.cmp(&left.metadata.id))
    });
    Ok(backups)
}

pub fn latest_backup(layout: &RunnerLayout) -> Result<Option<Backup>> {
    Ok(list_backups(layout)?.into_iter().next())
}

pub fn find_backup(layout: &RunnerLayout, backup_id: &str) -> Result<Option<Backup>> {
    validated_relative_path(backup_id).context("invalid backup id")?;
    read_backup(layout, backup_id)
}

fn read_backup(layout: &RunnerLayout, backup_id: &str) -> Result<Option<Backup>> {
    let path = layout.backup_metadata_path(backup_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read backup metadata: {}", path.display()));
        }
    };
    let metadata: BackupMetadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing backup metadata: {}", path.display()))?;
    Ok(Some(Backup {
        dir: layout.backup_dir(backup_id),
        metadata,
    }))
}
