use std::fs;
use std::io;

use anyhow::{anyhow, Context, Result};
use fleetward_core::validated_relative_path;
use tracing::{error, info};

use crate::backup::Backup;
use crate::fs_utils::{copy_entry, remove_file_if_exists};
use crate::layout::RunnerLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: Vec<String>,
}

/// Copies every captured file back over the installation. Running it twice
/// leaves the same end state.
///
/// A failure part-way writes an inconsistency marker into the installation
/// naming the backup, so an operator can finish the restore by hand.
pub fn restore_backup(layout: &RunnerLayout, backup: &Backup) -> Result<RestoreReport> {
    let mut restored = Vec::new();
    for rel in &backup.metadata.files {
        if let Err(err) = restore_file(layout, backup, rel) {
            let detail = format!("{err:#}");
            error!(file = %rel, backup = %backup.dir.display(), error = %detail, "restore failed part-way");
            mark_inconsistent(layout, backup, rel, &detail);
            return Err(err.context(format!(
                "restore from {} stopped at '{rel}' after {} of {} files",
                backup.dir.display(),
                restored.len(),
                backup.metadata.files.len()
            )));
        }
        restored.push(rel.clone());
    }

    remove_file_if_exists(&layout.inconsistency_marker_path()).with_context(|| {
        format!(
            "failed to clear inconsistency marker {}",
            layout.inconsistency_marker_path().display()
        )
    })?;
    info!(backup = %backup.dir.display(), files = restored.len(), "restored state backup");
    Ok(RestoreReport { restored })
}

fn restore_file(layout: &RunnerLayout, backup: &Backup, rel: &str) -> Result<()> {
    let rel_path = validated_relative_path(rel)?;
    let source = backup.dir.join(rel_path);
    if fs::symlink_metadata(&source).is_err() {
        return Err(anyhow!(
            "captured file is missing from backup: {}",
            source.display()
        ));
    }
    copy_entry(&source, &layout.install_dir().join(rel_path))
}

fn mark_inconsistent(layout: &RunnerLayout, backup: &Backup, rel: &str, detail: &str) {
    let marker = layout.inconsistency_marker_path();
    let body = format!(
        "restore incomplete; manual intervention required\nbackup={}\nfailed_file={rel}\nerror={detail}\n",
        backup.dir.display()
    );
    if let Err(err) = fs::write(&marker, body) {
        error!(marker = %marker.display(), error = %err, "failed to write inconsistency marker");
    }
}

/// Contents of the inconsistency marker, if a previous restore left one.
pub fn read_inconsistency_marker(layout: &RunnerLayout) -> Result<Option<String>> {
    let marker = layout.inconsistency_marker_path();
    match fs::read_to_string(&marker) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", marker.display())),
    }
}
