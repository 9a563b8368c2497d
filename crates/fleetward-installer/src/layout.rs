use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fleetward_core::UpgradeConfig;

const INCONSISTENCY_MARKER: &str = ".fleetward-inconsistent";

/// Paths of one runner installation and its sibling state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerLayout {
    install_dir: PathBuf,
    state_root: PathBuf,
    manifest_file: String,
    service_file: String,
}

impl RunnerLayout {
    pub fn from_config(install_dir: impl Into<PathBuf>, config: &UpgradeConfig) -> Result<Self> {
        let install_dir = install_dir.into();
        let state_root = match &config.backup.state_dir {
            Some(state_dir) => state_dir.clone(),
            None => default_state_root(&install_dir)?,
        };
        Ok(Self {
            install_dir,
            state_root,
            manifest_file: config.verify.manifest_file.clone(),
            service_file: config.service.service_file.clone(),
        })
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.install_dir.join(&self.manifest_file)
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn service_file_path(&self) -> PathBuf {
        self.install_dir.join(&self.service_file)
    }

    pub fn inconsistency_marker_path(&self) -> PathBuf {
        self.install_dir.join(INCONSISTENCY_MARKER)
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_root.join("backups")
    }

    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.backups_dir().join(backup_id)
    }

    pub fn backup_metadata_path(&self, backup_id: &str) -> PathBuf {
        self.backup_dir(backup_id).join("backup.json")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_root.join("runs")
    }

    pub fn run_record_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn run_journal_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.journal"))
    }

    pub fn latest_run_path(&self) -> PathBuf {
        self.runs_dir().join("latest")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.state_root.join("downloads")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.state_root.join("staging")
    }

    pub fn ensure_state_dirs(&self) -> Result<()> {
        for dir in [
            self.backups_dir(),
            self.runs_dir(),
            self.downloads_dir(),
            self.staging_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

fn default_state_root(install_dir: &Path) -> Result<PathBuf> {
    let name = install_dir
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            anyhow!(
                "cannot derive state directory for installation path {}",
                install_dir.display()
            )
        })?;
    let parent = install_dir.parent().ok_or_else(|| {
        anyhow!(
            "installation path has no parent directory: {}",
            install_dir.display()
        )
    })?;
    Ok(parent.join(format!(".{name}.fleetward")))
}
