use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fleetward_core::{ArchiveType, HostPlatform, InstallManifest, TargetRelease};
use fleetward_release::{part_path_for, ArtifactSource};
use tracing::{debug, info, warn};

use crate::artifact::{extract_archive, replace_installation_contents};
use crate::fs_utils::{remove_entry_if_exists, remove_file_if_exists, sha256_file};
use crate::journal::current_unix_timestamp;
use crate::layout::RunnerLayout;

/// Replaces the runner payload in an installation with a target release.
pub trait ReleaseInstaller {
    fn install(&self, layout: &RunnerLayout, release: &TargetRelease) -> Result<()>;
}

pub struct ArchiveInstaller<'a> {
    artifacts: &'a dyn ArtifactSource,
    platform: HostPlatform,
    preserve: Vec<String>,
}

impl<'a> ArchiveInstaller<'a> {
    /// `preserve` lists top-level entries the archive may never overwrite.
    pub fn new(artifacts: &'a dyn ArtifactSource, platform: HostPlatform, preserve: Vec<String>) -> Self {
        Self {
            artifacts,
            platform,
            preserve,
        }
    }

    fn install_from_archive(
        &self,
        layout: &RunnerLayout,
        release: &TargetRelease,
        url: &str,
        archive_path: &Path,
        staged_dir: &Path,
    ) -> Result<()> {
        self.artifacts.fetch(url, archive_path)?;

        if let Some(expected) = &release.sha256 {
            let actual = sha256_file(archive_path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(anyhow!(
                    "artifact digest mismatch for {url}: expected sha256 {expected}, got {actual}"
                ));
            }
            debug!(sha256 = %actual, "artifact digest verified");
        }

        let archive_type = ArchiveType::from_asset_name(url)
            .unwrap_or_else(|| self.platform.archive_type());
        extract_archive(archive_path, staged_dir, archive_type)?;

        let ships_manifest = staged_dir.join(layout.manifest_file()).exists();
        let replaced =
            replace_installation_contents(staged_dir, layout.install_dir(), &self.preserve)?;
        debug!(entries = replaced.len(), "replaced installation entries");

        if !ships_manifest {
            stamp_manifest(layout, release)?;
        }
        Ok(())
    }
}

impl ReleaseInstaller for ArchiveInstaller<'_> {
    fn install(&self, layout: &RunnerLayout, release: &TargetRelease) -> Result<()> {
        let url = release
            .download_url
            .as_deref()
            .ok_or_else(|| anyhow!("no download url for release {}", release.version))?;

        let downloads_dir = layout.downloads_dir();
        fs::create_dir_all(&downloads_dir)
            .with_context(|| format!("failed to create {}", downloads_dir.display()))?;
        let archive_path =
            downloads_dir.join(self.platform.artifact_file_name(&release.version));
        let staged_dir = layout.staging_dir().join(format!(
            "install-{}-{}",
            std::process::id(),
            current_unix_timestamp()?
        ));

        info!(version = %release.version, url, "installing release");
        let result = self.install_from_archive(layout, release, url, &archive_path, &staged_dir);

        // Cleanup is unconditional.
        if let Err(err) = remove_file_if_exists(&archive_path) {
            warn!(path = %archive_path.display(), error = %err, "failed to remove downloaded archive");
        }
        if let Err(err) = remove_file_if_exists(&part_path_for(&archive_path)) {
            warn!(path = %archive_path.display(), error = %err, "failed to remove partial download");
        }
        if let Err(err) = remove_entry_if_exists(&staged_dir) {
            let detail = format!("{err:#}");
            warn!(path = %staged_dir.display(), error = %detail, "failed to remove staging dir");
        }

        result.with_context(|| format!("install of {} failed", release.version))
    }
}

fn stamp_manifest(layout: &RunnerLayout, release: &TargetRelease) -> Result<()> {
    let manifest_path = layout.manifest_path();
    let rendered = InstallManifest::new(release.version.clone()).to_toml_string()?;
    fs::write(&manifest_path, rendered)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    debug!(path = %manifest_path.display(), "stamped install manifest");
    Ok(())
}
