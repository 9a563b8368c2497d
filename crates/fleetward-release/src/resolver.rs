use std::fs;
use std::io;
use std::path::Path;

use anyhow::{anyhow, Result};
use fleetward_core::{
    render_download_url, HostPlatform, InstallManifest, InstalledVersion, TargetRelease, Version,
};
use tracing::{debug, info, warn};

use crate::source::ReleaseSource;

pub struct VersionResolver<'a> {
    source: &'a dyn ReleaseSource,
    platform: HostPlatform,
    download_url_template: String,
}

impl<'a> VersionResolver<'a> {
    pub fn new(
        source: &'a dyn ReleaseSource,
        platform: HostPlatform,
        download_url_template: impl Into<String>,
    ) -> Self {
        Self {
            source,
            platform,
            download_url_template: download_url_template.into(),
        }
    }

    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// A missing or malformed manifest is `Unknown`, never an error.
    pub fn installed_version(&self, manifest_path: &Path) -> InstalledVersion {
        read_installed_version(manifest_path)
    }

    /// A pinned version is returned as given without touching the network.
    pub fn target_release(&self, pinned: Option<&Version>) -> Result<TargetRelease> {
        if let Some(version) = pinned {
            debug!(%version, "using pinned target version");
            return Ok(TargetRelease {
                version: version.clone(),
                download_url: Some(self.templated_url(version)),
                sha256: None,
            });
        }

        let release = self.source.latest_release()?;
        let version = release
            .stable_version()
            .map_err(|err| anyhow!("release metadata has no usable tag: {err:#}"))?;

        let target = match release.asset_for(&self.platform, &version) {
            Some(asset) => TargetRelease {
                version: version.clone(),
                download_url: Some(asset.browser_download_url.clone()),
                sha256: asset.sha256(),
            },
            None => {
                warn!(
                    %version,
                    platform = %self.platform,
                    "release lists no asset for this platform; falling back to url template"
                );
                TargetRelease {
                    download_url: Some(self.templated_url(&version)),
                    ..TargetRelease::pinned(version.clone())
                }
            }
        };
        info!(%version, tag = %release.tag_name, "resolved latest release");
        Ok(target)
    }

    fn templated_url(&self, version: &Version) -> String {
        render_download_url(&self.download_url_template, version, &self.platform)
    }
}

pub(crate) fn read_installed_version(manifest_path: &Path) -> InstalledVersion {
    let raw = match fs::read_to_string(manifest_path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %manifest_path.display(), "install manifest missing");
            return InstalledVersion::Unknown;
        }
        Err(err) => {
            warn!(path = %manifest_path.display(), error = %err, "failed to read install manifest");
            return InstalledVersion::Unknown;
        }
    };

    match InstallManifest::from_toml_str(&raw) {
        Ok(manifest) => InstalledVersion::Known(manifest.version),
        Err(err) => {
            let detail = format!("{err:#}");
            warn!(
                path = %manifest_path.display(),
                error = %detail,
                "install manifest is malformed; treating installed version as unknown"
            );
            InstalledVersion::Unknown
        }
    }
}
