use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use fleetward_core::ReleaseConfig;
use reqwest::blocking::Client;
use tracing::{debug, info};

/// Fetches a release artifact to a local file.
pub trait ArtifactSource {
    fn fetch(&self, url: &str, destination: &Path) -> Result<()>;
}

pub struct HttpArtifactSource {
    client: Client,
}

impl HttpArtifactSource {
    pub fn new(config: &ReleaseConfig) -> Result<Self> {
        // Artifacts are large; only the connect phase is bounded.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .timeout(Option::<Duration>::None)
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build artifact download HTTP client")?;
        Ok(Self { client })
    }
}

impl ArtifactSource for HttpArtifactSource {
    fn fetch(&self, url: &str, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create download dir: {}", parent.display()))?;
        }

        let part_path = part_path_for(destination);
        info!(url, path = %destination.display(), "downloading release artifact");

        let result = (|| -> Result<u64> {
            let mut response = self
                .client
                .get(url)
                .send()
                .with_context(|| format!("artifact download failed to start: {url}"))?;
            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("artifact download {url} returned status {status}"));
            }
            let mut file = fs::File::create(&part_path)
                .with_context(|| format!("failed to create {}", part_path.display()))?;
            response
                .copy_to(&mut file)
                .with_context(|| format!("failed writing artifact to {}", part_path.display()))
        })();

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = fs::remove_file(&part_path);
                return Err(err);
            }
        };

        if destination.exists() {
            fs::remove_file(destination).with_context(|| {
                format!("failed to replace download: {}", destination.display())
            })?;
        }
        fs::rename(&part_path, destination).with_context(|| {
            format!(
                "failed to move downloaded artifact into place: {}",
                destination.display()
            )
        })?;
        debug!(bytes, path = %destination.display(), "artifact downloaded");
        Ok(())
    }
}

pub fn part_path_for(destination: &Path) -> PathBuf {
    destination.with_file_name(format!(
        "{}.part",
        destination
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("artifact")
    ))
}
