use anyhow::{anyhow, Context, Result};
use fleetward_core::{ReleaseConfig, ReleaseInfo};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use tracing::debug;

/// Read-only view of the release-metadata endpoint.
pub trait ReleaseSource {
    fn latest_release(&self) -> Result<ReleaseInfo>;
}

pub struct HttpReleaseSource {
    endpoint: String,
    client: Client,
}

impl HttpReleaseSource {
    pub fn new(config: &ReleaseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build release metadata HTTP client")?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReleaseSource for HttpReleaseSource {
    fn latest_release(&self) -> Result<ReleaseInfo> {
        debug!(endpoint = %self.endpoint, "querying release metadata");
        let response = self
            .client
            .get(&self.endpoint)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .with_context(|| format!("release endpoint unreachable: {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "release endpoint {} returned status {status}",
                self.endpoint
            ));
        }

        let body = response.text().with_context(|| {
            format!("failed to read release metadata body from {}", self.endpoint)
        })?;
        ReleaseInfo::from_json_str(&body)
            .with_context(|| format!("invalid release metadata from {}", self.endpoint))
    }
}
