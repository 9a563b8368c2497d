use std::time::Duration;

use semver::Version;

pub const DEFAULT_MAX_WAIT_MINUTES: u64 = 30;

/// Immutable input to one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    /// `None` resolves the newest stable release.
    pub target_version: Option<Version>,
    pub force: bool,
    pub skip_backup: bool,
    pub dry_run: bool,
    pub max_wait_minutes: u64,
}

impl Default for UpgradePlan {
    fn default() -> Self {
        Self {
            target_version: None,
            force: false,
            skip_backup: false,
            dry_run: false,
            max_wait_minutes: DEFAULT_MAX_WAIT_MINUTES,
        }
    }
}

impl UpgradePlan {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_minutes.saturating_mul(60))
    }

    pub fn takes_backup(&self) -> bool {
        !self.skip_backup && !self.dry_run
    }
}
