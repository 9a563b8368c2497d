use std::path::PathBuf;

use fleetward_core::{FailureKind, InstalledVersion, UpgradeError, Version};

use crate::stage::Stage;

#[derive(Debug)]
pub enum UpgradeOutcome {
    Succeeded,
    SkippedUpToDate,
    DryRunCompleted,
    Failed(UpgradeError),
    /// The host is back on the previous version; the upgrade itself did not happen.
    RolledBack { cause: UpgradeError, backup: PathBuf },
}

impl UpgradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::SkippedUpToDate => "skipped_up_to_date",
            Self::DryRunCompleted => "dry_run_completed",
            Self::Failed(_) => "failed",
            Self::RolledBack { .. } => "rolled_back",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Succeeded => Stage::Succeeded,
            Self::SkippedUpToDate => Stage::SkippedUpToDate,
            Self::DryRunCompleted => Stage::DryRunCompleted,
            Self::Failed(_) => Stage::Failed,
            Self::RolledBack { .. } => Stage::RolledBack,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded | Self::SkippedUpToDate | Self::DryRunCompleted => 0,
            Self::Failed(_) | Self::RolledBack { .. } => 1,
        }
    }

    pub fn error(&self) -> Option<&UpgradeError> {
        match self {
            Self::Failed(err) | Self::RolledBack { cause: err, .. } => Some(err),
            _ => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(UpgradeError::kind)
    }
}

#[derive(Debug)]
pub struct UpgradeReport {
    pub run_id: String,
    pub outcome: UpgradeOutcome,
    pub installed_version: InstalledVersion,
    pub target_version: Option<Version>,
    /// Every stage entered, terminal stage last.
    pub stages: Vec<Stage>,
    pub backup_id: Option<String>,
    pub dry_run: bool,
}

impl UpgradeReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }
}
