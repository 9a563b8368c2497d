use std::fmt;

use crate::report::UpgradeReport;

/// States of one orchestration run. The last five are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preflight,
    ResolveVersions,
    BusyCheck,
    IdleWait,
    Backup,
    Stop,
    Install,
    Verify,
    Rollback,
    Start,
    Succeeded,
    SkippedUpToDate,
    DryRunCompleted,
    Failed,
    RolledBack,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::ResolveVersions => "resolve_versions",
            Self::BusyCheck => "busy_check",
            Self::IdleWait => "idle_wait",
            Self::Backup => "backup",
            Self::Stop => "stop",
            Self::Install => "install",
            Self::Verify => "verify",
            Self::Rollback => "rollback",
            Self::Start => "start",
            Self::Succeeded => "succeeded",
            Self::SkippedUpToDate => "skipped_up_to_date",
            Self::DryRunCompleted => "dry_run_completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::SkippedUpToDate
                | Self::DryRunCompleted
                | Self::Failed
                | Self::RolledBack
        )
    }

    /// Stages that change the host when not in dry-run.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::Backup | Self::Stop | Self::Install | Self::Rollback | Self::Start
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a run's progress. Observers never drive transitions.
pub trait StageObserver {
    fn stage_entered(&self, stage: Stage);

    fn run_finished(&self, _report: &UpgradeReport) {}
}
