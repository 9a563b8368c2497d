use fleetward_core::UpgradeError;
use fleetward_installer::{restore_backup, Backup, RunnerLayout};
use fleetward_service::{ServiceAction, ServiceController};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub backup_id: String,
    /// Files written back, or that would be in dry-run.
    pub restored: Vec<String>,
    pub service: ServiceAction,
    pub dry_run: bool,
}

/// Returns an installation to a backup's state files and brings the service back.
///
/// A failed stop only warns; restore and start failures are a `RollbackError`
/// since there is no further automated recovery.
pub struct RollbackManager<'a> {
    layout: &'a RunnerLayout,
    service: &'a ServiceController<'a>,
}

impl<'a> RollbackManager<'a> {
    pub fn new(layout: &'a RunnerLayout, service: &'a ServiceController<'a>) -> Self {
        Self { layout, service }
    }

    pub fn roll_back(&self, backup: &Backup) -> Result<RollbackReport, UpgradeError> {
        if self.service.is_dry_run() {
            info!(
                backup = %backup.dir.display(),
                files = backup.metadata.files.len(),
                "dry-run: would restore backup"
            );
            let service = self
                .service
                .start(self.layout)
                .map_err(|err| self.fail(backup, &err))?;
            return Ok(RollbackReport {
                backup_id: backup.id().to_string(),
                restored: backup.metadata.files.clone(),
                service,
                dry_run: true,
            });
        }

        if let Err(err) = self.service.stop(self.layout) {
            let detail = format!("{err:#}");
            warn!(error = %detail, "service did not stop before restore; restoring anyway");
        }

        let restored = restore_backup(self.layout, backup)
            .map_err(|err| self.fail(backup, &err))?
            .restored;

        let service = self
            .service
            .start(self.layout)
            .map_err(|err| self.fail(backup, &err.context("service did not start after restore")))?;

        info!(backup = backup.id(), files = restored.len(), "rollback complete");
        Ok(RollbackReport {
            backup_id: backup.id().to_string(),
            restored,
            service,
            dry_run: false,
        })
    }

    fn fail(&self, backup: &Backup, err: &anyhow::Error) -> UpgradeError {
        let failure = UpgradeError::rollback(err, Some(&backup.dir));
        error!(backup = %backup.dir.display(), error = %failure, "rollback failed");
        failure
    }
}
