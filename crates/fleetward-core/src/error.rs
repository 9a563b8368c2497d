use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PathNotFound,
    InsufficientDisk,
    NetworkError,
    BusyTimeout,
    BackupError,
    ServiceError,
    InstallError,
    VerificationError,
    RollbackError,
    NoBackupToRestore,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PathNotFound => "path_not_found",
            Self::InsufficientDisk => "insufficient_disk",
            Self::NetworkError => "network_error",
            Self::BusyTimeout => "busy_timeout",
            Self::BackupError => "backup_error",
            Self::ServiceError => "service_error",
            Self::InstallError => "install_error",
            Self::VerificationError => "verification_error",
            Self::RollbackError => "rollback_error",
            Self::NoBackupToRestore => "no_backup_to_restore",
        }
    }

    /// Raised before the installation was touched; nothing to undo.
    pub fn is_pre_mutation(self) -> bool {
        matches!(
            self,
            Self::PathNotFound | Self::InsufficientDisk | Self::NetworkError | Self::BusyTimeout
        )
    }

    /// Host consistency can no longer be guaranteed.
    pub fn requires_manual_intervention(self) -> bool {
        matches!(self, Self::RollbackError | Self::NoBackupToRestore)
    }
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("installation path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    #[error(
        "insufficient disk space at {}: {} (minimum {minimum_gb:.2} GB)",
        path.display(),
        describe_free_gb(free_gb)
    )]
    InsufficientDisk {
        path: PathBuf,
        free_gb: Option<f64>,
        minimum_gb: f64,
    },

    #[error("release lookup failed: {message}")]
    Network { message: String },

    #[error("worker still busy after waiting {waited_secs}s")]
    BusyTimeout { waited_secs: u64 },

    #[error("backup failed: {message}")]
    Backup { message: String },

    #[error("service {action} failed: {message}")]
    Service {
        action: &'static str,
        message: String,
    },

    #[error("install of {version} failed: {message}")]
    Install { version: String, message: String },

    #[error("installation verification failed; missing: {}", missing.join(", "))]
    Verification { missing: Vec<String> },

    #[error(
        "rollback failed: {message}; manual intervention required{}",
        describe_backup(backup)
    )]
    Rollback {
        message: String,
        backup: Option<PathBuf>,
    },

    #[error(
        "{cause}; no backup exists to restore, installation may be broken and manual intervention required"
    )]
    NoBackupToRestore { cause: Box<UpgradeError> },
}

impl UpgradeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::PathNotFound { .. } => FailureKind::PathNotFound,
            Self::InsufficientDisk { .. } => FailureKind::InsufficientDisk,
            Self::Network { .. } => FailureKind::NetworkError,
            Self::BusyTimeout { .. } => FailureKind::BusyTimeout,
            Self::Backup { .. } => FailureKind::BackupError,
            Self::Service { .. } => FailureKind::ServiceError,
            Self::Install { .. } => FailureKind::InstallError,
            Self::Verification { .. } => FailureKind::VerificationError,
            Self::Rollback { .. } => FailureKind::RollbackError,
            Self::NoBackupToRestore { .. } => FailureKind::NoBackupToRestore,
        }
    }

    pub fn network(err: &anyhow::Error) -> Self {
        Self::Network {
            message: format!("{err:#}"),
        }
    }

    pub fn backup(err: &anyhow::Error) -> Self {
        Self::Backup {
            message: format!("{err:#}"),
        }
    }

    pub fn service(action: &'static str, err: &anyhow::Error) -> Self {
        Self::Service {
            action,
            message: format!("{err:#}"),
        }
    }

    pub fn install(version: &semver::Version, err: &anyhow::Error) -> Self {
        Self::Install {
            version: version.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn rollback(err: &anyhow::Error, backup: Option<&Path>) -> Self {
        Self::Rollback {
            message: format!("{err:#}"),
            backup: backup.map(Path::to_path_buf),
        }
    }
}

fn describe_free_gb(free_gb: &Option<f64>) -> String {
    match free_gb {
        Some(free) => format!("{free:.2} GB free"),
        None => "free space could not be determined".to_string(),
    }
}

fn describe_backup(backup: &Option<PathBuf>) -> String {
    match backup {
        Some(path) => format!("; restore by hand from {}", path.display()),
        None => String::new(),
    }
}
