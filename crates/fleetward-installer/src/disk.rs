use std::path::Path;

use tracing::{debug, warn};

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiskCheck {
    Pass { free_gb: f64 },
    /// `free_gb` is `None` when free space could not be determined.
    Fail { free_gb: Option<f64> },
}

impl DiskCheck {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    pub fn free_gb(&self) -> Option<f64> {
        match self {
            Self::Pass { free_gb } => Some(*free_gb),
            Self::Fail { free_gb } => *free_gb,
        }
    }
}

/// Fails closed when the volume cannot be queried.
pub fn check_free_space(path: &Path, minimum_gb: f64) -> DiskCheck {
    match fs2::available_space(path) {
        Ok(bytes) => {
            let free_gb = bytes as f64 / BYTES_PER_GB;
            debug!(path = %path.display(), free_gb, minimum_gb, "measured free disk space");
            evaluate_free_space(Some(free_gb), minimum_gb)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read available disk space");
            DiskCheck::Fail { free_gb: None }
        }
    }
}

pub fn evaluate_free_space(free_gb: Option<f64>, minimum_gb: f64) -> DiskCheck {
    match free_gb {
        Some(free_gb) if free_gb.is_finite() && free_gb >= minimum_gb => DiskCheck::Pass { free_gb },
        other => DiskCheck::Fail {
            free_gb: other.filter(|free| free.is_finite()),
        },
    }
}
