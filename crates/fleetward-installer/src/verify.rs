use fleetward_core::validated_relative_path;
use tracing::warn;

use crate::layout::RunnerLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Pass,
    Fail { missing: Vec<String> },
}

impl Verification {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

pub fn verify_installation(layout: &RunnerLayout, required_entries: &[String]) -> Verification {
    let missing = required_entries
        .iter()
        .filter(|entry| {
            let present = validated_relative_path(entry)
                .map(|rel| layout.install_dir().join(rel).exists())
                .unwrap_or(false);
            if !present {
                warn!(entry = %entry, "required entry point missing after install");
            }
            !present
        })
        .cloned()
        .collect::<Vec<_>>();

    if missing.is_empty() {
        Verification::Pass
    } else {
        Verification::Fail { missing }
    }
}
