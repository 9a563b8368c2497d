mod orchestrator;
mod report;
mod rollback;
mod run_journal;
mod stage;

pub use orchestrator::{Collaborators, UpgradeOrchestrator};
pub use report::{UpgradeOutcome, UpgradeReport};
pub use rollback::{RollbackManager, RollbackReport};
pub use stage::{Stage, StageObserver};
