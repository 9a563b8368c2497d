mod artifact;
mod backup;
mod disk;
mod fs_utils;
mod installer;
mod journal;
mod layout;
mod restore;
mod verify;

pub use artifact::run_command;
pub use backup::{create_backup, find_backup, latest_backup, list_backups, Backup, BackupMetadata};
pub use disk::{check_free_space, evaluate_free_space, DiskCheck, BYTES_PER_GB};
pub use fs_utils::{remove_file_if_exists, sha256_file};
pub use installer::{ArchiveInstaller, ReleaseInstaller};
pub use journal::{
    append_journal_entry, current_unix_timestamp, read_journal, read_latest_run,
    read_run_record, write_run_record, JournalEntry, RunRecord,
};
pub use layout::RunnerLayout;
pub use restore::{read_inconsistency_marker, restore_backup, RestoreReport};
pub use verify::{verify_installation, Verification};

#[cfg(test)]
mod tests;
