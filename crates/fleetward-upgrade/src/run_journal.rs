use fleetward_core::FailureKind;
use fleetward_installer::{
    append_journal_entry, current_unix_timestamp, write_run_record, JournalEntry, RunRecord,
    RunnerLayout,
};
use tracing::warn;

use crate::stage::Stage;

/// Best-effort run record and stage journal. Nothing is written until
/// `open` is called at the first mutating stage, and write failures only warn.
pub(crate) struct RunJournal<'a> {
    layout: &'a RunnerLayout,
    run_id: String,
    started_at_unix: u64,
    record: Option<RunRecord>,
    seq: u64,
}

impl<'a> RunJournal<'a> {
    pub(crate) fn new(layout: &'a RunnerLayout, run_id: String, started_at_unix: u64) -> Self {
        Self {
            layout,
            run_id,
            started_at_unix,
            record: None,
            seq: 0,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.record.is_some()
    }

    pub(crate) fn open(&mut self, installed_version: &str, target_version: &str) {
        if self.is_open() {
            return;
        }
        if let Err(err) = self.layout.ensure_state_dirs() {
            let detail = format!("{err:#}");
            warn!(error = %detail, "failed to prepare state directory for run journal");
        }
        self.record = Some(RunRecord::new(
            self.run_id.clone(),
            installed_version,
            target_version,
            self.started_at_unix,
        ));
        self.persist();
    }

    pub(crate) fn set_backup(&mut self, backup_id: &str) {
        if let Some(record) = self.record.as_mut() {
            record.backup_id = Some(backup_id.to_string());
        }
        self.persist();
    }

    pub(crate) fn stage(&mut self, stage: Stage, state: &str, detail: Option<String>) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        record.stage = stage.as_str().to_string();
        record.updated_at_unix = now_or(record.updated_at_unix);

        self.seq += 1;
        let entry = JournalEntry {
            seq: self.seq,
            stage: stage.as_str().to_string(),
            state: state.to_string(),
            detail,
            at_unix: record.updated_at_unix,
        };
        if let Err(err) = append_journal_entry(self.layout, &self.run_id, &entry) {
            let detail = format!("{err:#}");
            warn!(stage = %stage, error = %detail, "failed to append run journal");
        }
        self.persist();
    }

    pub(crate) fn finish(&mut self, stage: Stage, status: &str, last_error: Option<FailureKind>) {
        if let Some(record) = self.record.as_mut() {
            record.status = status.to_string();
            record.last_error = last_error;
        }
        let detail = last_error.map(|kind| kind.as_str().to_string());
        self.stage(stage, status, detail);
    }

    fn persist(&self) {
        let Some(record) = &self.record else {
            return;
        };
        if let Err(err) = write_run_record(self.layout, record) {
            let detail = format!("{err:#}");
            warn!(run = %self.run_id, error = %detail, "failed to write run record");
        }
    }
}

fn now_or(fallback: u64) -> u64 {
    current_unix_timestamp().unwrap_or(fallback)
}
