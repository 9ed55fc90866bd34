//! Report emitted at the end of every sync run, including aborted ones.

use crate::error::SyncError;
use crate::models::conflict::{ConflictDecision, ConflictStrategy};
use crate::models::issue::IssueFields;
use crate::models::sync_run::{RunStatus, SyncMode};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Exit code for a clean run, deferred conflicts included.
pub const EXIT_OK: i32 = 0;

/// Exit code for an aborted run (resumable).
pub const EXIT_FATAL: i32 = 1;

/// Exit code for a completed run with per-record failures.
pub const EXIT_PARTIAL: i32 = 2;

/// What happened to one record in a run. Stored as the checkpoint outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Created,
    UpdatedRemote,
    UpdatedLocal,
    Unchanged,
    Skipped,
    Deferred,
    Failed,
}

impl std::fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::UpdatedRemote => "updated_remote",
            Self::UpdatedLocal => "updated_local",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A conflict left for manual resolution, with both sides spelled out.
#[derive(Debug, Clone, Serialize)]
pub struct DeferredConflict {
    pub record_id: i64,
    pub remote_number: Option<i64>,
    pub path: Option<String>,
    pub local: IssueFields,
    pub remote: IssueFields,
    pub local_modified_at: DateTime<Utc>,
    pub remote_updated_at: DateTime<Utc>,
}

/// A record that failed in isolation.
#[derive(Debug, Serialize)]
pub struct FailedRecord {
    pub record_id: i64,
    pub remote_number: Option<i64>,
    pub path: Option<String>,
    pub error: SyncError,
}

/// Summary of one sync run.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    pub mode: SyncMode,
    pub strategy: ConflictStrategy,
    pub dry_run: bool,
    /// Whether the run continued an interrupted run.
    pub resumed: bool,
    pub status: RunStatus,
    pub created: u32,
    pub updated_remote: u32,
    pub updated_local: u32,
    pub unchanged: u32,
    pub skipped: u32,
    /// Records already finished by an earlier attempt of this run.
    pub already_done: u32,
    pub deferred: Vec<DeferredConflict>,
    pub failed: Vec<FailedRecord>,
    pub decisions: Vec<ConflictDecision>,
    /// Error that aborted the run, if any.
    pub fatal_error: Option<SyncError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    /// Create an empty report for a run.
    pub fn new(
        run_id: impl Into<String>,
        mode: SyncMode,
        strategy: ConflictStrategy,
        dry_run: bool,
        resumed: bool,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            strategy,
            dry_run,
            resumed,
            status: RunStatus::InProgress,
            created: 0,
            updated_remote: 0,
            updated_local: 0,
            unchanged: 0,
            skipped: 0,
            already_done: 0,
            deferred: Vec::new(),
            failed: Vec::new(),
            decisions: Vec::new(),
            fatal_error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Count a simple outcome. Deferred and failed records carry detail and
    /// are pushed onto their lists instead.
    pub fn count(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::UpdatedRemote => self.updated_remote += 1,
            RecordOutcome::UpdatedLocal => self.updated_local += 1,
            RecordOutcome::Unchanged => self.unchanged += 1,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Deferred | RecordOutcome::Failed => {}
        }
    }

    /// Total records that were written on either side.
    pub fn total_writes(&self) -> u32 {
        self.created + self.updated_remote + self.updated_local
    }

    /// Process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.fatal_error.is_some() {
            EXIT_FATAL
        } else if !self.failed.is_empty() {
            EXIT_PARTIAL
        } else {
            EXIT_OK
        }
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} run {} ({}): created {}, updated remote {}, updated local {}, unchanged {}, skipped {}, deferred {}, failed {}",
            self.mode,
            self.run_id,
            self.status,
            self.created,
            self.updated_remote,
            self.updated_local,
            self.unchanged,
            self.skipped,
            self.deferred.len(),
            self.failed.len()
        )
    }
}
