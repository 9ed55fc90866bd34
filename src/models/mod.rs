//! Data models for the sync engine.
//!
//! These models represent the entities stored in the local SQLite state
//! store and the transient values exchanged during one sync run.

pub mod conflict;
pub mod issue;
pub mod local_file;
pub mod sync_record;
pub mod sync_report;
pub mod sync_run;

// Re-exports for convenient access
pub use conflict::{ConflictDecision, ConflictStrategy, Resolution};
pub use issue::{CreatedIssue, IssueFields, IssuePatch, IssueState, RemoteIssueSnapshot};
pub use local_file::LocalFileRecord;
pub use sync_record::{SyncRecord, SyncRecordRow};
pub use sync_report::{DeferredConflict, FailedRecord, RecordOutcome, SyncReport};
pub use sync_run::{RunScope, RunStatus, SyncMode, SyncRun};
