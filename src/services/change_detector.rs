//! Classify each sync record by which side changed since its last sync.

use crate::models::issue::{IssueFields, RemoteIssueSnapshot};
use crate::models::sync_record::SyncRecord;
use serde::Serialize;

/// Which sides of a record changed since the last successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NoChange,
    LocalOnly,
    RemoteOnly,
    BothChanged,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChange => write!(f, "no_change"),
            Self::LocalOnly => write!(f, "local_only"),
            Self::RemoteOnly => write!(f, "remote_only"),
            Self::BothChanged => write!(f, "both_changed"),
        }
    }
}

/// Stateless change detection over a record and the current views of
/// both sides.
pub struct ChangeDetector;

impl ChangeDetector {
    /// Classify one record.
    ///
    /// `local` is `None` when the record has no readable local file, `remote`
    /// is `None` when the record has no remote issue or the issue is outside
    /// the fetched scope. A missing side never counts as changed.
    ///
    /// A record that has never been synced but whose two sides already carry
    /// the same content is `NoChange`: there is nothing to reconcile.
    pub fn classify(
        record: &SyncRecord,
        local: Option<&IssueFields>,
        remote: Option<&RemoteIssueSnapshot>,
    ) -> ChangeKind {
        if !record.has_baseline() {
            if let (Some(local), Some(remote)) = (local, remote) {
                if local.same_content(&remote.fields) {
                    return ChangeKind::NoChange;
                }
            }
        }

        let local_changed = local.is_some_and(|fields| record.local_differs(fields));
        let remote_changed = remote.is_some_and(|snapshot| record.remote_differs(snapshot));

        match (local_changed, remote_changed) {
            (false, false) => ChangeKind::NoChange,
            (true, false) => ChangeKind::LocalOnly,
            (false, true) => ChangeKind::RemoteOnly,
            (true, true) => ChangeKind::BothChanged,
        }
    }
}
