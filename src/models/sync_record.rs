//! Sync records: the persisted mapping between a local file and a remote issue.

use crate::error::SyncError;
use crate::models::issue::{IssueFields, IssueState, RemoteIssueSnapshot};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Database row matching the `sync_records` table.
///
/// List-valued fields are stored as JSON text.
#[derive(Debug, Clone, FromRow)]
pub struct SyncRecordRow {
    pub id: i64,
    pub local_file_id: Option<i64>,
    pub remote_number: Option<i64>,
    pub remote_url: Option<String>,
    pub last_synced_hash: Option<String>,
    pub last_remote_updated_at: Option<i64>,
    pub last_remote_etag: Option<String>,
    pub title: String,
    pub body: String,
    pub labels: String,
    pub assignees: String,
    pub milestone: Option<String>,
    pub state: String,
    pub project_fields: String,
    pub last_synced_at: Option<i64>,
}

/// The unit the engine operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRecord {
    pub id: i64,

    /// Originating local file; `None` for an issue first seen remotely.
    pub local_file_id: Option<i64>,

    /// Remote issue number; `None` means not yet created remotely.
    pub remote_number: Option<i64>,

    pub remote_url: Option<String>,

    /// Content hash of `fields` at the last successful sync.
    pub last_synced_hash: Option<String>,

    /// Remote `updated_at` (Unix) observed at the last successful sync.
    pub last_remote_updated_at: Option<i64>,

    /// Remote ETag observed at the last successful sync.
    pub last_remote_etag: Option<String>,

    /// Field values as of the last successful sync.
    pub fields: IssueFields,

    /// When the record was last synced (Unix).
    pub last_synced_at: Option<i64>,
}

impl SyncRecord {
    /// Whether the record has ever completed a sync.
    pub fn has_baseline(&self) -> bool {
        self.last_synced_hash.is_some()
    }

    /// Whether the remote side differs from the last-synced snapshot.
    pub fn remote_differs(&self, snapshot: &RemoteIssueSnapshot) -> bool {
        let Some(last_updated) = self.last_remote_updated_at else {
            return true;
        };

        if snapshot.from_cache {
            if let (Some(last_etag), Some(etag)) = (&self.last_remote_etag, &snapshot.etag) {
                return last_etag != etag;
            }
        }

        if snapshot.updated_at.timestamp() != last_updated {
            return true;
        }

        match (&self.last_remote_etag, &snapshot.etag) {
            (Some(last_etag), Some(etag)) => last_etag != etag,
            _ => false,
        }
    }

    /// Whether the local fields differ from the last-synced hash.
    pub fn local_differs(&self, local: &IssueFields) -> bool {
        match &self.last_synced_hash {
            Some(hash) => *hash != local.content_hash(),
            None => true,
        }
    }
}

impl TryFrom<SyncRecordRow> for SyncRecord {
    type Error = SyncError;

    fn try_from(row: SyncRecordRow) -> Result<Self, Self::Error> {
        let labels: Vec<String> = serde_json::from_str(&row.labels)?;
        let assignees: Vec<String> = serde_json::from_str(&row.assignees)?;
        let project_fields: BTreeMap<String, String> = serde_json::from_str(&row.project_fields)?;

        Ok(Self {
            id: row.id,
            local_file_id: row.local_file_id,
            remote_number: row.remote_number,
            remote_url: row.remote_url,
            last_synced_hash: row.last_synced_hash,
            last_remote_updated_at: row.last_remote_updated_at,
            last_remote_etag: row.last_remote_etag,
            fields: IssueFields {
                title: row.title,
                body: row.body,
                labels,
                assignees,
                milestone: row.milestone,
                state: IssueState::from(row.state.as_str()),
                project_fields,
            },
            last_synced_at: row.last_synced_at,
        })
    }
}
