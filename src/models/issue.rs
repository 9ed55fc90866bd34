//! Issue field values shared by local files, sync records and remote snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Open/closed state of an issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

impl From<&str> for IssueState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// The synchronized field values of one issue.
///
/// Fields are replaced wholesale on sync; there is no line-level merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFields {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub milestone: Option<String>,
    pub state: IssueState,
    /// Project-board field name to display value.
    pub project_fields: BTreeMap<String, String>,
}

impl IssueFields {
    /// Canonical form used for hashing and comparison.
    ///
    /// Labels and assignees are order-insensitive. Surrounding whitespace on
    /// the title, leading blank lines and trailing whitespace on the body are
    /// not content.
    pub fn normalized(&self) -> Self {
        let mut labels: Vec<String> = self.labels.iter().map(|l| l.trim().to_string()).collect();
        labels.sort();
        labels.dedup();

        let mut assignees: Vec<String> =
            self.assignees.iter().map(|a| a.trim().to_string()).collect();
        assignees.sort();
        assignees.dedup();

        Self {
            title: self.title.trim().to_string(),
            body: self.body.trim_start_matches(['\r', '\n']).trim_end().to_string(),
            labels,
            assignees,
            milestone: self
                .milestone
                .as_ref()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            state: self.state,
            project_fields: self.project_fields.clone(),
        }
    }

    /// The normalized fields that take part in sync.
    ///
    /// Project-board values are pulled into local files but never pushed, so
    /// they are left out of hashing and comparison.
    fn synced_content(&self) -> Self {
        let mut content = self.normalized();
        content.project_fields.clear();
        content
    }

    /// SHA-256 over the canonical JSON form of the synced fields.
    pub fn content_hash(&self) -> String {
        // serde_json keeps struct field order stable
        let canonical = serde_json::to_vec(&self.synced_content()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }

    /// Whether two field sets carry the same synced content.
    pub fn same_content(&self, other: &IssueFields) -> bool {
        self.synced_content() == other.synced_content()
    }
}

/// The tracker's current view of one issue.
///
/// Snapshots are replaced wholesale on every fetch, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteIssueSnapshot {
    /// Issue number (the remote id).
    pub number: i64,
    pub url: String,
    pub fields: IssueFields,
    pub updated_at: DateTime<Utc>,
    /// Per-issue ETag when the snapshot came from a single-issue request.
    pub etag: Option<String>,
    /// Whether the snapshot was served from the conditional cache (304).
    pub from_cache: bool,
}

/// Receipt for a newly created remote issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedIssue {
    pub number: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub etag: Option<String>,
}

/// Changed fields to send in an update.
///
/// `None` leaves a field untouched; `milestone: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignees: Option<Vec<String>>,
    pub milestone: Option<Option<String>>,
    pub state: Option<IssueState>,
}

impl IssuePatch {
    /// Fields of `target` that differ from `base`.
    pub fn between(base: &IssueFields, target: &IssueFields) -> Self {
        let base = base.normalized();
        let target = target.normalized();

        Self {
            title: (base.title != target.title).then(|| target.title.clone()),
            body: (base.body != target.body).then(|| target.body.clone()),
            labels: (base.labels != target.labels).then(|| target.labels.clone()),
            assignees: (base.assignees != target.assignees).then(|| target.assignees.clone()),
            milestone: (base.milestone != target.milestone).then(|| target.milestone.clone()),
            state: (base.state != target.state).then_some(target.state),
        }
    }

    /// Every pushable field of `fields`.
    pub fn full(fields: &IssueFields) -> Self {
        let fields = fields.normalized();
        Self {
            title: Some(fields.title),
            body: Some(fields.body),
            labels: Some(fields.labels),
            assignees: Some(fields.assignees),
            milestone: Some(fields.milestone),
            state: Some(fields.state),
        }
    }

    /// Whether nothing would be sent.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.labels.is_none()
            && self.assignees.is_none()
            && self.milestone.is_none()
            && self.state.is_none()
    }

    /// Names of the fields carried by this patch, for logging.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title");
        }
        if self.body.is_some() {
            names.push("body");
        }
        if self.labels.is_some() {
            names.push("labels");
        }
        if self.assignees.is_some() {
            names.push("assignees");
        }
        if self.milestone.is_some() {
            names.push("milestone");
        }
        if self.state.is_some() {
            names.push("state");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str) -> IssueFields {
        IssueFields {
            title: title.to_string(),
            body: "Steps to reproduce".to_string(),
            labels: vec!["bug".to_string(), "auth".to_string()],
            assignees: vec!["octocat".to_string()],
            milestone: Some("v1.2".to_string()),
            state: IssueState::Open,
            project_fields: BTreeMap::new(),
        }
    }

    #[test]
    fn test_issue_state_from_str() {
        assert_eq!(IssueState::from("closed"), IssueState::Closed);
        assert_eq!(IssueState::from("CLOSED"), IssueState::Closed);
        assert_eq!(IssueState::from("open"), IssueState::Open);
        assert_eq!(IssueState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_hash_ignores_label_order_and_trailing_whitespace() {
        let a = fields("Fix login bug");
        let mut b = a.clone();
        b.labels.reverse();
        b.body.push_str("\n\n");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_changes_with_title() {
        let a = fields("Fix login bug");
        let b = fields("Fix login bug (v2)");
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_project_fields_do_not_affect_hash() {
        let a = fields("Fix login bug");
        let mut b = a.clone();
        b.project_fields
            .insert("Status".to_string(), "In Progress".to_string());
        assert_eq!(a.content_hash(), b.content_hash());
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_patch_between_only_carries_changes() {
        let base = fields("Fix login bug");
        let mut target = base.clone();
        target.title = "Fix login bug (v2)".to_string();
        target.milestone = None;

        let patch = IssuePatch::between(&base, &target);
        assert_eq!(patch.title.as_deref(), Some("Fix login bug (v2)"));
        assert_eq!(patch.milestone, Some(None));
        assert!(patch.body.is_none());
        assert!(patch.labels.is_none());
        assert_eq!(patch.field_names(), vec!["title", "milestone"]);
    }

    #[test]
    fn test_patch_of_equal_fields_is_empty() {
        let base = fields("Same");
        assert!(IssuePatch::between(&base, &base.clone()).is_empty());
    }

    #[test]
    fn test_full_patch_sets_every_field() {
        let patch = IssuePatch::full(&fields("New"));
        assert_eq!(patch.field_names().len(), 6);
        assert_eq!(
            patch.labels,
            Some(vec!["auth".to_string(), "bug".to_string()])
        );
    }
}
