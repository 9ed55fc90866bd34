//! Sync run models.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Direction of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Remote to local only (`sync-down`).
    #[serde(rename = "sync-down")]
    Pull,
    /// Local to remote only (`push`).
    Push,
    /// Both directions (`sync-bidirectional`).
    #[default]
    #[serde(rename = "sync-bidirectional")]
    Bidirectional,
}

impl SyncMode {
    /// Whether this mode may write to the remote tracker.
    pub fn writes_remote(self) -> bool {
        matches!(self, Self::Push | Self::Bidirectional)
    }

    /// Whether this mode may write local files.
    pub fn writes_local(self) -> bool {
        matches!(self, Self::Pull | Self::Bidirectional)
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync-down" | "pull" => Ok(Self::Pull),
            "push" => Ok(Self::Push),
            "sync-bidirectional" | "bidirectional" => Ok(Self::Bidirectional),
            other => Err(format!("unknown sync mode: {}", other)),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pull => write!(f, "sync-down"),
            Self::Push => write!(f, "push"),
            Self::Bidirectional => write!(f, "sync-bidirectional"),
        }
    }
}

/// Which remote issues a run considers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunScope {
    #[default]
    All,
    /// Only issues updated at or after the cutoff.
    Since(DateTime<Utc>),
}

impl RunScope {
    /// Stable key stored with the run, used to match resumable runs.
    pub fn key(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Since(cutoff) => format!(
                "since:{}",
                cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
        }
    }

    /// The cutoff, if incremental.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::All => None,
            Self::Since(cutoff) => Some(*cutoff),
        }
    }
}

impl From<Option<DateTime<Utc>>> for RunScope {
    fn from(since: Option<DateTime<Utc>>) -> Self {
        since.map(Self::Since).unwrap_or(Self::All)
    }
}

/// Status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Interrupted,
    /// Unfinished run discarded by a forced rescan.
    Abandoned,
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "completed" => Self::Completed,
            "interrupted" => Self::Interrupted,
            "abandoned" => Self::Abandoned,
            _ => Self::InProgress,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One invocation of the engine, matching the `sync_runs` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncRun {
    /// Run id (UUID v4).
    pub id: String,

    /// `sync-down`, `push` or `sync-bidirectional`.
    pub mode: String,

    /// Scope key, see [`RunScope::key`].
    pub scope: String,

    /// Conflict strategy name.
    pub strategy: String,

    /// `in_progress`, `completed`, `interrupted` or `abandoned`.
    pub status: String,

    /// Whether the run was a dry run.
    pub dry_run: bool,

    /// When the run started (Unix).
    pub started_at: i64,

    /// When the run finished (Unix, optional).
    pub finished_at: Option<i64>,

    /// Error that interrupted the run (optional).
    pub last_error: Option<String>,
}

impl SyncRun {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> RunStatus {
        RunStatus::from(self.status.as_str())
    }

    /// Whether a later invocation may pick this run up again.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status_enum(),
            RunStatus::InProgress | RunStatus::Interrupted
        )
    }
}
