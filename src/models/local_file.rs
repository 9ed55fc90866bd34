//! Local file records produced by the crawler.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A markdown file known to the local state store.
///
/// The engine treats these rows as read-mostly: it only writes back the
/// remote link after creating an issue, and registers files it writes for
/// issues that originated remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LocalFileRecord {
    /// Sequential id.
    pub id: i64,

    /// Absolute path of the file.
    pub path: String,

    /// Root directory the file was crawled from.
    pub root: String,

    /// Path relative to `root`.
    pub relative_path: String,

    /// When the file was first seen (Unix).
    pub created_at: i64,

    /// When the file was last seen changed (Unix).
    pub updated_at: i64,

    /// Whether the crawler saw the file disappear.
    pub deleted: bool,

    /// Remote issue number once the file is linked.
    pub remote_number: Option<i64>,

    /// Remote issue URL once the file is linked.
    pub remote_url: Option<String>,
}

impl LocalFileRecord {
    /// Whether the file is a markdown document.
    pub fn is_markdown(&self) -> bool {
        let lower = self.path.to_lowercase();
        lower.ends_with(".md") || lower.ends_with(".markdown")
    }

    /// Whether the file has been linked to a remote issue.
    pub fn is_linked(&self) -> bool {
        self.remote_number.is_some()
    }
}
