//! The local side of a sync: issue-tagged markdown files.
//!
//! The engine never walks directories itself. It asks an [`IssueWorkspace`]
//! for the issue files the crawler already registered, and hands it the
//! files to write back.

use crate::db::local_files;
use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::issue::IssueFields;
use crate::services::markdown::{self, IssueFrontMatter};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One issue-tagged markdown file.
#[derive(Debug, Clone)]
pub struct IssueFile {
    pub local_file_id: i64,
    pub path: PathBuf,
    pub front_matter: IssueFrontMatter,
    pub body: String,
    /// Last modification time of the file.
    pub mtime: DateTime<Utc>,
}

impl IssueFile {
    /// Synced field values of the file.
    pub fn fields(&self) -> IssueFields {
        self.front_matter.to_fields(&self.body)
    }

    pub fn remote_number(&self) -> Option<i64> {
        self.front_matter.remote_number()
    }
}

/// Source and sink for local issue files.
#[allow(async_fn_in_trait)]
pub trait IssueWorkspace {
    /// Every issue-tagged file currently known.
    async fn list_issue_files(&self) -> Result<Vec<IssueFile>, SyncError>;

    /// Write a file atomically and return its new modification time.
    async fn write_issue_file(
        &self,
        path: &Path,
        front_matter: &IssueFrontMatter,
        body: &str,
    ) -> Result<DateTime<Utc>, SyncError>;

    /// Where to put an issue that has no local file yet.
    fn path_for_new_issue(&self, number: i64, title: &str) -> PathBuf;

    /// Make a file written by the engine known to the store; returns its id.
    async fn register_new_file(&self, path: &Path) -> Result<i64, SyncError>;
}

/// Filesystem workspace over the files registered in `local_files`.
#[derive(Debug, Clone)]
pub struct MarkdownWorkspace {
    pool: DbPool,
    root: PathBuf,
    /// Directory for issues pulled from the remote.
    issues_dir: PathBuf,
}

impl MarkdownWorkspace {
    pub fn new(pool: DbPool, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pool,
            issues_dir: root.join("issues"),
            root,
        }
    }

    /// Put issues pulled from the remote somewhere other than `<root>/issues`.
    pub fn with_issues_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.issues_dir = dir.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn modified_at(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

impl IssueWorkspace for MarkdownWorkspace {
    async fn list_issue_files(&self) -> Result<Vec<IssueFile>, SyncError> {
        let records = local_files::list_active_files(&self.pool).await?;
        let mut files = Vec::new();

        for record in records.into_iter().filter(|r| r.is_markdown()) {
            let path = PathBuf::from(&record.path);

            // stat first: a file that vanishes at either step is skipped
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("[sync] {} is registered but missing, skipping", record.path);
                    continue;
                }
                Err(e) => {
                    log::warn!("[sync] Failed to stat {}: {}", record.path, e);
                    continue;
                }
            };

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("[sync] {} is registered but missing, skipping", record.path);
                    continue;
                }
                Err(e) => {
                    log::warn!("[sync] Failed to read {}: {}", record.path, e);
                    continue;
                }
            };

            let parsed = match markdown::parse_issue_file(&content) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("[sync] Invalid front matter in {}: {}", record.path, e);
                    continue;
                }
            };

            let (front_matter, body) = parsed;

            files.push(IssueFile {
                local_file_id: record.id,
                path,
                front_matter,
                body,
                mtime: modified_at(&metadata),
            });
        }

        Ok(files)
    }

    async fn write_issue_file(
        &self,
        path: &Path,
        front_matter: &IssueFrontMatter,
        body: &str,
    ) -> Result<DateTime<Utc>, SyncError> {
        let display = path.display().to_string();
        let write_err = |e: std::io::Error| SyncError::local_write(e.to_string(), display.clone());

        let content = markdown::render_issue_file(front_matter, body)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SyncError::local_write("Path has no file name", display.clone()))?;
        let tmp_path = path.with_file_name(format!(".{}.issue-sync.tmp", file_name));

        tokio::fs::write(&tmp_path, content.as_bytes())
            .await
            .map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }

        let metadata = tokio::fs::metadata(path).await.map_err(write_err)?;
        Ok(modified_at(&metadata))
    }

    fn path_for_new_issue(&self, number: i64, title: &str) -> PathBuf {
        self.issues_dir
            .join(markdown::file_name_for_issue(number, title))
    }

    async fn register_new_file(&self, path: &Path) -> Result<i64, SyncError> {
        let record = local_files::register_file(&self.pool, &self.root, path).await?;
        Ok(record.id)
    }
}
