use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::local_file::LocalFileRecord;
use chrono::Utc;
use std::path::Path;

const LOCAL_FILE_COLUMNS: &str =
    "id, path, root, relative_path, created_at, updated_at, deleted, remote_number, remote_url";

/// Register a file under a root, or refresh it if the path is already known.
///
/// This is the write the crawler performs; the engine also uses it for files
/// it creates when pulling an issue that has no local file yet.
pub async fn register_file(
    pool: &DbPool,
    root: &Path,
    path: &Path,
) -> Result<LocalFileRecord, SyncError> {
    let relative_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    let now = Utc::now().timestamp();

    let record = sqlx::query_as::<_, LocalFileRecord>(&format!(
        r#"
        INSERT INTO local_files (path, root, relative_path, created_at, updated_at, deleted)
        VALUES (?, ?, ?, ?, ?, 0)
        ON CONFLICT(path) DO UPDATE SET
            updated_at = excluded.updated_at,
            deleted = 0
        RETURNING {}
        "#,
        LOCAL_FILE_COLUMNS
    ))
    .bind(path.to_string_lossy().to_string())
    .bind(root.to_string_lossy().to_string())
    .bind(&relative_path)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Get a local file record by id.
pub async fn get_local_file(pool: &DbPool, id: i64) -> Result<Option<LocalFileRecord>, SyncError> {
    let record = sqlx::query_as::<_, LocalFileRecord>(&format!(
        "SELECT {} FROM local_files WHERE id = ?",
        LOCAL_FILE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List files the crawler currently sees, ordered by id.
pub async fn list_active_files(pool: &DbPool) -> Result<Vec<LocalFileRecord>, SyncError> {
    let records = sqlx::query_as::<_, LocalFileRecord>(&format!(
        "SELECT {} FROM local_files WHERE deleted = 0 ORDER BY id ASC",
        LOCAL_FILE_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Record the remote issue a file was pushed to.
pub async fn set_remote_link(
    pool: &DbPool,
    id: i64,
    remote_number: i64,
    remote_url: &str,
) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE local_files SET remote_number = ?, remote_url = ?, updated_at = ? WHERE id = ?",
    )
    .bind(remote_number)
    .bind(remote_url)
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark a file as changed after the engine rewrote it.
pub async fn touch_file(pool: &DbPool, id: i64) -> Result<(), SyncError> {
    sqlx::query("UPDATE local_files SET updated_at = ? WHERE id = ?")
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Flag a file the crawler no longer finds.
pub async fn mark_deleted(pool: &DbPool, id: i64) -> Result<(), SyncError> {
    let result = sqlx::query("UPDATE local_files SET deleted = 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(SyncError::not_found_with_id("LocalFile", id.to_string()));
    }

    Ok(())
}
