use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::issue::{IssueFields, RemoteIssueSnapshot};
use crate::models::sync_record::{SyncRecord, SyncRecordRow};
use chrono::Utc;
use sqlx::SqliteConnection;

const SYNC_RECORD_COLUMNS: &str = r#"
    id, local_file_id, remote_number, remote_url, last_synced_hash,
    last_remote_updated_at, last_remote_etag, title, body, labels, assignees,
    milestone, state, project_fields, last_synced_at
"#;

async fn fetch_where(
    pool: &DbPool,
    clause: &str,
    value: i64,
) -> Result<Option<SyncRecord>, SyncError> {
    let row = sqlx::query_as::<_, SyncRecordRow>(&format!(
        "SELECT {} FROM sync_records WHERE {} = ?",
        SYNC_RECORD_COLUMNS, clause
    ))
    .bind(value)
    .fetch_optional(pool)
    .await?;

    row.map(SyncRecord::try_from).transpose()
}

/// Get a sync record by id.
pub async fn get_sync_record(pool: &DbPool, id: i64) -> Result<Option<SyncRecord>, SyncError> {
    fetch_where(pool, "id", id).await
}

/// Get the sync record linked to a remote issue number.
pub async fn get_by_remote_number(
    pool: &DbPool,
    remote_number: i64,
) -> Result<Option<SyncRecord>, SyncError> {
    fetch_where(pool, "remote_number", remote_number).await
}

/// Get the sync record originating from a local file.
pub async fn get_by_local_file(
    pool: &DbPool,
    local_file_id: i64,
) -> Result<Option<SyncRecord>, SyncError> {
    fetch_where(pool, "local_file_id", local_file_id).await
}

/// List every sync record, ordered by id.
pub async fn list_sync_records(pool: &DbPool) -> Result<Vec<SyncRecord>, SyncError> {
    let rows = sqlx::query_as::<_, SyncRecordRow>(&format!(
        "SELECT {} FROM sync_records ORDER BY id ASC",
        SYNC_RECORD_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(SyncRecord::try_from).collect()
}

async fn insert_record(
    pool: &DbPool,
    local_file_id: Option<i64>,
    remote_number: Option<i64>,
    remote_url: Option<&str>,
    fields: &IssueFields,
) -> Result<SyncRecord, SyncError> {
    let fields = fields.normalized();
    let now = Utc::now().timestamp();

    let row = sqlx::query_as::<_, SyncRecordRow>(&format!(
        r#"
        INSERT INTO sync_records (
            local_file_id, remote_number, remote_url, title, body, labels,
            assignees, milestone, state, project_fields, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING {}
        "#,
        SYNC_RECORD_COLUMNS
    ))
    .bind(local_file_id)
    .bind(remote_number)
    .bind(remote_url)
    .bind(&fields.title)
    .bind(&fields.body)
    .bind(serde_json::to_string(&fields.labels)?)
    .bind(serde_json::to_string(&fields.assignees)?)
    .bind(&fields.milestone)
    .bind(fields.state.to_string())
    .bind(serde_json::to_string(&fields.project_fields)?)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    SyncRecord::try_from(row)
}

/// Find or create the sync record for an issue-tagged local file.
///
/// A file whose front matter names an issue number adopts an existing
/// remote-origin record for that number. Two files claiming the same issue
/// is a validation error for the second one.
pub async fn ensure_for_local_file(
    pool: &DbPool,
    local_file_id: i64,
    remote_number: Option<i64>,
    remote_url: Option<&str>,
    fields: &IssueFields,
) -> Result<SyncRecord, SyncError> {
    if let Some(record) = get_by_local_file(pool, local_file_id).await? {
        if record.remote_number.is_none() {
            if let Some(number) = remote_number {
                if let Some(other) = get_by_remote_number(pool, number).await? {
                    return Err(SyncError::validation_field(
                        format!(
                            "Issue #{} is already tracked by sync record {}",
                            number, other.id
                        ),
                        "issue",
                    ));
                }
                let url = remote_url.unwrap_or_default();
                record_remote_link(pool, record.id, number, url).await?;
                return get_sync_record(pool, record.id)
                    .await?
                    .ok_or_else(|| SyncError::not_found_with_id("SyncRecord", record.id.to_string()));
            }
        }
        return Ok(record);
    }

    if let Some(number) = remote_number {
        if let Some(existing) = get_by_remote_number(pool, number).await? {
            if existing.local_file_id.is_some() {
                return Err(SyncError::validation_field(
                    format!(
                        "Issue #{} is already linked to another local file",
                        number
                    ),
                    "issue",
                ));
            }
            link_local_file(pool, existing.id, local_file_id).await?;
            return get_sync_record(pool, existing.id)
                .await?
                .ok_or_else(|| SyncError::not_found_with_id("SyncRecord", existing.id.to_string()));
        }
    }

    insert_record(pool, Some(local_file_id), remote_number, remote_url, fields).await
}

/// Find or create the sync record for a remote issue with no local file yet.
pub async fn ensure_for_remote(
    pool: &DbPool,
    snapshot: &RemoteIssueSnapshot,
) -> Result<SyncRecord, SyncError> {
    if let Some(record) = get_by_remote_number(pool, snapshot.number).await? {
        return Ok(record);
    }

    insert_record(
        pool,
        None,
        Some(snapshot.number),
        Some(&snapshot.url),
        &snapshot.fields,
    )
    .await
}

/// Persist the receipt of a remote create on the record.
pub async fn record_remote_link(
    pool: &DbPool,
    id: i64,
    remote_number: i64,
    remote_url: &str,
) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE sync_records SET remote_number = ?, remote_url = ?, updated_at = ? WHERE id = ?",
    )
    .bind(remote_number)
    .bind(remote_url)
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Attach a local file to a record first seen remotely.
pub async fn link_local_file(pool: &DbPool, id: i64, local_file_id: i64) -> Result<(), SyncError> {
    sqlx::query("UPDATE sync_records SET local_file_id = ?, updated_at = ? WHERE id = ?")
        .bind(local_file_id)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Store the last-synced snapshot of a record.
///
/// Takes a connection so the caller can commit it together with the run
/// checkpoint.
pub async fn save_baseline(
    conn: &mut SqliteConnection,
    id: i64,
    fields: &IssueFields,
    remote_updated_at: Option<i64>,
    remote_etag: Option<&str>,
) -> Result<(), SyncError> {
    let fields = fields.normalized();
    let now = Utc::now().timestamp();

    let result = sqlx::query(
        r#"
        UPDATE sync_records SET
            last_synced_hash = ?,
            last_remote_updated_at = ?,
            last_remote_etag = ?,
            title = ?,
            body = ?,
            labels = ?,
            assignees = ?,
            milestone = ?,
            state = ?,
            project_fields = ?,
            last_synced_at = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(fields.content_hash())
    .bind(remote_updated_at)
    .bind(remote_etag)
    .bind(&fields.title)
    .bind(&fields.body)
    .bind(serde_json::to_string(&fields.labels)?)
    .bind(serde_json::to_string(&fields.assignees)?)
    .bind(&fields.milestone)
    .bind(fields.state.to_string())
    .bind(serde_json::to_string(&fields.project_fields)?)
    .bind(now)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SyncError::not_found_with_id("SyncRecord", id.to_string()));
    }

    Ok(())
}
