//! Sync run persistence and checkpoints.
//!
//! Every non-dry run has a row in `sync_runs`. Each record the run finishes
//! gets a row in `sync_run_checkpoints`, committed together with the
//! record's new baseline, so a run cut short can be picked up by the next
//! invocation without redoing finished records.

use crate::db::pool::DbPool;
use crate::error::SyncError;
use crate::models::conflict::ConflictStrategy;
use crate::models::sync_report::RecordOutcome;
use crate::models::sync_run::{RunScope, RunStatus, SyncMode, SyncRun};
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

const SYNC_RUN_COLUMNS: &str =
    "id, mode, scope, strategy, status, dry_run, started_at, finished_at, last_error";

/// Get the current Unix timestamp.
fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Get a run by id.
pub async fn get_run(pool: &DbPool, id: &str) -> Result<Option<SyncRun>, SyncError> {
    let run = sqlx::query_as::<_, SyncRun>(&format!(
        "SELECT {} FROM sync_runs WHERE id = ?",
        SYNC_RUN_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(run)
}

/// Latest unfinished run for the same mode and scope, if any.
pub async fn find_resumable_run(
    pool: &DbPool,
    mode: SyncMode,
    scope: &RunScope,
) -> Result<Option<SyncRun>, SyncError> {
    let run = sqlx::query_as::<_, SyncRun>(&format!(
        r#"
        SELECT {}
        FROM sync_runs
        WHERE mode = ? AND scope = ? AND status IN ('in_progress', 'interrupted')
        ORDER BY started_at DESC, rowid DESC
        LIMIT 1
        "#,
        SYNC_RUN_COLUMNS
    ))
    .bind(mode.to_string())
    .bind(scope.key())
    .fetch_optional(pool)
    .await?;

    Ok(run)
}

/// Insert a new `in_progress` run.
pub async fn start_run(
    pool: &DbPool,
    mode: SyncMode,
    scope: &RunScope,
    strategy: ConflictStrategy,
) -> Result<SyncRun, SyncError> {
    let run = sqlx::query_as::<_, SyncRun>(&format!(
        r#"
        INSERT INTO sync_runs (id, mode, scope, strategy, status, dry_run, started_at)
        VALUES (?, ?, ?, ?, 'in_progress', 0, ?)
        RETURNING {}
        "#,
        SYNC_RUN_COLUMNS
    ))
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(mode.to_string())
    .bind(scope.key())
    .bind(strategy.to_string())
    .bind(now())
    .fetch_one(pool)
    .await?;

    Ok(run)
}

/// Discard unfinished runs for a mode and scope along with their checkpoints.
///
/// Returns how many runs were abandoned.
pub async fn abandon_runs(
    pool: &DbPool,
    mode: SyncMode,
    scope: &RunScope,
) -> Result<u64, SyncError> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        DELETE FROM sync_run_checkpoints WHERE run_id IN (
            SELECT id FROM sync_runs
            WHERE mode = ? AND scope = ? AND status IN ('in_progress', 'interrupted')
        )
        "#,
    )
    .bind(mode.to_string())
    .bind(scope.key())
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE sync_runs SET status = 'abandoned', finished_at = ?
        WHERE mode = ? AND scope = ? AND status IN ('in_progress', 'interrupted')
        "#,
    )
    .bind(now())
    .bind(mode.to_string())
    .bind(scope.key())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(result.rows_affected())
}

/// Resume the matching unfinished run, or start a new one.
///
/// With `force`, unfinished runs are abandoned and a fresh run starts.
/// Returns the run and whether it was resumed.
pub async fn begin_run(
    pool: &DbPool,
    mode: SyncMode,
    scope: &RunScope,
    strategy: ConflictStrategy,
    force: bool,
) -> Result<(SyncRun, bool), SyncError> {
    if force {
        let abandoned = abandon_runs(pool, mode, scope).await?;
        if abandoned > 0 {
            log::info!("[sync] Abandoned {} unfinished {} run(s)", abandoned, mode);
        }
    } else if let Some(run) = find_resumable_run(pool, mode, scope).await? {
        sqlx::query(
            "UPDATE sync_runs SET status = 'in_progress', strategy = ?, last_error = NULL WHERE id = ?",
        )
        .bind(strategy.to_string())
        .bind(&run.id)
        .execute(pool)
        .await?;

        let resumed = get_run(pool, &run.id)
            .await?
            .ok_or_else(|| SyncError::not_found_with_id("SyncRun", run.id.clone()))?;
        log::info!(
            "[sync] Resuming {} run {} ({} records already done)",
            mode,
            resumed.id,
            checkpointed_records(pool, &resumed.id).await?.len()
        );
        return Ok((resumed, true));
    }

    let run = start_run(pool, mode, scope, strategy).await?;
    Ok((run, false))
}

/// Ids of records already finished under a run.
pub async fn checkpointed_records(pool: &DbPool, run_id: &str) -> Result<HashSet<i64>, SyncError> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT record_id FROM sync_run_checkpoints WHERE run_id = ?")
            .bind(run_id)
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Whether a record is already finished under a run.
pub async fn is_done(pool: &DbPool, run_id: &str, record_id: i64) -> Result<bool, SyncError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM sync_run_checkpoints WHERE run_id = ? AND record_id = ?",
    )
    .bind(run_id)
    .bind(record_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}

/// Mark a record finished under a run.
///
/// Takes a connection so the caller can commit it with the record baseline.
pub async fn mark_done(
    conn: &mut SqliteConnection,
    run_id: &str,
    record_id: i64,
    outcome: RecordOutcome,
) -> Result<(), SyncError> {
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO sync_run_checkpoints (run_id, record_id, outcome, completed_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(run_id)
    .bind(record_id)
    .bind(outcome.to_string())
    .bind(now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Mark a run completed and discard its checkpoint.
pub async fn complete_run(pool: &DbPool, run_id: &str) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM sync_run_checkpoints WHERE run_id = ?")
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE sync_runs SET status = 'completed', finished_at = ?, last_error = NULL WHERE id = ?",
    )
    .bind(now())
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Leave a run `interrupted`, keeping its checkpoint.
pub async fn interrupt_run(pool: &DbPool, run_id: &str, error: &str) -> Result<(), SyncError> {
    sqlx::query(
        "UPDATE sync_runs SET status = 'interrupted', finished_at = ?, last_error = ? WHERE id = ?",
    )
    .bind(now())
    .bind(error)
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent runs, newest first.
pub async fn recent_runs(pool: &DbPool, limit: i64) -> Result<Vec<SyncRun>, SyncError> {
    let runs = sqlx::query_as::<_, SyncRun>(&format!(
        "SELECT {} FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
        SYNC_RUN_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(runs)
}

/// Status of a run, for callers that only hold its id.
pub async fn run_status(pool: &DbPool, run_id: &str) -> Result<RunStatus, SyncError> {
    get_run(pool, run_id)
        .await?
        .map(|run| run.status_enum())
        .ok_or_else(|| SyncError::not_found_with_id("SyncRun", run_id))
}
