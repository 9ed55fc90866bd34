use crate::db::pool::DbPool;
use crate::error::SyncError;
use chrono::Utc;
use sqlx::FromRow;

/// A cached GET response, keyed by resource and the ETag it was served with.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CachedResponse {
    pub resource_id: String,
    pub etag: String,
    pub body: String,
    /// Next page link of a cached listing page.
    pub next_link: Option<String>,
    pub cached_at: i64,
}

/// Get the cached response for a resource, if any.
pub async fn lookup(pool: &DbPool, resource_id: &str) -> Result<Option<CachedResponse>, SyncError> {
    let row = sqlx::query_as::<_, CachedResponse>(
        r#"
        SELECT resource_id, etag, body, next_link, cached_at
        FROM response_cache
        WHERE resource_id = ?
        ORDER BY cached_at DESC
        LIMIT 1
        "#,
    )
    .bind(resource_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Store a response under its ETag, replacing any older ETag for the resource.
pub async fn store(
    pool: &DbPool,
    resource_id: &str,
    etag: &str,
    body: &str,
    next_link: Option<&str>,
) -> Result<(), SyncError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM response_cache WHERE resource_id = ? AND etag != ?")
        .bind(resource_id)
        .bind(etag)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO response_cache (resource_id, etag, body, next_link, cached_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(resource_id)
    .bind(etag)
    .bind(body)
    .bind(next_link)
    .bind(Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

/// Drop a resource from the cache.
pub async fn invalidate(pool: &DbPool, resource_id: &str) -> Result<(), SyncError> {
    sqlx::query("DELETE FROM response_cache WHERE resource_id = ?")
        .bind(resource_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete entries cached before the cutoff. Returns how many were removed.
pub async fn purge_older_than(pool: &DbPool, cutoff: i64) -> Result<u64, SyncError> {
    let result = sqlx::query("DELETE FROM response_cache WHERE cached_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
