//! SQLite connection pool for the state store.
//!
//! The store runs in WAL mode so record tasks can read while the engine's
//! write gate holds the single writer. Pool size follows the engine's
//! record concurrency.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = Pool<Sqlite>;

/// Sizing and lock-wait settings for the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::for_concurrency(4)
    }
}

impl StoreOptions {
    /// One connection per concurrent record task plus one for the run itself.
    pub fn for_concurrency(concurrency: usize) -> Self {
        let tasks = u32::try_from(concurrency.max(1)).unwrap_or(u32::MAX);
        Self {
            max_connections: tasks.saturating_add(1),
            busy_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Open the state file, creating it if needed (but not its directory).
pub async fn create_pool(db_path: &Path, options: &StoreOptions) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout)
        .pragma("wal_autocheckpoint", "1000");

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .min_connections(1)
        .acquire_timeout(options.acquire_timeout)
        .connect_with(connect_options)
        .await?;

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;
    if !mode.eq_ignore_ascii_case("wal") {
        log::warn!(
            "[db] {} is in {} journal mode; concurrent record tasks will contend",
            db_path.display(),
            mode
        );
    }

    Ok(pool)
}
