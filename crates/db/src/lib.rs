use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
    Error, Executor, Pool, Sqlite,
    sqlite::{
        SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
        SqliteSynchronous,
    },
};
use tracing::info;
use utils::assets::database_path;

pub mod invariants;
pub mod metrics;
pub mod models;
pub mod position;
pub mod reorder;
pub mod retry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use metrics::{ReorderMetrics, ReorderMetricsSnapshot};
pub use reorder::{Entity, ReorderError, ReorderService};
pub use retry::{RetryConfig, Retryable, is_retryable_error, with_retry};

// ============================================================================
// Connection Pool Configuration
// ============================================================================

/// Default maximum connections in the pool.
/// SQLite benefits from limited connections due to single-writer model.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle connections to maintain.
const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Connection acquisition timeout in seconds.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// How long a writer waits on SQLite's lock before reporting BUSY.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Idle connection timeout in seconds (10 minutes).
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Get max connections from environment or use default.
fn get_max_connections() -> u32 {
    utils::env::parsed_or(
        "TASKBOARD_SQLITE_MAX_CONNECTIONS",
        DEFAULT_MAX_CONNECTIONS,
        |&n| n > 0 && n <= 100,
    )
}

/// Apply performance pragmas to a SQLite connection.
/// These pragmas are applied on every new connection via `after_connect`.
///
/// - `temp_store = MEMORY` (2): Store temporary tables in memory
/// - `cache_size = -16000`: 16MB page cache (negative = KB)
/// - `synchronous = NORMAL`: safe with WAL, set explicitly per connection
async fn apply_performance_pragmas(conn: &mut SqliteConnection) -> Result<(), Error> {
    conn.execute("PRAGMA temp_store = 2").await?;
    conn.execute("PRAGMA synchronous = NORMAL").await?;
    conn.execute("PRAGMA cache_size = -16000").await?;
    Ok(())
}

/// Connection options shared by every pool this crate opens.
///
/// Foreign keys stay on (sqlx's default); list and task deletion rely on it.
pub fn connect_options(db_path: &Path) -> Result<SqliteConnectOptions, Error> {
    Ok(
        SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.to_string_lossy()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS)),
    )
}

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open the database at [`database_path`] and apply pending migrations.
    pub async fn new() -> Result<DBService, Error> {
        Self::connect(&database_path()).await
    }

    /// Open the database at `db_path` and apply pending migrations.
    pub async fn connect(db_path: &Path) -> Result<DBService, Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let max_connections = get_max_connections();
        info!(
            path = %db_path.display(),
            max_connections,
            min_connections = DEFAULT_MIN_CONNECTIONS,
            "Initializing SQLite connection pool"
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(DEFAULT_MIN_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)))
            .after_connect(|conn, _meta| {
                Box::pin(async move { apply_performance_pragmas(conn).await })
            })
            .connect_with(connect_options(db_path)?)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(DBService { pool })
    }

    /// A reordering engine over this pool.
    pub fn reorder_service(&self) -> ReorderService {
        ReorderService::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_runs_migrations_and_pragmas() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = DBService::connect(&dir.path().join("nested").join("boards.sqlite"))
            .await
            .unwrap();

        let (boards,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM boards")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(boards, 0);

        let (fk,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(fk, 1);

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("boards.sqlite");
        let first = DBService::connect(&path).await.unwrap();
        first.pool.close().await;
        assert!(DBService::connect(&path).await.is_ok());
    }
}
