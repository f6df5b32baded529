use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::list::List;

/// Root container. Boards hold lists through the membership ledger only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub id: Uuid,
    pub title: String,
    /// Number of distinct lists with at least one membership row on this board
    pub list_count: i64,
    /// Incremented by every mutation that touches this board's containers
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBoard {
    pub title: String,
}

impl Board {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Board>(
            r#"SELECT id, title, list_count, version, created_at, updated_at
               FROM boards
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_all<'e, E>(executor: E) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Board>(
            r#"SELECT id, title, list_count, version, created_at, updated_at
               FROM boards
               ORDER BY created_at ASC, id ASC"#,
        )
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateBoard,
        id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Board>(
            r#"INSERT INTO boards (id, title)
               VALUES ($1, $2)
               RETURNING id, title, list_count, version, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&data.title)
        .fetch_one(executor)
        .await
    }

    /// Bump `version` on every listed board.
    ///
    /// Issued as the first statement of a reordering transaction: a write as the
    /// opening statement makes SQLite take its write lock up front (waiting under the
    /// busy handler) instead of failing a later read-to-write upgrade.
    pub async fn bump_versions(
        conn: &mut SqliteConnection,
        board_ids: &[Uuid],
    ) -> Result<(), sqlx::Error> {
        for board_id in board_ids {
            sqlx::query(
                r#"UPDATE boards
                   SET version = version + 1, updated_at = datetime('now', 'subsec')
                   WHERE id = $1"#,
            )
            .bind(board_id)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    pub async fn adjust_list_count<'e, E>(
        executor: E,
        id: Uuid,
        delta: i64,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(r#"UPDATE boards SET list_count = list_count + $2 WHERE id = $1"#)
            .bind(id)
            .bind(delta)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn set_list_count<'e, E>(executor: E, id: Uuid, count: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(r#"UPDATE boards SET list_count = $2 WHERE id = $1"#)
            .bind(id)
            .bind(count)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Delete the board with every list, task and membership row under it.
    pub async fn delete_cascade(conn: &mut SqliteConnection, id: Uuid) -> Result<u64, sqlx::Error> {
        let list_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT DISTINCT list_id FROM list_memberships WHERE board_id = $1"#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        for list_id in list_ids {
            List::delete_cascade(&mut *conn, list_id).await?;
        }

        let result = sqlx::query(r#"DELETE FROM boards WHERE id = $1"#)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}
