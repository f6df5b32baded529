use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::position::Sibling;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, Default,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ListStatus {
    Backlog,
    #[default]
    Todo,
    InProgress,
    Done,
}

/// An ordered column of tasks.
///
/// A list has no direct board column; its board is whatever board its membership
/// rows (task rows or the placeholder) point at.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct List {
    pub id: Uuid,
    pub title: String,
    pub status: ListStatus,
    /// 1-based, contiguous among the lists of the same board
    pub position: i64,
    /// Task membership rows pointing at this list (placeholders excluded)
    pub task_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateList {
    pub title: String,
    #[serde(default)]
    pub status: ListStatus,
}

impl CreateList {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: ListStatus::default(),
        }
    }
}

impl List {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, List>(
            r#"SELECT id, title, status, position, task_count, created_at, updated_at
               FROM lists
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Lists discoverable on a board through the ledger, ordered by position.
    pub async fn find_by_board<'e, E>(executor: E, board_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, List>(
            r#"SELECT l.id, l.title, l.status, l.position, l.task_count, l.created_at, l.updated_at
               FROM lists l
               WHERE l.id IN (SELECT list_id FROM list_memberships WHERE board_id = $1)
               ORDER BY l.position ASC, l.created_at ASC"#,
        )
        .bind(board_id)
        .fetch_all(executor)
        .await
    }

    /// Positions of every list on the board, ordered.
    pub async fn siblings_on_board<'e, E>(
        executor: E,
        board_id: Uuid,
    ) -> Result<Vec<Sibling>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Sibling>(
            r#"SELECT l.id, l.position
               FROM lists l
               WHERE l.id IN (SELECT list_id FROM list_memberships WHERE board_id = $1)
               ORDER BY l.position ASC, l.created_at ASC"#,
        )
        .bind(board_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateList,
        id: Uuid,
        position: i64,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, List>(
            r#"INSERT INTO lists (id, title, status, position)
               VALUES ($1, $2, $3, $4)
               RETURNING id, title, status, position, task_count, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(data.status)
        .bind(position)
        .fetch_one(executor)
        .await
    }

    pub async fn set_position<'e, E>(executor: E, id: Uuid, position: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"UPDATE lists
               SET position = $2, updated_at = datetime('now', 'subsec')
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(position)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Apply `delta` to `task_count` and return the new value.
    pub async fn adjust_task_count<'e, E>(executor: E, id: Uuid, delta: i64) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar(
            r#"UPDATE lists
               SET task_count = task_count + $2, updated_at = datetime('now', 'subsec')
               WHERE id = $1
               RETURNING task_count"#,
        )
        .bind(id)
        .bind(delta)
        .fetch_one(executor)
        .await
    }

    pub async fn set_task_count<'e, E>(executor: E, id: Uuid, count: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(r#"UPDATE lists SET task_count = $2 WHERE id = $1"#)
            .bind(id)
            .bind(count)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Delete the list, its tasks and all of its membership rows.
    ///
    /// Returns the number of tasks removed with it.
    pub async fn delete_cascade(conn: &mut SqliteConnection, id: Uuid) -> Result<u64, sqlx::Error> {
        let tasks = sqlx::query(
            r#"DELETE FROM tasks
               WHERE id IN (SELECT task_id FROM list_memberships
                            WHERE list_id = $1 AND task_id IS NOT NULL)"#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        sqlx::query(r#"DELETE FROM list_memberships WHERE list_id = $1"#)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        sqlx::query(r#"DELETE FROM lists WHERE id = $1"#)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(tasks.rows_affected())
    }
}
