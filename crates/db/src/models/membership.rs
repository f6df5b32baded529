//! The membership ledger.
//!
//! Lists and tasks carry no parent pointers. Which list a task is in, and which
//! board a list is on, is recorded only by `list_memberships` rows:
//!
//! - a task row (`task_id` set) places one task in one list, on that list's board
//! - a placeholder row (`task_id` NULL) keeps a list with zero tasks visible on its
//!   board
//!
//! A list has a placeholder row exactly when its `task_count` is zero. The ledger
//! functions here keep that true and keep `task_count` in step with the task rows;
//! they must run inside the caller's transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

use super::list::List;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct ListMembership {
    pub id: Uuid,
    pub board_id: Uuid,
    pub list_id: Uuid,
    /// NULL for placeholder rows
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Typed view of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Membership {
    Task {
        board_id: Uuid,
        list_id: Uuid,
        task_id: Uuid,
    },
    Placeholder {
        board_id: Uuid,
        list_id: Uuid,
    },
}

impl Membership {
    pub fn board_id(&self) -> Uuid {
        match self {
            Membership::Task { board_id, .. } | Membership::Placeholder { board_id, .. } => {
                *board_id
            }
        }
    }

    pub fn list_id(&self) -> Uuid {
        match self {
            Membership::Task { list_id, .. } | Membership::Placeholder { list_id, .. } => *list_id,
        }
    }
}

impl ListMembership {
    pub fn kind(&self) -> Membership {
        match self.task_id {
            Some(task_id) => Membership::Task {
                board_id: self.board_id,
                list_id: self.list_id,
                task_id,
            },
            None => Membership::Placeholder {
                board_id: self.board_id,
                list_id: self.list_id,
            },
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.task_id.is_none()
    }

    /// The single row placing `task_id` in a list.
    pub async fn find_for_task<'e, E>(
        executor: E,
        task_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ListMembership>(
            r#"SELECT id, board_id, list_id, task_id, created_at
               FROM list_memberships
               WHERE task_id = $1"#,
        )
        .bind(task_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_placeholder<'e, E>(
        executor: E,
        list_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ListMembership>(
            r#"SELECT id, board_id, list_id, task_id, created_at
               FROM list_memberships
               WHERE list_id = $1 AND task_id IS NULL"#,
        )
        .bind(list_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_list<'e, E>(executor: E, list_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, ListMembership>(
            r#"SELECT id, board_id, list_id, task_id, created_at
               FROM list_memberships
               WHERE list_id = $1
               ORDER BY created_at ASC"#,
        )
        .bind(list_id)
        .fetch_all(executor)
        .await
    }

    /// Board a list belongs to, inferred from any of its rows.
    pub async fn board_for_list<'e, E>(
        executor: E,
        list_id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar(
            r#"SELECT board_id FROM list_memberships WHERE list_id = $1 LIMIT 1"#,
        )
        .bind(list_id)
        .fetch_optional(executor)
        .await
    }

    /// Insert a placeholder for a freshly created list.
    ///
    /// This row is what makes the list visible on its board, so list creation must
    /// always go through here. Idempotent: an existing placeholder is kept.
    pub async fn ensure_list_has_board_link(
        conn: &mut SqliteConnection,
        board_id: Uuid,
        list_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        if Self::find_placeholder(&mut *conn, list_id).await?.is_some() {
            return Ok(());
        }
        Self::insert(&mut *conn, board_id, list_id, None).await
    }

    /// Record `task_id` as a member of `list_id` and bump the list's `task_count`.
    ///
    /// An existing placeholder is converted in place rather than deleted and
    /// re-inserted. Returns the list's new `task_count`.
    pub async fn attach_task_to_list(
        conn: &mut SqliteConnection,
        board_id: Uuid,
        list_id: Uuid,
        task_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        match Self::find_placeholder(&mut *conn, list_id).await? {
            Some(placeholder) => {
                sqlx::query(
                    r#"UPDATE list_memberships
                       SET task_id = $2, board_id = $3
                       WHERE id = $1"#,
                )
                .bind(placeholder.id)
                .bind(task_id)
                .bind(board_id)
                .execute(&mut *conn)
                .await?;
            }
            None => Self::insert(&mut *conn, board_id, list_id, Some(task_id)).await?,
        }

        List::adjust_task_count(&mut *conn, list_id, 1).await
    }

    /// Remove the task's row and decrement the list's `task_count`.
    ///
    /// When the list is left empty a placeholder is written before returning, so the
    /// list never loses its board link inside the transaction either. Returns the
    /// list's new `task_count`.
    pub async fn detach_task_from_list(
        conn: &mut SqliteConnection,
        membership: &ListMembership,
    ) -> Result<i64, sqlx::Error> {
        debug_assert!(!membership.is_placeholder());

        sqlx::query(r#"DELETE FROM list_memberships WHERE id = $1"#)
            .bind(membership.id)
            .execute(&mut *conn)
            .await?;

        let remaining = List::adjust_task_count(&mut *conn, membership.list_id, -1).await?;
        if remaining == 0 {
            Self::insert(&mut *conn, membership.board_id, membership.list_id, None).await?;
        }
        Ok(remaining)
    }

    /// Delete the list's placeholder, if any. Returns whether one was removed.
    pub async fn remove_placeholder_if_present<'e, E>(
        executor: E,
        list_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result =
            sqlx::query(r#"DELETE FROM list_memberships WHERE list_id = $1 AND task_id IS NULL"#)
                .bind(list_id)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert(
        conn: &mut SqliteConnection,
        board_id: Uuid,
        list_id: Uuid,
        task_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO list_memberships (id, board_id, list_id, task_id)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(Uuid::new_v4())
        .bind(board_id)
        .bind(list_id)
        .bind(task_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
