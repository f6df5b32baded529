use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use uuid::Uuid;

use crate::position::Sibling;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// 1-based, contiguous among the tasks of the owning list
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
}

impl CreateTask {
    pub fn from_title_description(title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            title: title.into(),
            description,
        }
    }
}

impl Task {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"SELECT id, title, description, position, created_at, updated_at
               FROM tasks
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Tasks linked to the list through the ledger, ordered by position.
    pub async fn find_by_list<'e, E>(executor: E, list_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"SELECT t.id, t.title, t.description, t.position, t.created_at, t.updated_at
               FROM tasks t
               JOIN list_memberships m ON m.task_id = t.id
               WHERE m.list_id = $1
               ORDER BY t.position ASC, t.created_at ASC"#,
        )
        .bind(list_id)
        .fetch_all(executor)
        .await
    }

    pub async fn siblings_in_list<'e, E>(
        executor: E,
        list_id: Uuid,
    ) -> Result<Vec<Sibling>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Sibling>(
            r#"SELECT t.id, t.position
               FROM tasks t
               JOIN list_memberships m ON m.task_id = t.id
               WHERE m.list_id = $1
               ORDER BY t.position ASC, t.created_at ASC"#,
        )
        .bind(list_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateTask,
        id: Uuid,
        position: i64,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"INSERT INTO tasks (id, title, description, position)
               VALUES ($1, $2, $3, $4)
               RETURNING id, title, description, position, created_at, updated_at"#,
        )
        .bind(id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(position)
        .fetch_one(executor)
        .await
    }

    pub async fn set_position<'e, E>(executor: E, id: Uuid, position: i64) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"UPDATE tasks
               SET position = $2, updated_at = datetime('now', 'subsec')
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(position)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(r#"DELETE FROM tasks WHERE id = $1"#)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Tasks with no membership row at all.
    pub async fn find_orphans<'e, E>(executor: E) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar(
            r#"SELECT t.id
               FROM tasks t
               WHERE NOT EXISTS (SELECT 1 FROM list_memberships m WHERE m.task_id = t.id)
               ORDER BY t.created_at ASC"#,
        )
        .fetch_all(executor)
        .await
    }
}
