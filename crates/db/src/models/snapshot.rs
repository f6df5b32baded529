use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{board::Board, list::List, task::Task};

/// A list with its tasks in position order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListWithTasks {
    #[serde(flatten)]
    pub list: List,
    pub tasks: Vec<Task>,
}

/// Everything on a board, fully ordered, as the request layer renders it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BoardSnapshot {
    pub board: Board,
    pub lists: Vec<ListWithTasks>,
}

impl BoardSnapshot {
    /// Read the board in one read transaction so lists and tasks agree.
    pub async fn load(pool: &SqlitePool, board_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let Some(board) = Board::find_by_id(&mut *tx, board_id).await? else {
            return Ok(None);
        };

        let mut lists = Vec::new();
        for list in List::find_by_board(&mut *tx, board_id).await? {
            let tasks = Task::find_by_list(&mut *tx, list.id).await?;
            lists.push(ListWithTasks { list, tasks });
        }

        tx.commit().await?;
        Ok(Some(Self { board, lists }))
    }

    /// Task titles per list, in order. Handy for asserting on layouts.
    pub fn titles(&self) -> Vec<(String, Vec<String>)> {
        self.lists
            .iter()
            .map(|entry| {
                (
                    entry.list.title.clone(),
                    entry.tasks.iter().map(|t| t.title.clone()).collect(),
                )
            })
            .collect()
    }
}
