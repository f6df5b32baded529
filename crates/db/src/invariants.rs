//! Consistency checks for a board's ledger, counters and positions, plus repair.
//!
//! The reordering engine never commits a state that fails these checks. They exist
//! for data written out of band (imports, manual edits, a crashed legacy writer)
//! and for tests that drive the engine with random operations.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use crate::{
    models::{board::Board, list::List, membership::ListMembership, task::Task},
    position::{self, Sibling},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Task positions in a list are not exactly 1..=N
    TaskPositions { list_id: Uuid, positions: Vec<i64> },
    /// List positions on a board are not exactly 1..=M
    ListPositions { board_id: Uuid, positions: Vec<i64> },
    /// `task_count` disagrees with the task rows
    TaskCount {
        list_id: Uuid,
        counter: i64,
        actual: i64,
    },
    /// `list_count` disagrees with the lists linked to the board
    ListCount {
        board_id: Uuid,
        counter: i64,
        actual: i64,
    },
    /// Placeholder present on a non-empty list, or missing on an empty one
    Placeholder {
        list_id: Uuid,
        task_count: i64,
        placeholders: i64,
    },
    /// A task with no membership row
    OrphanTask { task_id: Uuid },
}

#[derive(Debug, FromRow)]
struct LedgerCounts {
    list_id: Uuid,
    task_rows: i64,
    placeholders: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub list_positions_fixed: usize,
    pub task_positions_fixed: usize,
    pub counters_fixed: usize,
    pub placeholders_added: usize,
    pub placeholders_removed: usize,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        *self == RepairReport::default()
    }
}

async fn ledger_counts(
    conn: &mut SqliteConnection,
    board_id: Uuid,
) -> Result<Vec<LedgerCounts>, sqlx::Error> {
    sqlx::query_as::<_, LedgerCounts>(
        r#"SELECT list_id,
                  SUM(CASE WHEN task_id IS NOT NULL THEN 1 ELSE 0 END) AS task_rows,
                  SUM(CASE WHEN task_id IS NULL THEN 1 ELSE 0 END) AS placeholders
           FROM list_memberships
           WHERE board_id = $1
           GROUP BY list_id"#,
    )
    .bind(board_id)
    .fetch_all(conn)
    .await
}

/// Every position, counter and placeholder violation on one board. Empty means the board is consistent.
pub async fn check_board(
    conn: &mut SqliteConnection,
    board_id: Uuid,
) -> Result<Vec<Violation>, sqlx::Error> {
    let mut violations = Vec::new();
    let Some(board) = Board::find_by_id(&mut *conn, board_id).await? else {
        return Ok(violations);
    };

    let lists = List::siblings_on_board(&mut *conn, board_id).await?;
    if position::ensure_contiguous(&lists).is_err() {
        violations.push(Violation::ListPositions {
            board_id,
            positions: lists.iter().map(|s| s.position).collect(),
        });
    }
    if board.list_count != lists.len() as i64 {
        violations.push(Violation::ListCount {
            board_id,
            counter: board.list_count,
            actual: lists.len() as i64,
        });
    }

    let counts: HashMap<Uuid, LedgerCounts> = ledger_counts(&mut *conn, board_id)
        .await?
        .into_iter()
        .map(|c| (c.list_id, c))
        .collect();

    for sibling in &lists {
        let list_id = sibling.id;
        let Some(list) = List::find_by_id(&mut *conn, list_id).await? else {
            continue;
        };
        let tasks = Task::siblings_in_list(&mut *conn, list_id).await?;
        if position::ensure_contiguous(&tasks).is_err() {
            violations.push(Violation::TaskPositions {
                list_id,
                positions: tasks.iter().map(|s| s.position).collect(),
            });
        }

        let ledger = counts.get(&list_id);
        let task_rows = ledger.map_or(0, |c| c.task_rows);
        let placeholders = ledger.map_or(0, |c| c.placeholders);
        if list.task_count != task_rows {
            violations.push(Violation::TaskCount {
                list_id,
                counter: list.task_count,
                actual: task_rows,
            });
        }
        let wants_placeholder = list.task_count == 0;
        if (wants_placeholder && placeholders != 1) || (!wants_placeholder && placeholders != 0)
        {
            violations.push(Violation::Placeholder {
                list_id,
                task_count: list.task_count,
                placeholders,
            });
        }
    }

    Ok(violations)
}

/// Tasks with no membership row, across the whole store.
pub async fn find_orphan_tasks(conn: &mut SqliteConnection) -> Result<Vec<Violation>, sqlx::Error> {
    Ok(Task::find_orphans(conn)
        .await?
        .into_iter()
        .map(|task_id| Violation::OrphanTask { task_id })
        .collect())
}

/// Restore positions, counters and placeholders on one board.
///
/// Runs on the caller's transaction; [`crate::ReorderService::repair_board`] is the
/// entry point that locks the board and takes the write lock first.
///
/// Positions are renumbered keeping the current relative order (ties broken by
/// creation time), counters are recomputed from the ledger, and placeholders are
/// added to empty lists and removed from non-empty ones.
pub async fn repair_board(
    conn: &mut SqliteConnection,
    board_id: Uuid,
) -> Result<RepairReport, sqlx::Error> {
    let mut report = RepairReport::default();
    let Some(board) = Board::find_by_id(&mut *conn, board_id).await? else {
        return Ok(report);
    };

    let lists: Vec<Sibling> = List::siblings_on_board(&mut *conn, board_id).await?;
    let list_changes = position::compact(&lists);
    for change in &list_changes {
        List::set_position(&mut *conn, change.id, change.position).await?;
    }
    report.list_positions_fixed = list_changes.len();

    if board.list_count != lists.len() as i64 {
        Board::set_list_count(&mut *conn, board_id, lists.len() as i64).await?;
        report.counters_fixed += 1;
    }

    let mut per_list: BTreeMap<Uuid, i64> = BTreeMap::new();
    for sibling in &lists {
        let tasks = Task::siblings_in_list(&mut *conn, sibling.id).await?;
        let task_changes = position::compact(&tasks);
        for change in &task_changes {
            Task::set_position(&mut *conn, change.id, change.position).await?;
        }
        report.task_positions_fixed += task_changes.len();
        per_list.insert(sibling.id, tasks.len() as i64);
    }

    for (list_id, actual) in per_list {
        let Some(list) = List::find_by_id(&mut *conn, list_id).await? else {
            continue;
        };
        if list.task_count != actual {
            List::set_task_count(&mut *conn, list_id, actual).await?;
            report.counters_fixed += 1;
        }

        if actual > 0 {
            if ListMembership::remove_placeholder_if_present(&mut *conn, list_id).await? {
                report.placeholders_removed += 1;
            }
        } else if ListMembership::find_placeholder(&mut *conn, list_id)
            .await?
            .is_none()
        {
            ListMembership::ensure_list_has_board_link(&mut *conn, board_id, list_id).await?;
            report.placeholders_added += 1;
        }
    }

    Ok(report)
}
