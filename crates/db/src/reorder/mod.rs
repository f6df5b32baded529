//! The reordering engine.
//!
//! Owns every mutation of list and task order. Each operation runs the same
//! protocol:
//!
//! 1. resolve which boards it touches, read-only
//! 2. take those boards' in-process locks and open one transaction whose first
//!    statement bumps the boards' `version` (taking SQLite's write lock)
//! 3. re-resolve inside the transaction, load the sibling sets and counters,
//!    compute the plan with [`crate::position`], persist it and commit
//!
//! A failed attempt is rolled back as a whole. Conflicts surface as
//! [`ReorderError::ConcurrentModification`] and are retried here with backoff
//! before they reach the caller.

mod error;
mod locks;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

pub use error::{Entity, ReorderError};
pub use locks::{BoardLockGuard, BoardLocks};

use crate::{
    invariants::{self, RepairReport},
    metrics::ReorderMetrics,
    models::{
        board::{Board, CreateBoard},
        list::{CreateList, List},
        membership::ListMembership,
        snapshot::BoardSnapshot,
        task::{CreateTask, Task},
    },
    position::{
        self, PositionChange, Sibling, ensure_contiguous, ensure_count, plan_move_within,
    },
    retry::{RetryConfig, with_retry},
};

#[derive(Clone)]
pub struct ReorderService {
    pool: SqlitePool,
    locks: BoardLocks,
    retry: RetryConfig,
    metrics: ReorderMetrics,
}

impl ReorderService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: BoardLocks::new(),
            retry: RetryConfig::from_env(),
            metrics: ReorderMetrics::new(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn metrics(&self) -> &ReorderMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------

    /// Move `dragged_list_id` to the position currently held by `target_list_id`.
    pub async fn move_list(
        &self,
        dragged_list_id: Uuid,
        target_list_id: Uuid,
    ) -> Result<(), ReorderError> {
        self.run("move_list", move || {
            self.try_move_list(dragged_list_id, target_list_id)
        })
        .await
    }

    /// Move a task to the position of another task in the same list.
    pub async fn move_task_within_list(
        &self,
        dragged_task_id: Uuid,
        target_task_id: Uuid,
    ) -> Result<(), ReorderError> {
        self.run("move_task_within_list", move || {
            self.try_move_task_within_list(dragged_task_id, target_task_id)
        })
        .await
    }

    /// Append a task to the end of `target_list_id`.
    pub async fn move_task_to_list_end(
        &self,
        task_id: Uuid,
        target_list_id: Uuid,
    ) -> Result<(), ReorderError> {
        self.run("move_task_to_list_end", move || {
            self.try_move_task_to_list_end(task_id, target_list_id)
        })
        .await
    }

    /// Insert a task immediately before `target_task_id`, in the target's list.
    pub async fn move_task_to_list_before_task(
        &self,
        dragged_task_id: Uuid,
        target_task_id: Uuid,
    ) -> Result<(), ReorderError> {
        self.run("move_task_to_list_before_task", move || {
            self.try_move_task_before_task(dragged_task_id, target_task_id)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    pub async fn create_board(&self, data: &CreateBoard) -> Result<Board, ReorderError> {
        let board = Board::create(&self.pool, data, Uuid::new_v4()).await?;
        info!(board_id = %board.id, title = %board.title, "Created board");
        Ok(board)
    }

    pub async fn create_list(
        &self,
        board_id: Uuid,
        data: &CreateList,
    ) -> Result<List, ReorderError> {
        self.run("create_list", move || self.try_create_list(board_id, data))
            .await
    }

    pub async fn create_task(
        &self,
        list_id: Uuid,
        data: &CreateTask,
    ) -> Result<Task, ReorderError> {
        self.run("create_task", move || self.try_create_task(list_id, data))
            .await
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<(), ReorderError> {
        self.run("delete_task", move || self.try_delete_task(task_id))
            .await
    }

    /// Delete a list together with all of its tasks.
    pub async fn delete_list(&self, list_id: Uuid) -> Result<(), ReorderError> {
        self.run("delete_list", move || self.try_delete_list(list_id))
            .await
    }

    pub async fn delete_board(&self, board_id: Uuid) -> Result<(), ReorderError> {
        self.run("delete_board", move || self.try_delete_board(board_id))
            .await
    }

    /// Restore positions, counters and placeholders on a board written out of band.
    pub async fn repair_board(&self, board_id: Uuid) -> Result<RepairReport, ReorderError> {
        self.run("repair_board", move || self.try_repair_board(board_id))
            .await
    }

    pub async fn board_snapshot(&self, board_id: Uuid) -> Result<BoardSnapshot, ReorderError> {
        BoardSnapshot::load(&self.pool, board_id)
            .await?
            .ok_or(ReorderError::not_found(Entity::Board, board_id))
    }

    // ------------------------------------------------------------------
    // Single attempts
    // ------------------------------------------------------------------

    async fn try_move_list(&self, dragged_id: Uuid, target_id: Uuid) -> Result<(), ReorderError> {
        let board_id = {
            let mut conn = self.pool.acquire().await?;
            resolve_list_board(&mut conn, dragged_id).await?
        };
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        let dragged = find_list(&mut tx, dragged_id).await?;
        let target = find_list(&mut tx, target_id).await?;
        ensure_scope(&[board_id], resolve_list_board(&mut tx, dragged_id).await?)?;
        if resolve_list_board(&mut tx, target_id).await? != board_id {
            return Err(ReorderError::invalid_move(
                "lists belong to different boards",
            ));
        }

        let siblings = List::siblings_on_board(&mut *tx, board_id).await?;
        ensure_contiguous(&siblings)?;
        let changes = plan_move_within(
            &siblings,
            Sibling {
                id: dragged.id,
                position: dragged.position,
            },
            target.position,
        )?;

        if changes.is_empty() {
            tx.rollback().await?;
            return Ok(());
        }

        persist_list_positions(&mut tx, &changes).await?;
        tx.commit().await?;

        debug!(
            %board_id,
            list_id = %dragged_id,
            from = dragged.position,
            to = target.position,
            shifted = changes.len() - 1,
            "Moved list"
        );
        Ok(())
    }

    async fn try_move_task_within_list(
        &self,
        dragged_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), ReorderError> {
        let board_id = {
            let mut conn = self.pool.acquire().await?;
            resolve_task_membership(&mut conn, dragged_id).await?.board_id
        };
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        let membership = resolve_task_membership(&mut tx, dragged_id).await?;
        ensure_scope(&[board_id], membership.board_id)?;
        let target_membership = resolve_task_membership(&mut tx, target_id).await?;
        if target_membership.list_id != membership.list_id {
            return Err(ReorderError::invalid_move(
                "tasks are in different lists; use a cross-list move",
            ));
        }

        let dragged = find_task(&mut tx, dragged_id).await?;
        let target = find_task(&mut tx, target_id).await?;

        let siblings = Task::siblings_in_list(&mut *tx, membership.list_id).await?;
        ensure_contiguous(&siblings)?;
        let changes = plan_move_within(
            &siblings,
            Sibling {
                id: dragged.id,
                position: dragged.position,
            },
            target.position,
        )?;

        if changes.is_empty() {
            tx.rollback().await?;
            return Ok(());
        }

        persist_task_positions(&mut tx, &changes).await?;
        tx.commit().await?;

        debug!(
            list_id = %membership.list_id,
            task_id = %dragged_id,
            from = dragged.position,
            to = target.position,
            "Moved task within list"
        );
        Ok(())
    }

    async fn try_move_task_to_list_end(
        &self,
        task_id: Uuid,
        target_list_id: Uuid,
    ) -> Result<(), ReorderError> {
        let boards = {
            let mut conn = self.pool.acquire().await?;
            let source = resolve_task_membership(&mut conn, task_id).await?;
            let target = resolve_list_board(&mut conn, target_list_id).await?;
            [source.board_id, target]
        };
        let (_guard, mut tx) = self.begin_scoped(&boards).await?;

        let membership = resolve_task_membership(&mut tx, task_id).await?;
        ensure_scope(&boards, membership.board_id)?;
        let target_list = find_list(&mut tx, target_list_id).await?;
        let target_board = resolve_list_board(&mut tx, target_list_id).await?;
        ensure_scope(&boards, target_board)?;
        let task = find_task(&mut tx, task_id).await?;

        if membership.list_id == target_list_id {
            let siblings = Task::siblings_in_list(&mut *tx, target_list_id).await?;
            ensure_contiguous(&siblings)?;
            let last = siblings.len() as i64;
            let changes = plan_move_within(
                &siblings,
                Sibling {
                    id: task.id,
                    position: task.position,
                },
                last,
            )?;
            if changes.is_empty() {
                tx.rollback().await?;
                return Ok(());
            }
            persist_task_positions(&mut tx, &changes).await?;
            tx.commit().await?;
            debug!(list_id = %target_list_id, %task_id, "Moved task to end of its own list");
            return Ok(());
        }

        let source_remaining = remove_from_source(&mut tx, &membership, &task).await?;

        let destination = Task::siblings_in_list(&mut *tx, target_list_id).await?;
        ensure_contiguous(&destination)?;
        ensure_count(target_list.task_count, &destination)?;
        let position = position::shift_for_insert_at_end(target_list.task_count);

        Task::set_position(&mut *tx, task_id, position).await?;
        let target_count =
            ListMembership::attach_task_to_list(&mut tx, target_board, target_list_id, task_id)
                .await?;
        tx.commit().await?;

        debug!(
            %task_id,
            from_list = %membership.list_id,
            to_list = %target_list_id,
            position,
            source_remaining,
            target_count,
            "Appended task to list"
        );
        Ok(())
    }

    async fn try_move_task_before_task(
        &self,
        dragged_id: Uuid,
        target_id: Uuid,
    ) -> Result<(), ReorderError> {
        let boards = {
            let mut conn = self.pool.acquire().await?;
            let source = resolve_task_membership(&mut conn, dragged_id).await?;
            if dragged_id == target_id {
                return Err(ReorderError::invalid_move("cannot move a task before itself"));
            }
            let target = resolve_task_membership(&mut conn, target_id).await?;
            [source.board_id, target.board_id]
        };
        let (_guard, mut tx) = self.begin_scoped(&boards).await?;

        let membership = resolve_task_membership(&mut tx, dragged_id).await?;
        ensure_scope(&boards, membership.board_id)?;
        let target_membership = resolve_task_membership(&mut tx, target_id).await?;
        ensure_scope(&boards, target_membership.board_id)?;
        if membership.list_id == target_membership.list_id {
            return Err(ReorderError::invalid_move(
                "tasks are already in the same list; use a within-list move",
            ));
        }

        let dragged = find_task(&mut tx, dragged_id).await?;
        let target = find_task(&mut tx, target_id).await?;
        let target_list = find_list(&mut tx, target_membership.list_id).await?;

        let source_remaining = remove_from_source(&mut tx, &membership, &dragged).await?;

        let destination = Task::siblings_in_list(&mut *tx, target_list.id).await?;
        ensure_contiguous(&destination)?;
        ensure_count(target_list.task_count, &destination)?;
        let opened = position::shift_for_insert_before(target.position).apply(&destination, None)?;
        persist_task_positions(&mut tx, &opened).await?;

        Task::set_position(&mut *tx, dragged_id, target.position).await?;
        let target_count = ListMembership::attach_task_to_list(
            &mut tx,
            target_membership.board_id,
            target_list.id,
            dragged_id,
        )
        .await?;
        tx.commit().await?;

        debug!(
            task_id = %dragged_id,
            before = %target_id,
            from_list = %membership.list_id,
            to_list = %target_list.id,
            position = target.position,
            source_remaining,
            target_count,
            "Inserted task before task"
        );
        Ok(())
    }

    async fn try_create_list(
        &self,
        board_id: Uuid,
        data: &CreateList,
    ) -> Result<List, ReorderError> {
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        let board = Board::find_by_id(&mut *tx, board_id)
            .await?
            .ok_or(ReorderError::not_found(Entity::Board, board_id))?;
        let siblings = List::siblings_on_board(&mut *tx, board_id).await?;
        ensure_contiguous(&siblings)?;
        ensure_count(board.list_count, &siblings)?;

        let position = position::shift_for_insert_at_end(board.list_count);
        let list = List::create(&mut *tx, data, Uuid::new_v4(), position).await?;
        ListMembership::ensure_list_has_board_link(&mut tx, board_id, list.id).await?;
        Board::adjust_list_count(&mut *tx, board_id, 1).await?;
        tx.commit().await?;

        info!(%board_id, list_id = %list.id, position, "Created list");
        Ok(list)
    }

    async fn try_create_task(&self, list_id: Uuid, data: &CreateTask) -> Result<Task, ReorderError> {
        let board_id = {
            let mut conn = self.pool.acquire().await?;
            resolve_list_board(&mut conn, list_id).await?
        };
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        let list = find_list(&mut tx, list_id).await?;
        ensure_scope(&[board_id], resolve_list_board(&mut tx, list_id).await?)?;
        let siblings = Task::siblings_in_list(&mut *tx, list_id).await?;
        ensure_contiguous(&siblings)?;
        ensure_count(list.task_count, &siblings)?;

        let position = position::shift_for_insert_at_end(list.task_count);
        let task = Task::create(&mut *tx, data, Uuid::new_v4(), position).await?;
        ListMembership::attach_task_to_list(&mut tx, board_id, list_id, task.id).await?;
        tx.commit().await?;

        info!(%list_id, task_id = %task.id, position, "Created task");
        Ok(task)
    }

    async fn try_delete_task(&self, task_id: Uuid) -> Result<(), ReorderError> {
        let board_id = {
            let mut conn = self.pool.acquire().await?;
            resolve_task_membership(&mut conn, task_id).await?.board_id
        };
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        let membership = resolve_task_membership(&mut tx, task_id).await?;
        ensure_scope(&[board_id], membership.board_id)?;
        let task = find_task(&mut tx, task_id).await?;

        let remaining = remove_from_source(&mut tx, &membership, &task).await?;
        Task::delete(&mut *tx, task_id).await?;
        tx.commit().await?;

        info!(%task_id, list_id = %membership.list_id, remaining, "Deleted task");
        Ok(())
    }

    async fn try_delete_list(&self, list_id: Uuid) -> Result<(), ReorderError> {
        let board_id = {
            let mut conn = self.pool.acquire().await?;
            resolve_list_board(&mut conn, list_id).await?
        };
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        let list = find_list(&mut tx, list_id).await?;
        ensure_scope(&[board_id], resolve_list_board(&mut tx, list_id).await?)?;
        let siblings = List::siblings_on_board(&mut *tx, board_id).await?;
        ensure_contiguous(&siblings)?;

        let compaction = position::shift_for_removal(list.position).apply(&siblings, Some(list_id))?;
        let removed_tasks = List::delete_cascade(&mut tx, list_id).await?;
        Board::adjust_list_count(&mut *tx, board_id, -1).await?;
        persist_list_positions(&mut tx, &compaction).await?;
        tx.commit().await?;

        info!(%board_id, %list_id, removed_tasks, "Deleted list");
        Ok(())
    }

    async fn try_delete_board(&self, board_id: Uuid) -> Result<(), ReorderError> {
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        if Board::find_by_id(&mut *tx, board_id).await?.is_none() {
            return Err(ReorderError::not_found(Entity::Board, board_id));
        }
        Board::delete_cascade(&mut tx, board_id).await?;
        tx.commit().await?;

        info!(%board_id, "Deleted board");
        Ok(())
    }

    async fn try_repair_board(&self, board_id: Uuid) -> Result<RepairReport, ReorderError> {
        let (_guard, mut tx) = self.begin_scoped(&[board_id]).await?;

        if Board::find_by_id(&mut *tx, board_id).await?.is_none() {
            return Err(ReorderError::not_found(Entity::Board, board_id));
        }
        let report = invariants::repair_board(&mut tx, board_id).await?;
        if report.is_empty() {
            tx.rollback().await?;
            return Ok(report);
        }
        tx.commit().await?;

        info!(%board_id, ?report, "Repaired board");
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Lock `board_ids` and open a transaction holding SQLite's write lock.
    async fn begin_scoped(
        &self,
        board_ids: &[Uuid],
    ) -> Result<(BoardLockGuard, Transaction<'static, Sqlite>), ReorderError> {
        let guard = self.locks.lock(board_ids).await;
        let mut tx = self.pool.begin().await?;
        Board::bump_versions(&mut tx, board_ids).await?;
        Ok((guard, tx))
    }

    /// Run one operation with conflict retries and record its outcome.
    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, ReorderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReorderError>>,
    {
        let started = Instant::now();
        let conflicts = &AtomicU32::new(0);
        let metrics = &self.metrics;
        let max_retries = self.retry.max_retries;

        let result = with_retry(&self.retry, operation, move || {
            let pending = attempt();
            async move {
                let result = pending.await;
                if let Err(ReorderError::ConcurrentModification(_)) = &result {
                    let seen = conflicts.fetch_add(1, Ordering::Relaxed);
                    metrics.record_conflict(seen < max_retries);
                }
                result
            }
        })
        .await;

        self.metrics
            .record_operation(started.elapsed(), result.as_ref().map(|_| ()));
        result
    }
}

/// Remove `task` from its current list: close the gap it leaves and detach its
/// membership row, re-creating the list's placeholder if it empties.
///
/// Returns the source list's remaining task count.
async fn remove_from_source(
    conn: &mut SqliteConnection,
    membership: &ListMembership,
    task: &Task,
) -> Result<i64, ReorderError> {
    let siblings = Task::siblings_in_list(&mut *conn, membership.list_id).await?;
    ensure_contiguous(&siblings)?;

    let compaction = position::shift_for_removal(task.position).apply(&siblings, Some(task.id))?;
    persist_task_positions(conn, &compaction).await?;
    Ok(ListMembership::detach_task_from_list(conn, membership).await?)
}

async fn persist_task_positions(
    conn: &mut SqliteConnection,
    changes: &[PositionChange],
) -> Result<(), sqlx::Error> {
    for change in changes {
        Task::set_position(&mut *conn, change.id, change.position).await?;
    }
    Ok(())
}

async fn persist_list_positions(
    conn: &mut SqliteConnection,
    changes: &[PositionChange],
) -> Result<(), sqlx::Error> {
    for change in changes {
        List::set_position(&mut *conn, change.id, change.position).await?;
    }
    Ok(())
}

async fn find_list(conn: &mut SqliteConnection, id: Uuid) -> Result<List, ReorderError> {
    List::find_by_id(conn, id)
        .await?
        .ok_or(ReorderError::not_found(Entity::List, id))
}

async fn find_task(conn: &mut SqliteConnection, id: Uuid) -> Result<Task, ReorderError> {
    Task::find_by_id(conn, id)
        .await?
        .ok_or(ReorderError::not_found(Entity::Task, id))
}

/// Board of `list_id`, inferred through the ledger.
async fn resolve_list_board(conn: &mut SqliteConnection, list_id: Uuid) -> Result<Uuid, ReorderError> {
    if let Some(board_id) = ListMembership::board_for_list(&mut *conn, list_id).await? {
        return Ok(board_id);
    }
    let entity = if List::find_by_id(&mut *conn, list_id).await?.is_some() {
        Entity::Membership
    } else {
        Entity::List
    };
    Err(ReorderError::not_found(entity, list_id))
}

async fn resolve_task_membership(
    conn: &mut SqliteConnection,
    task_id: Uuid,
) -> Result<ListMembership, ReorderError> {
    if let Some(membership) = ListMembership::find_for_task(&mut *conn, task_id).await? {
        return Ok(membership);
    }
    let entity = if Task::find_by_id(&mut *conn, task_id).await?.is_some() {
        Entity::Membership
    } else {
        Entity::Task
    };
    Err(ReorderError::not_found(entity, task_id))
}

/// The item was moved onto a board this attempt did not lock.
fn ensure_scope(locked: &[Uuid], actual: Uuid) -> Result<(), ReorderError> {
    if locked.contains(&actual) {
        Ok(())
    } else {
        Err(ReorderError::ConcurrentModification(format!(
            "board {actual} changed between lookup and lock"
        )))
    }
}
