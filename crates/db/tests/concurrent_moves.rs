//! Concurrent writers against one board.

use std::time::Duration;

use db::{
    ReorderError, ReorderService, RetryConfig, connect_options,
    models::{
        board::{Board, CreateBoard},
        list::CreateList,
        task::CreateTask,
    },
    test_utils::{Fixture, create_test_pool},
};
use futures_util::future::join_all;
use sqlx::sqlite::SqlitePoolOptions;

fn titles(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_moves_in_one_list_serialize() {
    let fixture = Fixture::new(&[6]).await;
    let (t1, t2, t4, t6) = (
        fixture.task(0, 1),
        fixture.task(0, 2),
        fixture.task(0, 4),
        fixture.task(0, 6),
    );

    let first = {
        let service = fixture.service.clone();
        tokio::spawn(async move { service.move_task_within_list(t1, t4).await })
    };
    let second = {
        let service = fixture.service.clone();
        tokio::spawn(async move { service.move_task_within_list(t6, t2).await })
    };

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    for result in [&first, &second] {
        assert!(
            matches!(result, Ok(()) | Err(ReorderError::ConcurrentModification(_))),
            "unexpected outcome: {result:?}"
        );
    }
    fixture.assert_consistent().await;

    // Both serial orders end in the same layout.
    if first.is_ok() && second.is_ok() {
        assert_eq!(
            fixture.layout().await,
            vec![titles(&["L1T6", "L1T2", "L1T3", "L1T4", "L1T1", "L1T5"])]
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_cross_list_moves_keep_board_consistent() {
    let fixture = Fixture::new(&[5, 5, 0]).await;
    let lists = [fixture.list(0), fixture.list(1), fixture.list(2)];

    let mut handles = Vec::new();
    for round in 0..3 {
        for list in 0..2 {
            for position in 1..=5 {
                let service = fixture.service.clone();
                let task = fixture.task(list, position);
                let target = lists[(list + position + round) % 3];
                handles.push(tokio::spawn(async move {
                    service.move_task_to_list_end(task, target).await
                }));
            }
        }
    }

    for joined in join_all(handles).await {
        let result = joined.unwrap();
        assert!(
            matches!(result, Ok(()) | Err(ReorderError::ConcurrentModification(_))),
            "unexpected outcome: {result:?}"
        );
    }

    fixture.assert_consistent().await;
    let total: usize = fixture.layout().await.iter().map(Vec::len).sum();
    assert_eq!(total, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_services_share_one_database() {
    // Two engines over one pool have separate lock registries, like two
    // processes; SQLite's write lock has to keep them apart.
    let fixture = Fixture::new(&[4, 4]).await;
    let other = ReorderService::new(fixture.pool().clone());

    let mut handles = Vec::new();
    for position in 1..=4 {
        let (a, b) = (fixture.service.clone(), other.clone());
        let left = fixture.task(0, position);
        let right = fixture.task(1, position);
        let (left_target, right_target) = (fixture.list(1), fixture.list(0));
        handles.push(tokio::spawn(async move {
            a.move_task_to_list_end(left, left_target).await
        }));
        handles.push(tokio::spawn(async move {
            b.move_task_to_list_end(right, right_target).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(
            matches!(result, Ok(()) | Err(ReorderError::ConcurrentModification(_))),
            "unexpected outcome: {result:?}"
        );
    }
    fixture.assert_consistent().await;
}

#[tokio::test]
async fn test_held_write_lock_surfaces_concurrent_modification() {
    let (pool, dir) = create_test_pool().await;
    let setup = ReorderService::new(pool.clone());
    let board_row = setup
        .create_board(&CreateBoard {
            title: "locked".into(),
        })
        .await
        .unwrap();
    let list = setup
        .create_list(board_row.id, &CreateList::new("l"))
        .await
        .unwrap();
    let task = setup
        .create_task(
            list.id,
            &CreateTask::from_title_description("t", None),
        )
        .await
        .unwrap();

    let impatient_pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(
            connect_options(&dir.path().join("test.db"))
                .unwrap()
                .busy_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    let impatient = ReorderService::new(impatient_pool).with_retry_config(RetryConfig {
        jitter_factor: 0.0,
        ..RetryConfig::new(2, 10, 20)
    });

    // Another writer holds the database write lock for the whole attempt.
    let mut blocker = pool.begin().await.unwrap();
    sqlx::query("UPDATE boards SET title = 'held' WHERE id = $1")
        .bind(board_row.id)
        .execute(&mut *blocker)
        .await
        .unwrap();

    let err = impatient
        .move_task_to_list_end(task.id, list.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ReorderError::ConcurrentModification(_)));

    let metrics = impatient.metrics().snapshot();
    assert_eq!(metrics.conflicts, 3);
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.operations_failed, 1);

    blocker.rollback().await.unwrap();

    // Once the lock is released the same engine goes through.
    impatient
        .move_task_to_list_end(task.id, list.id)
        .await
        .unwrap();
    let board = Board::find_by_id(&pool, board_row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(board.title, "locked");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repair_runs_alongside_engine_moves() {
    let fixture = Fixture::new(&[4, 2]).await;
    let pool = fixture.pool();

    // Out-of-band damage on the fixture board.
    sqlx::query("UPDATE tasks SET position = position + 3 WHERE id = $1")
        .bind(fixture.task(0, 4))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("UPDATE lists SET task_count = 9 WHERE id = $1")
        .bind(fixture.list(1))
        .execute(pool)
        .await
        .unwrap();

    // A second, healthy board kept busy by the engine meanwhile.
    let busy = fixture
        .service
        .create_board(&CreateBoard {
            title: "busy".into(),
        })
        .await
        .unwrap();
    let mut busy_lists = Vec::new();
    let mut busy_tasks = Vec::new();
    for title in ["a", "b"] {
        let list = fixture
            .service
            .create_list(busy.id, &CreateList::new(title))
            .await
            .unwrap();
        for n in 0..3 {
            let task = fixture
                .service
                .create_task(
                    list.id,
                    &CreateTask::from_title_description(format!("{title}{n}"), None),
                )
                .await
                .unwrap();
            busy_tasks.push(task.id);
        }
        busy_lists.push(list.id);
    }

    // Hold a read snapshot open while the engine commits, as the doctor's check does.
    let mut reader = pool.begin().await.unwrap();
    let _ = Board::find_by_id(&mut *reader, fixture.board.id)
        .await
        .unwrap();

    let mut moves = Vec::new();
    for (i, task) in busy_tasks.iter().copied().enumerate() {
        let service = fixture.service.clone();
        let target = busy_lists[i % 2];
        moves.push(tokio::spawn(async move {
            service.move_task_to_list_end(task, target).await
        }));
    }
    let repair = {
        let service = fixture.service.clone();
        let board_id = fixture.board.id;
        tokio::spawn(async move { service.repair_board(board_id).await })
    };

    for joined in join_all(moves).await {
        joined.unwrap().unwrap();
    }
    let report = repair.await.unwrap().unwrap();
    reader.rollback().await.unwrap();

    assert_eq!(report.task_positions_fixed, 1);
    assert_eq!(report.counters_fixed, 1);
    fixture.assert_consistent().await;
    let mut conn = pool.acquire().await.unwrap();
    assert!(
        db::invariants::check_board(&mut conn, busy.id)
            .await
            .unwrap()
            .is_empty()
    );
}
