//! Test utilities for database tests.
//!
//! Pools are created from a template database that already has migrations
//! applied; each test gets its own copy in a fresh temp dir.

use std::sync::OnceLock;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tempfile::TempDir;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::{
    connect_options,
    models::{
        board::{Board, CreateBoard},
        list::{CreateList, List},
        task::{CreateTask, Task},
    },
    reorder::ReorderService,
};

/// Shared template database for faster test setup.
static TEMPLATE_DIR: OnceLock<TempDir> = OnceLock::new();
static TEMPLATE_READY: OnceCell<()> = OnceCell::const_new();

fn get_template_dir() -> &'static TempDir {
    TEMPLATE_DIR.get_or_init(|| TempDir::new().expect("Failed to create template temp dir"))
}

/// Ensure the template database is ready (migrations applied).
async fn ensure_template_ready() {
    TEMPLATE_READY
        .get_or_init(|| async {
            let template_path = get_template_dir().path().join("template.db");

            let pool = SqlitePoolOptions::new()
                .min_connections(0)
                .max_connections(1)
                .connect_with(connect_options(&template_path).expect("Invalid template path"))
                .await
                .expect("Failed to create template pool");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations on template");

            // Checkpoint the WAL into the main file before it is copied;
            // closing the pool alone does not guarantee this has happened.
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&pool)
                .await
                .expect("Failed to checkpoint template WAL");
            pool.close().await;

            tracing::debug!("Template database ready at {:?}", template_path);
        })
        .await;
}

/// Create a test database pool with migrations applied.
///
/// Returns the pool and a TempDir that must be kept alive for the duration of the test.
pub async fn create_test_pool() -> (SqlitePool, TempDir) {
    ensure_template_ready().await;

    let temp_dir = TempDir::new().expect("Failed to create test temp dir");
    let db_path = temp_dir.path().join("test.db");

    let template_path = get_template_dir().path().join("template.db");
    std::fs::copy(&template_path, &db_path).expect("Failed to copy template database");

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options(&db_path).expect("Invalid test database path"))
        .await
        .expect("Failed to create test pool");

    (pool, temp_dir)
}

/// A board with one list per entry of `layout`, each holding that many tasks.
///
/// Lists are titled `L1`, `L2`, ...; tasks `L1T1`, `L1T2`, ... in position order.
pub struct Fixture {
    pub service: ReorderService,
    pub board: Board,
    pub lists: Vec<List>,
    pub tasks: Vec<Vec<Task>>,
    _dir: TempDir,
}

impl Fixture {
    pub async fn new(layout: &[usize]) -> Self {
        let (pool, dir) = create_test_pool().await;
        let service = ReorderService::new(pool);
        let board = service
            .create_board(&CreateBoard {
                title: "Fixture board".to_string(),
            })
            .await
            .expect("Failed to create board");

        let mut lists = Vec::new();
        let mut tasks = Vec::new();
        for (index, count) in layout.iter().enumerate() {
            let list_title = format!("L{}", index + 1);
            let list = service
                .create_list(board.id, &CreateList::new(&list_title))
                .await
                .expect("Failed to create list");

            let mut in_list = Vec::new();
            for n in 1..=*count {
                let data = CreateTask::from_title_description(format!("{list_title}T{n}"), None);
                in_list.push(
                    service
                        .create_task(list.id, &data)
                        .await
                        .expect("Failed to create task"),
                );
            }
            lists.push(list);
            tasks.push(in_list);
        }

        Self {
            service,
            board,
            lists,
            tasks,
            _dir: dir,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.service.pool()
    }

    pub fn task(&self, list: usize, position: usize) -> Uuid {
        self.tasks[list][position - 1].id
    }

    pub fn list(&self, index: usize) -> Uuid {
        self.lists[index].id
    }

    /// Task titles per list, in position order.
    pub async fn layout(&self) -> Vec<Vec<String>> {
        self.service
            .board_snapshot(self.board.id)
            .await
            .expect("Failed to load board")
            .titles()
            .into_iter()
            .map(|(_, tasks)| tasks)
            .collect()
    }

    /// List titles in position order.
    pub async fn list_order(&self) -> Vec<String> {
        self.service
            .board_snapshot(self.board.id)
            .await
            .expect("Failed to load board")
            .titles()
            .into_iter()
            .map(|(list, _)| list)
            .collect()
    }

    /// Panics with every violation if the board or the store is inconsistent.
    pub async fn assert_consistent(&self) {
        let mut conn = self.pool().acquire().await.expect("Failed to acquire");
        let mut violations = crate::invariants::check_board(&mut conn, self.board.id)
            .await
            .expect("Failed to check board");
        violations.extend(
            crate::invariants::find_orphan_tasks(&mut conn)
                .await
                .expect("Failed to check orphans"),
        );
        assert!(violations.is_empty(), "invariants violated: {violations:#?}");
    }
}
