//! CLI tool to check boards for ledger, counter and position inconsistencies.
//!
//! Usage:
//!   cargo run --bin board_doctor                # Check only (default)
//!   cargo run --bin board_doctor -- --repair    # Repair every inconsistent board
//!
//! Repairs take the same board locks and write-first transaction as engine moves.
//!   cargo run --bin board_doctor -- --json      # Print violations as JSON

use std::env;

use db::{
    DBService,
    invariants::{self, Violation},
    models::board::Board,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_violation(violation: &Violation) {
    match violation {
        Violation::TaskPositions { list_id, positions } => {
            println!("  - list {list_id}: task positions {positions:?}");
        }
        Violation::ListPositions { positions, .. } => {
            println!("  - list positions {positions:?}");
        }
        Violation::TaskCount {
            list_id,
            counter,
            actual,
        } => println!("  - list {list_id}: task_count {counter}, {actual} linked tasks"),
        Violation::ListCount { counter, actual, .. } => {
            println!("  - list_count {counter}, {actual} linked lists")
        }
        Violation::Placeholder {
            list_id,
            task_count,
            placeholders,
        } => println!("  - list {list_id}: {placeholders} placeholder(s) with {task_count} task(s)"),
        Violation::OrphanTask { task_id } => println!("  - task {task_id} belongs to no list"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let repair = args.iter().any(|a| a == "--repair");
    let json = args.iter().any(|a| a == "--json");

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Board Doctor");
        println!();
        println!("Checks every board for position gaps, counter drift and ledger problems.");
        println!();
        println!("Usage:");
        println!("  cargo run --bin board_doctor               Check only (default)");
        println!("  cargo run --bin board_doctor -- --repair   Repair inconsistent boards");
        println!("  cargo run --bin board_doctor -- --json     Print violations as JSON");
        println!("  cargo run --bin board_doctor -- --help     Show this help");
        return Ok(());
    }

    info!("Connecting to database...");
    let db = DBService::new().await?;
    let pool = &db.pool;
    let service = db.reorder_service();

    let boards = Board::find_all(pool).await?;
    let mut inconsistent = 0usize;
    let mut repaired = 0usize;

    for board in &boards {
        let violations = {
            let mut conn = pool.acquire().await?;
            invariants::check_board(&mut conn, board.id).await?
        };
        if violations.is_empty() {
            continue;
        }
        inconsistent += 1;

        if json {
            println!("{}", serde_json::to_string(&violations)?);
        } else {
            println!("Board \"{}\" ({}):", board.title, board.id);
            for violation in &violations {
                print_violation(violation);
            }
        }

        if repair {
            match service.repair_board(board.id).await {
                Ok(report) => {
                    repaired += 1;
                    info!(board_id = %board.id, ?report, "Board repaired");
                }
                Err(e) => {
                    error!(board_id = %board.id, error = %e, "Repair failed, rolled back");
                }
            }
        }
    }

    let orphans = {
        let mut conn = pool.acquire().await?;
        invariants::find_orphan_tasks(&mut conn).await?
    };
    if !orphans.is_empty() {
        warn!(count = orphans.len(), "Tasks without a list; these need manual attention");
        if json {
            println!("{}", serde_json::to_string(&orphans)?);
        } else {
            orphans.iter().for_each(print_violation);
        }
    }

    println!();
    println!(
        "Checked {} board(s): {} inconsistent, {} repaired, {} orphan task(s).",
        boards.len(),
        inconsistent,
        repaired,
        orphans.len()
    );
    if inconsistent > 0 && !repair {
        println!("Run with --repair to fix them.");
    }

    Ok(())
}
