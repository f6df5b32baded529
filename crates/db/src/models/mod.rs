//! Board, list and task rows plus the membership ledger that links them.

pub mod board;
pub mod list;
pub mod membership;
pub mod snapshot;
pub mod task;
