use strum_macros::Display;
use thiserror::Error;
use uuid::Uuid;

use crate::{position::PositionError, retry::Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Entity {
    Board,
    List,
    Task,
    Membership,
}

#[derive(Debug, Error)]
pub enum ReorderError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: Uuid },
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("stored positions are inconsistent: {0}")]
    InvariantViolation(#[from] PositionError),
    #[error("storage failure: {0}")]
    StorageFailure(#[source] sqlx::Error),
}

impl ReorderError {
    pub fn not_found(entity: Entity, id: Uuid) -> Self {
        ReorderError::NotFound { entity, id }
    }

    pub fn invalid_move(reason: impl Into<String>) -> Self {
        ReorderError::InvalidMove(reason.into())
    }
}

impl Retryable for ReorderError {
    fn is_retryable(&self) -> bool {
        matches!(self, ReorderError::ConcurrentModification(_))
    }
}

impl From<sqlx::Error> for ReorderError {
    fn from(e: sqlx::Error) -> Self {
        if e.is_retryable() {
            ReorderError::ConcurrentModification(e.to_string())
        } else {
            ReorderError::StorageFailure(e)
        }
    }
}
