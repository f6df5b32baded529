//! Position allocation for 1-based, contiguous sibling sequences.
//!
//! Everything here is pure: callers load the full sibling set inside their
//! transaction, ask for a [`Shift`], apply it, and persist the returned changes.
//! A move across containers is a removal shift in the source followed by an
//! insertion shift in the destination.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("position {position} is outside 1..={len}")]
    OutOfRange { position: i64, len: i64 },
    #[error("sibling positions are not contiguous from 1: {0:?}")]
    NotContiguous(Vec<i64>),
    #[error("shift would move {id} to position {position}")]
    BelowOne { id: Uuid, position: i64 },
    #[error("counter says {counter} items but {actual} are linked")]
    CountMismatch { counter: i64, actual: i64 },
}

/// An item and its current position within one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Sibling {
    pub id: Uuid,
    pub position: i64,
}

/// A new position for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChange {
    pub id: Uuid,
    pub position: i64,
}

/// Add `delta` to every position in `from..=to` (`to = None` is unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub from: i64,
    pub to: Option<i64>,
    pub delta: i64,
}

impl Shift {
    pub fn contains(&self, position: i64) -> bool {
        position >= self.from && self.to.is_none_or(|to| position <= to)
    }

    /// Shift `siblings`, skipping `exclude`, and return only the rows that changed.
    pub fn apply(
        &self,
        siblings: &[Sibling],
        exclude: Option<Uuid>,
    ) -> Result<Vec<PositionChange>, PositionError> {
        let mut changes = Vec::new();
        for sibling in siblings {
            if Some(sibling.id) == exclude || !self.contains(sibling.position) {
                continue;
            }
            let position = sibling.position + self.delta;
            if position < 1 {
                return Err(PositionError::BelowOne {
                    id: sibling.id,
                    position,
                });
            }
            changes.push(PositionChange {
                id: sibling.id,
                position,
            });
        }
        Ok(changes)
    }
}

/// Moving from `old` to a larger `new`: `(old, new]` slides down by one.
pub fn shift_for_move_forward(old: i64, new: i64) -> Shift {
    debug_assert!(new > old);
    Shift {
        from: old + 1,
        to: Some(new),
        delta: -1,
    }
}

/// Moving from `old` to a smaller `new`: `[new, old)` slides up by one.
pub fn shift_for_move_backward(old: i64, new: i64) -> Shift {
    debug_assert!(new < old);
    Shift {
        from: new,
        to: Some(old - 1),
        delta: 1,
    }
}

pub fn shift_for_insert_at_end(count: i64) -> i64 {
    count + 1
}

/// Inserting at `target`: everything at or after it slides up by one.
pub fn shift_for_insert_before(target: i64) -> Shift {
    Shift {
        from: target,
        to: None,
        delta: 1,
    }
}

/// Removing the item at `removed`: everything after it slides down by one.
pub fn shift_for_removal(removed: i64) -> Shift {
    Shift {
        from: removed + 1,
        to: None,
        delta: -1,
    }
}

/// Check that `siblings` (ordered) hold exactly the positions `1..=len`.
pub fn ensure_contiguous(siblings: &[Sibling]) -> Result<(), PositionError> {
    let contiguous = siblings
        .iter()
        .enumerate()
        .all(|(index, sibling)| sibling.position == index as i64 + 1);
    if contiguous {
        Ok(())
    } else {
        Err(PositionError::NotContiguous(
            siblings.iter().map(|s| s.position).collect(),
        ))
    }
}

/// Check that a container counter agrees with the loaded sibling set.
pub fn ensure_count(counter: i64, siblings: &[Sibling]) -> Result<(), PositionError> {
    let actual = siblings.len() as i64;
    if counter == actual {
        Ok(())
    } else {
        Err(PositionError::CountMismatch { counter, actual })
    }
}

/// Full plan for moving `moved` to `new` within one container.
///
/// Returns an empty plan for a self-move. The moved row's own change comes last.
pub fn plan_move_within(
    siblings: &[Sibling],
    moved: Sibling,
    new: i64,
) -> Result<Vec<PositionChange>, PositionError> {
    let len = siblings.len() as i64;
    for position in [moved.position, new] {
        if position < 1 || position > len {
            return Err(PositionError::OutOfRange { position, len });
        }
    }

    let shift = match new.cmp(&moved.position) {
        std::cmp::Ordering::Equal => return Ok(Vec::new()),
        std::cmp::Ordering::Greater => shift_for_move_forward(moved.position, new),
        std::cmp::Ordering::Less => shift_for_move_backward(moved.position, new),
    };

    let mut changes = shift.apply(siblings, Some(moved.id))?;
    changes.push(PositionChange {
        id: moved.id,
        position: new,
    });
    Ok(changes)
}

/// Renumber `siblings` (already in desired order) to `1..=len`.
pub fn compact(siblings: &[Sibling]) -> Vec<PositionChange> {
    siblings
        .iter()
        .enumerate()
        .filter_map(|(index, sibling)| {
            let position = index as i64 + 1;
            (sibling.position != position).then_some(PositionChange {
                id: sibling.id,
                position,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn siblings(n: i64) -> Vec<Sibling> {
        (1..=n)
            .map(|position| Sibling {
                id: Uuid::new_v4(),
                position,
            })
            .collect()
    }

    fn apply(siblings: &[Sibling], changes: &[PositionChange]) -> Vec<(Uuid, i64)> {
        let mut result: Vec<(Uuid, i64)> = siblings
            .iter()
            .map(|s| {
                let position = changes
                    .iter()
                    .find(|c| c.id == s.id)
                    .map_or(s.position, |c| c.position);
                (s.id, position)
            })
            .collect();
        result.sort_by_key(|(_, position)| *position);
        result
    }

    #[test]
    fn test_move_forward_shifts_range_down() {
        let list = siblings(4);
        let changes = plan_move_within(&list, list[0], 3).unwrap();
        let after = apply(&list, &changes);

        assert_eq!(
            after.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![list[1].id, list[2].id, list[0].id, list[3].id]
        );
        assert!(!changes.iter().any(|c| c.id == list[3].id));
    }

    #[test]
    fn test_move_backward_shifts_range_up() {
        let list = siblings(5);
        let changes = plan_move_within(&list, list[3], 2).unwrap();
        let after = apply(&list, &changes);

        assert_eq!(
            after.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![list[0].id, list[3].id, list[1].id, list[2].id, list[4].id]
        );
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_self_move_is_empty_plan() {
        let list = siblings(3);
        assert!(plan_move_within(&list, list[1], 2).unwrap().is_empty());
    }

    #[test]
    fn test_move_out_of_range() {
        let list = siblings(3);
        assert_eq!(
            plan_move_within(&list, list[0], 4),
            Err(PositionError::OutOfRange { position: 4, len: 3 })
        );
    }

    #[test]
    fn test_removal_and_insert_before() {
        let list = siblings(4);
        let removal = shift_for_removal(2).apply(&list, Some(list[1].id)).unwrap();
        assert_eq!(
            removal,
            vec![
                PositionChange { id: list[2].id, position: 2 },
                PositionChange { id: list[3].id, position: 3 },
            ]
        );

        let insert = shift_for_insert_before(3).apply(&list, None).unwrap();
        assert_eq!(insert.iter().map(|c| c.position).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(shift_for_insert_at_end(4), 5);
    }

    #[test]
    fn test_shift_never_goes_below_one() {
        let list = siblings(2);
        let bad = Shift { from: 1, to: None, delta: -1 };
        assert!(matches!(
            bad.apply(&list, None),
            Err(PositionError::BelowOne { position: 0, .. })
        ));
    }

    #[test]
    fn test_ensure_contiguous() {
        let mut list = siblings(3);
        assert!(ensure_contiguous(&list).is_ok());
        assert!(ensure_contiguous(&[]).is_ok());

        list[2].position = 5;
        assert_eq!(
            ensure_contiguous(&list),
            Err(PositionError::NotContiguous(vec![1, 2, 5]))
        );
    }

    #[test]
    fn test_ensure_count() {
        let list = siblings(2);
        assert!(ensure_count(2, &list).is_ok());
        assert_eq!(
            ensure_count(3, &list),
            Err(PositionError::CountMismatch { counter: 3, actual: 2 })
        );
    }

    #[test]
    fn test_compact_only_touches_misplaced_rows() {
        let mut list = siblings(4);
        list[2].position = 7;
        list[3].position = 9;
        let changes = compact(&list);
        assert_eq!(
            changes,
            vec![
                PositionChange { id: list[2].id, position: 3 },
                PositionChange { id: list[3].id, position: 4 },
            ]
        );
    }
}
