//! Property-based tests: random sequences of moves, creates and deletes keep the
//! board consistent and agree with a plain in-memory model of the board.

use db::{
    ReorderError,
    models::{list::CreateList, task::CreateTask},
    test_utils::Fixture,
};
use proptest::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Create { list: usize },
    Delete { task: usize },
    ToEnd { task: usize, list: usize },
    Within { task: usize, target: usize },
    Before { task: usize, target: usize },
    MoveList { list: usize, target: usize },
    CreateList,
    DeleteList { list: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..8).prop_map(|list| Op::Create { list }),
        2 => (0usize..16).prop_map(|task| Op::Delete { task }),
        3 => (0usize..16, 0usize..8).prop_map(|(task, list)| Op::ToEnd { task, list }),
        3 => (0usize..16, 0usize..16).prop_map(|(task, target)| Op::Within { task, target }),
        3 => (0usize..16, 0usize..16).prop_map(|(task, target)| Op::Before { task, target }),
        2 => (0usize..8, 0usize..8).prop_map(|(list, target)| Op::MoveList { list, target }),
        1 => Just(Op::CreateList),
        1 => (0usize..8).prop_map(|list| Op::DeleteList { list }),
    ]
}

#[derive(Debug)]
struct ModelList {
    id: Uuid,
    title: String,
    tasks: Vec<(Uuid, String)>,
}

/// The board as plain vectors, in display order.
#[derive(Debug)]
struct Model {
    lists: Vec<ModelList>,
    created: usize,
    created_lists: usize,
}

impl Model {
    fn from_fixture(fixture: &Fixture) -> Self {
        let lists = fixture
            .lists
            .iter()
            .zip(&fixture.tasks)
            .map(|(list, tasks)| ModelList {
                id: list.id,
                title: list.title.clone(),
                tasks: tasks.iter().map(|t| (t.id, t.title.clone())).collect(),
            })
            .collect();
        Self {
            lists,
            created: 0,
            created_lists: 0,
        }
    }

    fn task_ids(&self) -> Vec<Uuid> {
        self.lists
            .iter()
            .flat_map(|l| l.tasks.iter().map(|(id, _)| *id))
            .collect()
    }

    fn locate(&self, task: Uuid) -> (usize, usize) {
        self.lists
            .iter()
            .enumerate()
            .find_map(|(li, l)| {
                l.tasks
                    .iter()
                    .position(|(id, _)| *id == task)
                    .map(|ti| (li, ti))
            })
            .expect("task is in the model")
    }

    fn take(&mut self, task: Uuid) -> (Uuid, String) {
        let (li, ti) = self.locate(task);
        self.lists[li].tasks.remove(ti)
    }

    fn layout(&self) -> (Vec<String>, Vec<Vec<String>>) {
        (
            self.lists.iter().map(|l| l.title.clone()).collect(),
            self.lists
                .iter()
                .map(|l| l.tasks.iter().map(|(_, t)| t.clone()).collect())
                .collect(),
        )
    }
}

/// Apply `op` to the engine and the model. Returns false if the engine and the
/// model disagree on whether the operation is allowed.
async fn apply(fixture: &Fixture, model: &mut Model, op: &Op) -> bool {
    let service = &fixture.service;
    if model.lists.is_empty() && !matches!(op, Op::CreateList) {
        return true;
    }
    let ids = model.task_ids();
    let pick = |slot: usize| ids.get(slot % ids.len().max(1)).copied();
    let list_at = |slot: usize, model: &Model| model.lists[slot % model.lists.len()].id;

    let (result, allowed) = match *op {
        Op::Create { list } => {
            let list_index = list % model.lists.len();
            model.created += 1;
            let title = format!("P{}", model.created);
            let task = service
                .create_task(
                    model.lists[list_index].id,
                    &CreateTask::from_title_description(title.clone(), None),
                )
                .await;
            match task {
                Ok(task) => {
                    model.lists[list_index].tasks.push((task.id, title));
                    (Ok(()), true)
                }
                Err(e) => (Err(e), true),
            }
        }
        Op::Delete { task } => {
            let Some(task) = pick(task) else { return true };
            let result = service.delete_task(task).await;
            if result.is_ok() {
                model.take(task);
            }
            (result, true)
        }
        Op::ToEnd { task, list } => {
            let Some(task) = pick(task) else { return true };
            let list_id = list_at(list, model);
            let result = service.move_task_to_list_end(task, list_id).await;
            if result.is_ok() {
                let entry = model.take(task);
                let destination = model
                    .lists
                    .iter_mut()
                    .find(|l| l.id == list_id)
                    .expect("list is in the model");
                destination.tasks.push(entry);
            }
            (result, true)
        }
        Op::Within { task, target } => {
            let (Some(task), Some(target)) = (pick(task), pick(target)) else {
                return true;
            };
            let (la, ia) = model.locate(task);
            let (lb, ib) = model.locate(target);
            let allowed = la == lb;
            let result = service.move_task_within_list(task, target).await;
            if allowed && result.is_ok() {
                let entry = model.lists[la].tasks.remove(ia);
                model.lists[la].tasks.insert(ib, entry);
            }
            (result, allowed)
        }
        Op::Before { task, target } => {
            let (Some(task), Some(target)) = (pick(task), pick(target)) else {
                return true;
            };
            let (la, _) = model.locate(task);
            let (lb, _) = model.locate(target);
            let allowed = task != target && la != lb;
            let result = service.move_task_to_list_before_task(task, target).await;
            if allowed && result.is_ok() {
                let entry = model.take(task);
                let (_, ib) = model.locate(target);
                model.lists[lb].tasks.insert(ib, entry);
            }
            (result, allowed)
        }
        Op::MoveList { list, target } => {
            let from = list % model.lists.len();
            let to = target % model.lists.len();
            let result = service
                .move_list(model.lists[from].id, model.lists[to].id)
                .await;
            if result.is_ok() {
                let entry = model.lists.remove(from);
                model.lists.insert(to, entry);
            }
            (result, true)
        }
        Op::CreateList => {
            model.created_lists += 1;
            let title = format!("N{}", model.created_lists);
            match service
                .create_list(fixture.board.id, &CreateList::new(title.clone()))
                .await
            {
                Ok(list) => {
                    model.lists.push(ModelList {
                        id: list.id,
                        title,
                        tasks: Vec::new(),
                    });
                    (Ok(()), true)
                }
                Err(e) => (Err(e), true),
            }
        }
        Op::DeleteList { list } => {
            let index = list % model.lists.len();
            let result = service.delete_list(model.lists[index].id).await;
            if result.is_ok() {
                model.lists.remove(index);
            }
            (result, true)
        }
    };

    match (allowed, result) {
        (true, Ok(())) => true,
        (false, Err(ReorderError::InvalidMove(_))) => true,
        (_, outcome) => {
            eprintln!("{op:?}: allowed={allowed}, engine returned {outcome:?}");
            false
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_random_operations_preserve_invariants(
        ops in prop::collection::vec(op_strategy(), 1..40)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (agreed, expected, actual) = runtime.block_on(async {
            let fixture = Fixture::new(&[5, 5]).await;
            let mut model = Model::from_fixture(&fixture);

            for op in &ops {
                if !apply(&fixture, &mut model, op).await {
                    return (false, model.layout(), (Vec::new(), Vec::new()));
                }
                fixture.assert_consistent().await;
            }

            let actual = (fixture.list_order().await, fixture.layout().await);
            (true, model.layout(), actual)
        });

        prop_assert!(agreed, "engine and model disagreed on an operation");
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_move_then_move_back_is_identity(
        from in 1usize..=6,
        to in 1usize..=6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (before, after) = runtime.block_on(async {
            let fixture = Fixture::new(&[6]).await;
            let before = fixture.layout().await;
            let moved = fixture.task(0, from);

            // Move onto the task at `to`, then back onto whatever now holds `from`.
            fixture
                .service
                .move_task_within_list(moved, fixture.task(0, to))
                .await
                .unwrap();
            let snapshot = fixture.service.board_snapshot(fixture.board.id).await.unwrap();
            let back = snapshot.lists[0].tasks[from - 1].id;
            fixture.service.move_task_within_list(moved, back).await.unwrap();

            fixture.assert_consistent().await;
            (before, fixture.layout().await)
        });

        prop_assert_eq!(after, before);
    }
}
