use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;

use crate::nodes::task::Task;
use crate::runtime::identifier::Identifier;
use crate::runtime::net::NetView;

/// Decides OR-join enablement, which depends on the rest of the net.
pub trait OrJoinAnalyser: Send + Sync + Debug {
    fn or_join_enabled(&self, task: &Task, identifier: &Identifier, view: &NetView<'_>) -> bool;
}

/// Backward reachability over the current marking.
///
/// An OR-join is enabled when at least one preset condition holds the
/// identifier and no empty preset condition can still receive it: walking
/// backwards from each empty preset, no condition holding the identifier and no
/// task busy with it is found. The OR-join task itself is never traversed.
#[derive(Debug, Default)]
pub struct ReachabilityOrJoin;

impl OrJoinAnalyser for ReachabilityOrJoin {
    fn or_join_enabled(&self, task: &Task, identifier: &Identifier, view: &NetView<'_>) -> bool {
        let (marked, empty): (Vec<&String>, Vec<&String>) = task
            .preset()
            .iter()
            .partition(|c| view.condition(c).is_some_and(|c| c.contains(identifier)));
        if marked.is_empty() {
            return false;
        }
        empty
            .into_iter()
            .all(|c| !can_receive(task.id(), c, identifier, view))
    }
}

fn can_receive(or_join: &str, start: &str, identifier: &Identifier, view: &NetView<'_>) -> bool {
    let mut queue = VecDeque::from([start.to_string()]);
    let mut seen_conditions: HashSet<String> = HashSet::from([start.to_string()]);
    let mut seen_tasks: HashSet<String> = HashSet::new();

    while let Some(condition_id) = queue.pop_front() {
        let Some(condition) = view.condition(&condition_id) else {
            continue;
        };
        if condition.contains(identifier) {
            return true;
        }
        for task_id in condition.preset() {
            if task_id == or_join || !seen_tasks.insert(task_id.clone()) {
                continue;
            }
            let Some(upstream) = view.task(task_id) else {
                continue;
            };
            if upstream.current_identifier() == Some(identifier) {
                return true;
            }
            for p in upstream.preset() {
                if seen_conditions.insert(p.clone()) {
                    queue.push_back(p.clone());
                }
            }
        }
    }
    false
}
