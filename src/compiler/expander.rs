use std::collections::{BTreeSet, HashSet};

use crate::dsl::{CancelRef, ConditionSpec, NetSpec};

/// Id of the implicit condition placed between two directly connected tasks.
pub fn implicit_condition_id(source: &str, destination: &str) -> String {
    format!("c{{{}_{}}}", source, destination)
}

/// A [`NetSpec`] in which every flow of every task points at a condition.
pub struct ExpandedNet {
    pub spec: NetSpec,
    /// Conditions introduced by the expansion.
    pub implicit: BTreeSet<String>,
}

pub struct Expander {}

impl Default for Expander {
    fn default() -> Self {
        Self::new()
    }
}

impl Expander {
    pub fn new() -> Self {
        Self {}
    }

    /// Rewrites task-to-task flows through implicit conditions and resolves
    /// implicit cancellation references to condition ids.
    pub fn expand(&self, mut spec: NetSpec) -> ExpandedNet {
        let task_ids: HashSet<String> = spec.tasks.iter().map(|t| t.id.clone()).collect();
        let mut implicit = BTreeSet::new();
        let mut inserted = Vec::new();

        for task in &mut spec.tasks {
            for flow in &mut task.flows_into {
                if !task_ids.contains(&flow.to) {
                    continue;
                }
                let id = implicit_condition_id(&task.id, &flow.to);
                if implicit.insert(id.clone()) {
                    inserted.push(ConditionSpec {
                        id: id.clone(),
                        name: None,
                        flows_into: vec![flow.to.clone()],
                    });
                }
                flow.to = id;
            }
            for entry in &mut task.remove_tokens {
                if let CancelRef::Implicit { source, destination } = entry {
                    let id = implicit_condition_id(source, destination);
                    *entry = CancelRef::Element { id };
                }
            }
        }

        spec.conditions.extend(inserted);
        ExpandedNet { spec, implicit }
    }
}
