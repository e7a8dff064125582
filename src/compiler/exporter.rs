use std::collections::BTreeMap;

use crate::dsl::{CancelRef, ConditionSpec, FlowSpec, NetSpec, TaskSpec, TimerSpec};
use crate::nodes::condition::{Condition, ConditionKind};
use crate::nodes::mapping::Decomposition;
use crate::nodes::task::Task;
use crate::runtime::net::Net;

/// Writes a net back out as a [`NetSpec`].
///
/// Conditions, tasks and decompositions come out sorted by id and implicit
/// conditions collapse back into direct task-to-task flows, so exporting a
/// compiled export yields the same document again.
pub fn export(net: &Net) -> NetSpec {
    let boundary = |id: &str| {
        net.condition(id)
            .map(condition_spec)
            .unwrap_or_else(|| ConditionSpec::new(id))
    };

    let conditions = net
        .conditions()
        .filter(|c| c.kind() == ConditionKind::Explicit)
        .map(condition_spec)
        .collect();

    let mut decompositions: BTreeMap<String, Decomposition> = BTreeMap::new();
    let tasks = net
        .tasks()
        .map(|task| {
            if let Some(d) = task.decomposition() {
                decompositions.entry(d.id.clone()).or_insert_with(|| d.clone());
            }
            task_spec(net, task)
        })
        .collect();

    NetSpec {
        id: net.id().to_string(),
        name: net.name().map(str::to_string),
        input_condition: boundary(net.input_condition()),
        output_condition: boundary(net.output_condition()),
        variables: net.data().vars().clone(),
        conditions,
        tasks,
        decompositions: decompositions.into_values().collect(),
    }
}

fn condition_spec(condition: &Condition) -> ConditionSpec {
    ConditionSpec {
        id: condition.id().to_string(),
        name: condition.name().map(str::to_string),
        flows_into: condition.postset().to_vec(),
    }
}

/// The `(source, destination)` pair an implicit condition stands for.
fn implicit_endpoints(net: &Net, id: &str) -> Option<(String, String)> {
    let condition = net.condition(id)?;
    if condition.kind() != ConditionKind::Implicit {
        return None;
    }
    match (condition.preset(), condition.postset()) {
        ([source], [destination]) => Some((source.clone(), destination.clone())),
        _ => None,
    }
}

fn task_spec(net: &Net, task: &Task) -> TaskSpec {
    let flows_into = task
        .postset()
        .iter()
        .map(|flow| FlowSpec {
            to: implicit_endpoints(net, &flow.target)
                .map(|(_, destination)| destination)
                .unwrap_or_else(|| flow.target.clone()),
            predicate: flow.predicate.clone(),
            ordering: flow.ordering,
            default: flow.is_default,
        })
        .collect();

    let remove_tokens = task
        .cancellation_set()
        .iter()
        .map(|id| match implicit_endpoints(net, id) {
            Some((source, destination)) => CancelRef::Implicit { source, destination },
            None => CancelRef::Element { id: id.clone() },
        })
        .collect();

    TaskSpec {
        id: task.id().to_string(),
        name: task.name().map(str::to_string),
        join: task.join_type().code().to_string(),
        split: task.split_type().code().to_string(),
        flows_into,
        remove_tokens,
        decomposes_to: task.decomposition().map(|d| d.id.clone()),
        starting_mappings: task.starting_mappings().to_vec(),
        completion_mappings: task.completion_mappings().to_vec(),
        enablement_mappings: task.enablement_mappings().to_vec(),
        multi_instance: task.multi_instance().cloned(),
        timer: task.timer().map(|t| TimerSpec {
            trigger: t.trigger,
            duration: t.duration.clone(),
        }),
        resourcing: task.resourcing().cloned(),
        custom_form: task.custom_form().map(str::to_string),
    }
}
