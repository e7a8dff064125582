use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;

use crate::compiler::expander::{ExpandedNet, Expander};
use crate::dsl::{CancelRef, ConditionSpec, NetSpec, TaskSpec};
use crate::nodes::condition::{Condition, ConditionKind};
use crate::nodes::flow::{Flow, RoutingType};
use crate::nodes::mapping::Decomposition;
use crate::nodes::task::Task;
use crate::nodes::timer::TimerVariable;
use crate::runtime::net::Net;

/// Turns a [`NetSpec`] into a runnable [`Net`] template.
///
/// The compiler only rejects what it cannot build: duplicate ids, unknown
/// split/join codes, dangling flow targets and unknown decompositions.
/// Everything else is left to the verifier.
pub struct Compiler {
    decompositions: HashMap<String, Decomposition>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            decompositions: HashMap::new(),
        }
    }

    pub fn compile(&mut self, raw: NetSpec) -> Result<Net> {
        // 0. Pass 0: Expand implicit conditions
        let ExpandedNet { spec, implicit } = Expander::new().expand(raw);

        // 1. Pass 1: Index decompositions
        self.decompositions.clear();
        for decomposition in &spec.decompositions {
            if self
                .decompositions
                .insert(decomposition.id.clone(), decomposition.clone())
                .is_some()
            {
                return Err(anyhow!("Duplicate decomposition ID: {}", decomposition.id));
            }
        }

        // 2. Pass 2: Elements
        if spec.input_condition.id == spec.output_condition.id {
            return Err(anyhow!("Input and output condition share ID: {}", spec.input_condition.id));
        }
        let mut net = Net::new(spec.id.clone(), &spec.input_condition.id, &spec.output_condition.id)
            .with_name(spec.name.clone())
            .with_variables(spec.variables.clone());
        for boundary in [&spec.input_condition, &spec.output_condition] {
            net.set_condition_name(&boundary.id, boundary.name.clone())?;
        }
        for condition in &spec.conditions {
            let kind = if implicit.contains(&condition.id) {
                ConditionKind::Implicit
            } else {
                ConditionKind::Explicit
            };
            net.add_condition(Condition::new(condition.id.clone(), kind).with_name(condition.name.clone()))
                .with_context(|| format!("Duplicate element ID: {}", condition.id))?;
        }
        for task in &spec.tasks {
            let compiled = self
                .transform_task(task)
                .with_context(|| format!("Failed to compile task {}", task.id))?;
            net.add_task(compiled)
                .with_context(|| format!("Duplicate element ID: {}", task.id))?;
        }

        // 3. Pass 3: Flows
        let sources = [&spec.input_condition, &spec.output_condition]
            .into_iter()
            .chain(spec.conditions.iter());
        for condition in sources {
            self.wire_condition(&mut net, condition)?;
        }
        for task in &spec.tasks {
            for flow in &task.flows_into {
                if net.condition(&flow.to).is_none() {
                    return Err(anyhow!("Flow target not found: {} -> {}", task.id, flow.to));
                }
                let compiled = Flow {
                    target: flow.to.clone(),
                    ordering: flow.ordering,
                    predicate: flow.predicate.clone(),
                    is_default: flow.default,
                };
                net.connect_task(&task.id, compiled)?;
            }
        }

        tracing::debug!(net = %spec.id, elements = net.elements().len(), "net compiled");
        Ok(net)
    }

    fn wire_condition(&self, net: &mut Net, condition: &ConditionSpec) -> Result<()> {
        for task in &condition.flows_into {
            if net.task(task).is_none() {
                return Err(anyhow!("Flow target not found: {} -> {}", condition.id, task));
            }
            net.connect_condition(&condition.id, task)?;
        }
        Ok(())
    }

    fn transform_task(&self, spec: &TaskSpec) -> Result<Task> {
        let join: RoutingType = spec.join.parse().map_err(|e: String| anyhow!(e))?;
        let split: RoutingType = spec.split.parse().map_err(|e: String| anyhow!(e))?;
        let mut task = Task::new(spec.id.clone(), join, split).with_name(spec.name.clone());

        if let Some(id) = &spec.decomposes_to {
            let decomposition = self
                .decompositions
                .get(id)
                .ok_or_else(|| anyhow!("Decomposition not found: {}", id))?;
            task.set_decomposition(Some(decomposition.clone()));
        }
        for entry in &spec.remove_tokens {
            // The expander has already resolved implicit references.
            if let CancelRef::Element { id } = entry {
                task.add_to_cancellation_set(id);
            }
        }
        for mapping in &spec.starting_mappings {
            task.add_starting_mapping(mapping.clone());
        }
        for mapping in &spec.completion_mappings {
            task.add_completion_mapping(mapping.clone());
        }
        for mapping in &spec.enablement_mappings {
            task.add_enablement_mapping(mapping.clone());
        }
        task.set_multi_instance(spec.multi_instance.clone());
        task.set_timer(
            spec.timer
                .as_ref()
                .map(|t| TimerVariable::new(t.trigger, t.duration.clone())),
        );
        task.set_resourcing(spec.resourcing.clone());
        task.set_custom_form(spec.custom_form.clone());
        Ok(task)
    }
}
