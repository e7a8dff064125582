use serde_json::Value;
use std::collections::BTreeMap;

use crate::dsl::{CancelRef, ConditionSpec, FlowSpec, NetSpec, TaskSpec, TimerSpec};
use crate::nodes::flow::RoutingType;
use crate::nodes::mapping::{Decomposition, Mapping};
use crate::nodes::multi_instance::MultiInstanceConfig;
use crate::nodes::timer::TimerTrigger;

pub struct NetBuilder {
    id: String,
    name: Option<String>,
    input_condition: ConditionSpec,
    output_condition: ConditionSpec,
    variables: BTreeMap<String, Value>,
    conditions: Vec<ConditionSpec>,
    tasks: Vec<TaskSpec>,
    decompositions: Vec<Decomposition>,
}

impl NetBuilder {
    pub fn new(id: &str, input_condition: &str, output_condition: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            input_condition: ConditionSpec::new(input_condition),
            output_condition: ConditionSpec::new(output_condition),
            variables: BTreeMap::new(),
            conditions: Vec::new(),
            tasks: Vec::new(),
            decompositions: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn condition(mut self, id: &str) -> Self {
        if self.find_condition(id).is_none() {
            self.conditions.push(ConditionSpec::new(id));
        }
        self
    }

    pub fn decomposition(mut self, decomposition: Decomposition) -> Self {
        self.decompositions.push(decomposition);
        self
    }

    /// Adds `condition -> task`, declaring the condition if it is new.
    pub fn connect(mut self, condition: &str, task: &str) -> Self {
        if self.find_condition(condition).is_none() {
            self.conditions.push(ConditionSpec::new(condition));
        }
        if let Some(spec) = self.find_condition(condition) {
            if !spec.flows_into.iter().any(|t| t == task) {
                spec.flows_into.push(task.to_string());
            }
        }
        self
    }

    pub fn task(self, id: &str) -> TaskBuilder {
        TaskBuilder {
            net_builder: self,
            spec: TaskSpec::new(id),
        }
    }

    fn find_condition(&mut self, id: &str) -> Option<&mut ConditionSpec> {
        if self.input_condition.id == id {
            return Some(&mut self.input_condition);
        }
        if self.output_condition.id == id {
            return Some(&mut self.output_condition);
        }
        self.conditions.iter_mut().find(|c| c.id == id)
    }

    pub fn build(self) -> NetSpec {
        NetSpec {
            id: self.id,
            name: self.name,
            input_condition: self.input_condition,
            output_condition: self.output_condition,
            variables: self.variables,
            conditions: self.conditions,
            tasks: self.tasks,
            decompositions: self.decompositions,
        }
    }
}

pub struct TaskBuilder {
    net_builder: NetBuilder,
    spec: TaskSpec,
}

impl TaskBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.spec.name = Some(name.to_string());
        self
    }

    pub fn join(mut self, join: RoutingType) -> Self {
        self.spec.join = join.code().to_string();
        self
    }

    pub fn split(mut self, split: RoutingType) -> Self {
        self.spec.split = split.code().to_string();
        self
    }

    pub fn flow_to(mut self, target: &str) -> Self {
        self.spec.flows_into.push(FlowSpec::to(target));
        self
    }

    pub fn flow_when(mut self, target: &str, predicate: &str, ordering: u32) -> Self {
        self.spec.flows_into.push(FlowSpec {
            predicate: Some(predicate.to_string()),
            ordering: Some(ordering),
            ..FlowSpec::to(target)
        });
        self
    }

    pub fn default_flow(mut self, target: &str, ordering: u32) -> Self {
        self.spec.flows_into.push(FlowSpec {
            ordering: Some(ordering),
            default: true,
            ..FlowSpec::to(target)
        });
        self
    }

    pub fn cancels(mut self, element: &str) -> Self {
        self.spec.remove_tokens.push(CancelRef::Element { id: element.to_string() });
        self
    }

    /// Cancels the implicit condition between `source` and `destination`.
    pub fn cancels_between(mut self, source: &str, destination: &str) -> Self {
        self.spec.remove_tokens.push(CancelRef::Implicit {
            source: source.to_string(),
            destination: destination.to_string(),
        });
        self
    }

    pub fn decomposes_to(mut self, decomposition: &str) -> Self {
        self.spec.decomposes_to = Some(decomposition.to_string());
        self
    }

    pub fn starting(mut self, expression: &str, param: &str) -> Self {
        self.spec.starting_mappings.push(Mapping::new(expression, param));
        self
    }

    pub fn completion(mut self, expression: &str, variable: &str) -> Self {
        self.spec.completion_mappings.push(Mapping::new(expression, variable));
        self
    }

    pub fn enablement(mut self, expression: &str, param: &str) -> Self {
        self.spec.enablement_mappings.push(Mapping::new(expression, param));
        self
    }

    pub fn multi_instance(mut self, config: MultiInstanceConfig) -> Self {
        self.spec.multi_instance = Some(config);
        self
    }

    pub fn timer(mut self, trigger: TimerTrigger, duration: &str) -> Self {
        self.spec.timer = Some(TimerSpec {
            trigger,
            duration: duration.to_string(),
        });
        self
    }

    pub fn resourcing(mut self, resourcing: Value) -> Self {
        self.spec.resourcing = Some(resourcing);
        self
    }

    pub fn custom_form(mut self, uri: &str) -> Self {
        self.spec.custom_form = Some(uri.to_string());
        self
    }

    pub fn build(mut self) -> NetBuilder {
        self.net_builder.tasks.push(self.spec);
        self.net_builder
    }
}
