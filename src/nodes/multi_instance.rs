use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::runtime::identifier::Identifier;
use crate::runtime::storage::{Transaction, WriteIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMode {
    /// Instance count fixed by the firing; no instances added later.
    #[default]
    Static,
    /// Instances may be added while the task is busy, up to the maximum.
    Dynamic,
}

/// Where per-instance input slices come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiInstanceInput {
    /// Pre-splitting query over case data.
    pub expression: String,
    /// Applied to the pre-split value (bound as `formal_input_param`) to obtain the list.
    pub splitting_expression: String,
    pub formal_input_param: String,
}

/// How per-instance results are joined back into the case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiInstanceOutput {
    /// The completion-mapping expression whose results accumulate per instance.
    pub output_query: String,
    /// Reduces the accumulated results, bound as `items`. Absent keeps the raw list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_query: Option<String>,
    pub result_variable: String,
}

/// Multi-instance attributes. Bounds are queries evaluated against case data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiInstanceConfig {
    pub minimum: String,
    /// Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    #[serde(default)]
    pub creation_mode: CreationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mi_input: Option<MultiInstanceInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mi_output: Option<MultiInstanceOutput>,
}

impl MultiInstanceConfig {
    pub fn new(minimum: impl Into<String>, maximum: impl Into<String>) -> Self {
        Self {
            minimum: minimum.into(),
            maximum: Some(maximum.into()),
            threshold: None,
            creation_mode: CreationMode::Static,
            mi_input: None,
            mi_output: None,
        }
    }

    pub fn threshold(mut self, query: impl Into<String>) -> Self {
        self.threshold = Some(query.into());
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.creation_mode = CreationMode::Dynamic;
        self
    }

    pub fn input(mut self, expression: &str, splitting_expression: &str, formal_input_param: &str) -> Self {
        self.mi_input = Some(MultiInstanceInput {
            expression: expression.to_string(),
            splitting_expression: splitting_expression.to_string(),
            formal_input_param: formal_input_param.to_string(),
        });
        self
    }

    pub fn output(mut self, output_query: &str, aggregate_query: Option<&str>, result_variable: &str) -> Self {
        self.mi_output = Some(MultiInstanceOutput {
            output_query: output_query.to_string(),
            aggregate_query: aggregate_query.map(str::to_string),
            result_variable: result_variable.to_string(),
        });
        self
    }

    pub fn queries(&self) -> Vec<&str> {
        let mut queries = vec![self.minimum.as_str()];
        queries.extend(self.maximum.as_deref());
        queries.extend(self.threshold.as_deref());
        if let Some(input) = &self.mi_input {
            queries.push(&input.expression);
            queries.push(&input.splitting_expression);
        }
        if let Some(output) = &self.mi_output {
            queries.extend(output.aggregate_query.as_deref());
        }
        queries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Spawned, waiting to start.
    Entered,
    Executing,
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub identifier: Identifier,
    pub state: InstanceState,
    pub cancelled: bool,
    pub input: Value,
}

/// Arena of the instances spawned by one firing.
///
/// The four counted sets are views over the arena: `active` (not cancelled),
/// `entered` (every record of this firing), `executing` and `complete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceSemaphores {
    records: BTreeMap<Identifier, InstanceRecord>,
}

impl InstanceSemaphores {
    pub fn register(&mut self, tx: &mut Transaction, task: &str, identifier: Identifier) {
        tx.record(WriteIntent::InstanceRegistered {
            task: task.to_string(),
            identifier: identifier.clone(),
        });
        self.records.insert(
            identifier.clone(),
            InstanceRecord {
                identifier,
                state: InstanceState::Entered,
                cancelled: false,
                input: Value::Null,
            },
        );
    }

    /// Drops a record entirely, as if it had never been registered.
    pub fn remove(&mut self, identifier: &Identifier) -> Option<InstanceRecord> {
        self.records.remove(identifier)
    }

    pub fn set_input(&mut self, identifier: &Identifier, input: Value) {
        if let Some(record) = self.records.get_mut(identifier) {
            record.input = input;
        }
    }

    pub fn input(&self, identifier: &Identifier) -> Option<&Value> {
        self.records.get(identifier).map(|r| &r.input)
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&InstanceRecord> {
        self.records.get(identifier)
    }

    /// Moves a live instance to `state`. Returns false if it is unknown or cancelled.
    pub fn transition(&mut self, tx: &mut Transaction, task: &str, identifier: &Identifier, state: InstanceState) -> bool {
        match self.records.get_mut(identifier) {
            Some(record) if !record.cancelled => {
                record.state = state;
                tx.record(WriteIntent::InstanceState {
                    task: task.to_string(),
                    identifier: identifier.clone(),
                    state,
                });
                true
            }
            _ => false,
        }
    }

    /// Cancels every instance that has not completed.
    pub fn cancel_unfinished(&mut self, tx: &mut Transaction, task: &str) -> usize {
        let mut cancelled = 0;
        for record in self.records.values_mut() {
            if !record.cancelled && record.state != InstanceState::Complete {
                record.cancelled = true;
                cancelled += 1;
                tx.record(WriteIntent::InstanceCancelled {
                    task: task.to_string(),
                    identifier: record.identifier.clone(),
                });
            }
        }
        cancelled
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &Identifier> {
        self.records.keys()
    }

    pub fn active(&self) -> usize {
        self.records.values().filter(|r| !r.cancelled).count()
    }

    pub fn entered(&self) -> usize {
        self.records.len()
    }

    pub fn executing(&self) -> usize {
        self.count(InstanceState::Executing)
    }

    pub fn complete(&self) -> usize {
        self.count(InstanceState::Complete)
    }

    pub fn is_executing(&self, identifier: &Identifier) -> bool {
        self.records
            .get(identifier)
            .is_some_and(|r| !r.cancelled && r.state == InstanceState::Executing)
    }

    fn count(&self, state: InstanceState) -> usize {
        self.records
            .values()
            .filter(|r| !r.cancelled && r.state == state)
            .count()
    }
}
