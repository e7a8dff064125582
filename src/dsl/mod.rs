pub mod builder;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::nodes::mapping::{Decomposition, Mapping};
use crate::nodes::multi_instance::MultiInstanceConfig;
use crate::nodes::timer::TimerTrigger;

/// 原始 DSL 定义的工作流网
///
/// The serialized form of a net, as read from YAML or JSON. Flows are declared
/// on their source: conditions list the tasks they flow into, tasks list the
/// conditions (or tasks) they flow into. A task flowing directly into another
/// task gets an implicit condition at compile time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub input_condition: ConditionSpec,
    pub output_condition: ConditionSpec,
    /// Initial case variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decompositions: Vec<Decomposition>,
}

impl NetSpec {
    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ids of the tasks this condition feeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows_into: Vec<String>,
}

impl ConditionSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            flows_into: Vec::new(),
        }
    }
}

fn xor_code() -> String {
    "xor".to_string()
}

fn and_code() -> String {
    "and".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `and`, `xor` or `or`.
    #[serde(default = "xor_code")]
    pub join: String,
    #[serde(default = "and_code")]
    pub split: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows_into: Vec<FlowSpec>,
    /// The cancellation region purged when this task exits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_tokens: Vec<CancelRef>,
    /// Id of an entry in [`NetSpec::decompositions`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposes_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub starting_mappings: Vec<Mapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completion_mappings: Vec<Mapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enablement_mappings: Vec<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_instance: Option<MultiInstanceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerSpec>,
    /// Passed through untouched for an external resource service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resourcing: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_form: Option<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            join: xor_code(),
            split: and_code(),
            flows_into: Vec::new(),
            remove_tokens: Vec::new(),
            decomposes_to: None,
            starting_mappings: Vec::new(),
            completion_mappings: Vec::new(),
            enablement_mappings: Vec::new(),
            multi_instance: None,
            timer: None,
            resourcing: None,
            custom_form: None,
        }
    }
}

/// An outgoing flow of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowSpec {
    /// A condition id, or a task id for an implicit condition.
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
}

impl FlowSpec {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            to: target.into(),
            predicate: None,
            ordering: None,
            default: false,
        }
    }
}

/// A cancellation-region entry. Implicit conditions have no id in the source
/// document, so they are named by the two tasks they sit between.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CancelRef {
    Element { id: String },
    Implicit { source: String, destination: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerSpec {
    #[serde(default)]
    pub trigger: TimerTrigger,
    pub duration: String,
}
