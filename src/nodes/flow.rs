use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};
use crate::expr::Evaluation;

/// Split or join behavior; shared by both ends of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingType {
    And,
    Xor,
    Or,
}

pub type SplitType = RoutingType;
pub type JoinType = RoutingType;

impl RoutingType {
    pub fn code(&self) -> &'static str {
        match self {
            RoutingType::And => "and",
            RoutingType::Xor => "xor",
            RoutingType::Or => "or",
        }
    }
}

impl fmt::Display for RoutingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RoutingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(RoutingType::And),
            "xor" => Ok(RoutingType::Xor),
            "or" => Ok(RoutingType::Or),
            other => Err(format!("unknown split/join code '{}'", other)),
        }
    }
}

/// An outgoing edge of a task, pointing at a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub target: String,
    /// Evaluation order for XOR/OR splits; lower goes first.
    pub ordering: Option<u32>,
    pub predicate: Option<String>,
    pub is_default: bool,
}

impl Flow {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ordering: None,
            predicate: None,
            is_default: false,
        }
    }

    pub fn when(mut self, predicate: impl Into<String>, ordering: u32) -> Self {
        self.predicate = Some(predicate.into());
        self.ordering = Some(ordering);
        self
    }

    pub fn default_flow(mut self, ordering: u32) -> Self {
        self.is_default = true;
        self.ordering = Some(ordering);
        self
    }
}

/// Flows sorted by evaluation order. Unordered flows go last, in declaration order.
pub fn in_evaluation_order(flows: &[Flow]) -> Vec<&Flow> {
    let mut sorted: Vec<&Flow> = flows.iter().collect();
    sorted.sort_by_key(|f| f.ordering.unwrap_or(u32::MAX));
    sorted
}

/// Chooses the postset flows a task's split fires, given the case data.
pub fn route<'f>(
    task: &str,
    split: SplitType,
    flows: &'f [Flow],
    evaluation: &Evaluation<'_>,
    context: &Value,
) -> EngineResult<Vec<&'f Flow>> {
    match split {
        RoutingType::And => Ok(flows.iter().collect()),
        RoutingType::Xor => {
            for flow in in_evaluation_order(flows) {
                if flow.is_default || holds(flow, evaluation, context)? {
                    return Ok(vec![flow]);
                }
            }
            Err(EngineError::invariant(task, "xor split selected no outgoing flow"))
        }
        RoutingType::Or => {
            // The default fires iff nothing matched before it in evaluation order.
            let mut fired = Vec::new();
            let mut matched = false;
            for flow in in_evaluation_order(flows) {
                if flow.is_default {
                    if !matched {
                        fired.push(flow);
                    }
                } else if holds(flow, evaluation, context)? {
                    fired.push(flow);
                    matched = true;
                }
            }
            if fired.is_empty() {
                return Err(EngineError::invariant(task, "or split selected no outgoing flow"));
            }
            Ok(fired)
        }
    }
}

fn holds(flow: &Flow, evaluation: &Evaluation<'_>, context: &Value) -> EngineResult<bool> {
    match &flow.predicate {
        Some(query) => Ok(evaluation.predicate(query, context)?.value),
        None => Ok(true),
    }
}
