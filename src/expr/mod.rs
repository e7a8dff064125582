//! Query evaluation against case data documents.
//!
//! Every data document in the engine is a JSON object (`serde_json::Value`).
//! Predicates, extraction queries and list queries are strings handed to an
//! [`Evaluator`]; [`Evaluation`] layers the engine's failure policy on top.

pub mod eval;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use thiserror::Error;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

pub use eval::ExprEvaluator;

/// Queries carrying this prefix are resolved by an external data gateway and
/// are never parsed locally.
pub const EXTERNAL_PREFIX: &str = "#external:";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("cannot parse '{query}': {message}")]
    Parse { query: String, message: String },
    #[error("cannot evaluate '{query}': {message}")]
    Runtime { query: String, message: String },
    #[error("'{query}' produced {found}, expected {expected}")]
    Type {
        query: String,
        expected: &'static str,
        found: String,
    },
}

/// 表达式求值接口
pub trait Evaluator: Send + Sync + Debug {
    /// Extract a value. `Value::Null` means the query selected nothing.
    fn evaluate(&self, query: &str, context: &Value) -> Result<Value, EvalError>;
    fn evaluate_boolean(&self, query: &str, context: &Value) -> Result<bool, EvalError>;
    fn evaluate_list(&self, query: &str, context: &Value) -> Result<Vec<Value>, EvalError>;
    fn check_syntax(&self, query: &str) -> Result<(), EvalError>;
}

/// What happens when a predicate, extraction or list query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPolicy {
    /// Substitute false / absent / empty and carry on.
    #[default]
    FailOpen,
    /// Propagate the failure as [`EngineError::Evaluation`].
    Strict,
}

/// A query result, flagged when the policy substituted a default for a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Evaluated<T> {
    fn exact(value: T) -> Self {
        Self { value, defaulted: false }
    }
}

/// An evaluator bound to a policy and to the task on whose behalf it runs.
pub struct Evaluation<'a> {
    evaluator: &'a dyn Evaluator,
    policy: EvaluationPolicy,
    task: &'a str,
}

impl<'a> Evaluation<'a> {
    pub fn new(evaluator: &'a dyn Evaluator, policy: EvaluationPolicy, task: &'a str) -> Self {
        Self { evaluator, policy, task }
    }

    pub fn predicate(&self, query: &str, context: &Value) -> EngineResult<Evaluated<bool>> {
        match self.evaluator.evaluate_boolean(query, context) {
            Ok(v) => Ok(Evaluated::exact(v)),
            Err(e) => self.fallback(query, e, false),
        }
    }

    pub fn extract(&self, query: &str, context: &Value) -> EngineResult<Evaluated<Option<Value>>> {
        match self.evaluator.evaluate(query, context) {
            Ok(Value::Null) => Ok(Evaluated::exact(None)),
            Ok(v) => Ok(Evaluated::exact(Some(v))),
            Err(e) => self.fallback(query, e, None),
        }
    }

    pub fn list(&self, query: &str, context: &Value) -> EngineResult<Evaluated<Vec<Value>>> {
        match self.evaluator.evaluate_list(query, context) {
            Ok(v) => Ok(Evaluated::exact(v)),
            Err(e) => self.fallback(query, e, Vec::new()),
        }
    }

    /// Integer-valued queries (instance bounds, thresholds) always propagate failures.
    pub fn count(&self, query: &str, context: &Value) -> EngineResult<usize> {
        let value = self
            .evaluator
            .evaluate(query, context)
            .map_err(|source| self.error(query, source))?;
        as_count(&value).ok_or_else(|| {
            self.error(
                query,
                EvalError::Type {
                    query: query.to_string(),
                    expected: "non-negative integer",
                    found: value.to_string(),
                },
            )
        })
    }

    fn fallback<T>(&self, query: &str, source: EvalError, default: T) -> EngineResult<Evaluated<T>> {
        match self.policy {
            EvaluationPolicy::Strict => Err(self.error(query, source)),
            EvaluationPolicy::FailOpen => {
                warn!(task = %self.task, query = %query, error = %source, "query failed, substituting default");
                Ok(Evaluated { value: default, defaulted: true })
            }
        }
    }

    fn error(&self, query: &str, source: EvalError) -> EngineError {
        EngineError::Evaluation {
            task: self.task.to_string(),
            query: query.to_string(),
            source,
        }
    }
}

fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Merge `overlay` into a copy of the object `base`.
pub fn overlay(base: &Value, overlay: impl IntoIterator<Item = (String, Value)>) -> Value {
    let mut doc = match base {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    for (k, v) in overlay {
        doc.insert(k, v);
    }
    Value::Object(doc)
}
