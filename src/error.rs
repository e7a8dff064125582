use std::fmt;
use thiserror::Error;

use crate::expr::EvalError;

/// Which side of the `[min, max]` window a multi-instance count fell out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Minimum,
    Maximum,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Minimum => write!(f, "minimum"),
            Bound::Maximum => write!(f, "maximum"),
        }
    }
}

/// Errors raised by the token game itself.
///
/// Structural problems in a net are not errors: they are collected as
/// [`Diagnostic`](crate::compiler::verifier::Diagnostic)s by the verifier.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task '{task}': {message}")]
    InvariantViolation { task: String, message: String },

    #[error("task '{task}': {observed} instances violates the {bound} bound of {limit}")]
    InstanceBounds {
        task: String,
        bound: Bound,
        limit: usize,
        observed: usize,
    },

    #[error("task '{task}': binding input for instance '{instance}' failed: {message}")]
    DataBinding {
        task: String,
        instance: String,
        message: String,
    },

    #[error("task '{task}': evaluating '{query}' failed: {source}")]
    Evaluation {
        task: String,
        query: String,
        #[source]
        source: EvalError,
    },

    #[error("task '{task}': output document rejected: {message}")]
    Validation { task: String, message: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),
}

impl EngineError {
    pub fn invariant(task: &str, message: impl Into<String>) -> Self {
        EngineError::InvariantViolation {
            task: task.to_string(),
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
