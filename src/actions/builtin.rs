use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Debug;
use tracing::info;

use crate::actions::{DecompositionHandler, WorkItem};
use crate::expr::{overlay, Evaluator, ExprEvaluator};

/// Logs the instance input and echoes it back as the output.
#[derive(Debug)]
pub struct LogHandler;

#[async_trait]
impl DecompositionHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> Result<Value> {
        if let Some(msg) = item.params.get("msg").and_then(|v| v.as_str()) {
            info!(task = %item.task, instance = %item.instance, "[LOG] {}", msg);
        } else {
            info!(task = %item.task, instance = %item.instance, "[LOG] {}", item.input);
        }
        Ok(item.input.clone())
    }
}

/// Computes each entry of `params.outputs` (name -> expression) over the
/// instance input, overlaid with the enablement document.
#[derive(Debug, Default)]
pub struct AssignHandler {
    evaluator: ExprEvaluator,
}

impl AssignHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn outputs(params: &Value) -> Result<&Map<String, Value>> {
        params
            .get("outputs")
            .and_then(|v| v.as_object())
            .ok_or_else(|| anyhow!("Missing required parameter: outputs"))
    }
}

#[async_trait]
impl DecompositionHandler for AssignHandler {
    fn name(&self) -> &str {
        "assign"
    }

    fn validate(&self, params: &Value) -> Result<()> {
        for (name, expression) in Self::outputs(params)? {
            let expression = expression
                .as_str()
                .ok_or_else(|| anyhow!("Output '{}' must be an expression string", name))?;
            self.evaluator.check_syntax(expression)?;
        }
        Ok(())
    }

    async fn execute(&self, item: &WorkItem) -> Result<Value> {
        let context = match &item.enablement {
            Value::Object(extra) => overlay(&item.input, extra.iter().map(|(k, v)| (k.clone(), v.clone()))),
            _ => item.input.clone(),
        };
        let mut output = Map::new();
        for (name, expression) in Self::outputs(&item.params)? {
            let expression = expression
                .as_str()
                .ok_or_else(|| anyhow!("Output '{}' must be an expression string", name))?;
            let value = self.evaluator.evaluate(expression, &context)?;
            output.insert(name.clone(), value);
        }
        Ok(Value::Object(output))
    }
}
