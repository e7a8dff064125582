use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// An `(expression, maps_to)` pair. For starting and enablement mappings the
/// expression reads case data and `maps_to` names a decomposition parameter;
/// for completion mappings the expression reads the decomposition output and
/// `maps_to` names a net variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub expression: String,
    pub maps_to: String,
}

impl Mapping {
    pub fn new(expression: impl Into<String>, maps_to: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            maps_to: maps_to.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// One of `string`, `integer`, `number`, `boolean`, `array`, `object`, `any`.
    #[serde(rename = "type", default = "any_type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

fn any_type() -> String {
    "any".to_string()
}

impl Parameter {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self.data_type.as_str() {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        }
    }
}

/// 分解 (Decomposition)
/// The delegated unit of work a task performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub id: String,
    /// Name of the registered handler; defaults to the decomposition id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_params: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_params: Vec<Parameter>,
    /// Declared output queries, checked against completion mappings in legacy mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_queries: Vec<String>,
}

impl Decomposition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handler: None,
            params: Value::Null,
            input_params: Vec::new(),
            output_params: Vec::new(),
            output_queries: Vec::new(),
        }
    }

    pub fn handler_name(&self) -> &str {
        self.handler.as_deref().unwrap_or(&self.id)
    }

    pub fn input_param(&self, name: &str) -> Option<&Parameter> {
        self.input_params.iter().find(|p| p.name == name)
    }
}

/// Checks a decomposition's output document before it is mapped back.
pub trait DataValidator: Send + Sync + Debug {
    fn validate(&self, decomposition: &Decomposition, output: &Value) -> Result<(), String>;
}

/// Requires every non-optional output parameter to be present with the declared type.
#[derive(Debug, Default)]
pub struct SchemaValidator;

impl DataValidator for SchemaValidator {
    fn validate(&self, decomposition: &Decomposition, output: &Value) -> Result<(), String> {
        for param in &decomposition.output_params {
            match output.get(&param.name) {
                Some(v) if !v.is_null() => {
                    if !param.accepts(v) {
                        return Err(format!(
                            "output '{}' of '{}' is not of type {}",
                            param.name, decomposition.id, param.data_type
                        ));
                    }
                }
                _ if param.optional => {}
                _ => {
                    return Err(format!(
                        "output '{}' of '{}' is missing",
                        param.name, decomposition.id
                    ));
                }
            }
        }
        Ok(())
    }
}
