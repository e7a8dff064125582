use dashmap::DashMap;
use evalexpr::{
    build_operator_tree, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext,
    Node as EvalNode,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::expr::{EvalError, Evaluator};

/// `evalexpr`-backed evaluator.
///
/// The data document is flattened into evalexpr variables: top-level keys become
/// identifiers, nested object members are reachable as `parent.child`, JSON arrays
/// become tuples and `null` becomes the empty value.
#[derive(Debug, Default)]
pub struct ExprEvaluator {
    // Compiled operator trees, keyed by query text
    compiled: DashMap<String, EvalNode<DefaultNumericTypes>>,
}

impl ExprEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, query: &str) -> Result<EvalNode<DefaultNumericTypes>, EvalError> {
        if let Some(node) = self.compiled.get(query) {
            return Ok(node.value().clone());
        }
        let node = build_operator_tree::<DefaultNumericTypes>(query).map_err(|e| EvalError::Parse {
            query: query.to_string(),
            message: e.to_string(),
        })?;
        self.compiled.insert(query.to_string(), node.clone());
        Ok(node)
    }

    fn eval_raw(&self, query: &str, context: &Value) -> Result<evalexpr::Value<DefaultNumericTypes>, EvalError> {
        let node = self.compile(query)?;
        let ctx = build_context(context);
        node.eval_with_context(&ctx).map_err(|e| EvalError::Runtime {
            query: query.to_string(),
            message: e.to_string(),
        })
    }
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, query: &str, context: &Value) -> Result<Value, EvalError> {
        Ok(to_json(self.eval_raw(query, context)?))
    }

    fn evaluate_boolean(&self, query: &str, context: &Value) -> Result<bool, EvalError> {
        match self.eval_raw(query, context)? {
            evalexpr::Value::Boolean(b) => Ok(b),
            other => Err(EvalError::Type {
                query: query.to_string(),
                expected: "boolean",
                found: other.to_string(),
            }),
        }
    }

    fn evaluate_list(&self, query: &str, context: &Value) -> Result<Vec<Value>, EvalError> {
        match self.eval_raw(query, context)? {
            evalexpr::Value::Tuple(items) => Ok(items.into_iter().map(to_json).collect()),
            evalexpr::Value::Empty => Ok(Vec::new()),
            single => Ok(vec![to_json(single)]),
        }
    }

    fn check_syntax(&self, query: &str) -> Result<(), EvalError> {
        self.compile(query).map(|_| ())
    }
}

fn build_context(document: &Value) -> HashMapContext<DefaultNumericTypes> {
    let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
    if let Value::Object(map) = document {
        for (k, v) in map {
            bind(&mut ctx, k.clone(), v);
        }
    }
    ctx
}

fn bind(ctx: &mut HashMapContext<DefaultNumericTypes>, name: String, value: &Value) {
    if let Value::Object(members) = value {
        for (k, v) in members {
            bind(ctx, format!("{}.{}", name, k), v);
        }
        return;
    }
    if let Some(ev) = to_eval(value) {
        // A dotted top-level key can collide with a flattened nested one; a type clash keeps the earlier binding.
        if let Err(e) = ctx.set_value(name.clone(), ev) {
            warn!(variable = %name, error = %e, "variable not bound");
        }
    }
}

fn to_eval(value: &Value) -> Option<evalexpr::Value<DefaultNumericTypes>> {
    match value {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(evalexpr::Value::Int(i))
            } else {
                n.as_f64().map(evalexpr::Value::Float)
            }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        Value::Array(items) => Some(evalexpr::Value::Tuple(items.iter().filter_map(to_eval).collect())),
        Value::Null => Some(evalexpr::Value::Empty),
        // Nested objects are flattened by `bind`; inside tuples they have no representation.
        Value::Object(_) => None,
    }
}

fn to_json(value: evalexpr::Value<DefaultNumericTypes>) -> Value {
    match value {
        evalexpr::Value::String(s) => Value::String(s),
        evalexpr::Value::Int(i) => json!(i),
        evalexpr::Value::Float(f) => json!(f),
        evalexpr::Value::Boolean(b) => Value::Bool(b),
        evalexpr::Value::Tuple(items) => Value::Array(items.into_iter().map(to_json).collect()),
        evalexpr::Value::Empty => Value::Null,
    }
}
