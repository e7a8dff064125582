use serde_json::Value;
use std::collections::BTreeMap;

use crate::runtime::storage::{Transaction, WriteIntent};

/// 运行时上下文 (Runtime Context)
/// The net-level variables of one case. Predicates, starting mappings and MI
/// queries are evaluated against [`DataContext::as_document`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContext {
    vars: BTreeMap<String, Value>,
}

impl DataContext {
    pub fn new(initial: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            vars: initial.into_iter().collect(),
        }
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set_var(&mut self, tx: &mut Transaction, key: &str, value: Value) {
        tx.record(WriteIntent::VariableSet {
            name: key.to_string(),
            value: value.clone(),
        });
        self.vars.insert(key.to_string(), value);
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.vars
    }

    pub fn as_document(&self) -> Value {
        Value::Object(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
