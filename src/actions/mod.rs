use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::runtime::identifier::Identifier;

pub mod builtin;
pub mod http;

/// One spawned instance of a task, handed to its decomposition handler.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub task: String,
    pub instance: Identifier,
    /// The instance's input document, built from the starting mappings.
    pub input: Value,
    /// Values of the task's enablement mappings at firing time.
    pub enablement: Value,
    /// Static parameters of the decomposition.
    pub params: Value,
}

/// 插件接口：所有分解处理器必须实现此 Trait
///
/// The handler's output document is what the task's completion mappings read.
#[async_trait]
pub trait DecompositionHandler: Send + Sync + Debug {
    fn name(&self) -> &str;
    /// Checks a decomposition's static parameters when a net is registered.
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, item: &WorkItem) -> Result<Value>;
}
