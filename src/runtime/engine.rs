use anyhow::{anyhow, bail, Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actions::builtin::{AssignHandler, LogHandler};
use crate::actions::http::HttpHandler;
use crate::actions::{DecompositionHandler, WorkItem};
use crate::compiler::core::Compiler;
use crate::compiler::verifier::{Diagnostic, DiagnosticCollector, Verifier};
use crate::dsl::NetSpec;
use crate::expr::{EvaluationPolicy, Evaluator, ExprEvaluator};
use crate::nodes::mapping::{DataValidator, SchemaValidator};
use crate::runtime::identifier::Identifier;
use crate::runtime::net::Net;
use crate::runtime::storage::{InMemoryJournal, Journal, Transaction};

fn default_handler_timeout() -> u64 {
    60
}

fn default_max_ticks() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

/// Engine settings, usually read from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a single decomposition handler call.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
    /// A case still running after this many ticks is aborted.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: usize,
    #[serde(default)]
    pub evaluation_policy: EvaluationPolicy,
    /// Verify completion mappings against declared output queries.
    #[serde(default)]
    pub legacy_schema: bool,
    /// Check handler outputs against the decomposition's output parameters.
    #[serde(default = "default_true")]
    pub validate_outputs: bool,
    /// Journal to Redis instead of memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout(),
            max_ticks: default_max_ticks(),
            evaluation_policy: EvaluationPolicy::default(),
            legacy_schema: false,
            validate_outputs: true,
            redis_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize config from {}", path.display()))
    }
}

/// What became of a launched case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    pub case_id: Uuid,
    /// The output condition was reached.
    pub completed: bool,
    pub variables: BTreeMap<String, Value>,
    pub ticks: usize,
    /// Number of task firings.
    pub fired: usize,
}

pub struct Engine {
    // Compiled, verified templates; each case runs on its own clone
    nets: DashMap<String, Arc<Net>>,
    handlers: HashMap<String, Arc<dyn DecompositionHandler>>,
    journal: Arc<dyn Journal>,
    evaluator: Arc<dyn Evaluator>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::new_with_journal(Arc::new(InMemoryJournal::new()), config)
    }

    pub fn new_with_journal(journal: Arc<dyn Journal>, config: EngineConfig) -> Self {
        Self {
            nets: DashMap::new(),
            handlers: HashMap::new(),
            journal,
            evaluator: Arc::new(ExprEvaluator::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    pub fn register_handler(&mut self, handler: Arc<dyn DecompositionHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Registers `log`, `assign` and `http`.
    pub fn register_standard_handlers(&mut self) {
        self.register_handler(Arc::new(LogHandler));
        self.register_handler(Arc::new(AssignHandler::new()));
        self.register_handler(Arc::new(HttpHandler::new()));
    }

    fn compile(&self, spec: NetSpec) -> Result<Net> {
        let net = Compiler::new().compile(spec)?;
        let validator = self
            .config
            .validate_outputs
            .then(|| Arc::new(SchemaValidator) as Arc<dyn DataValidator>);
        Ok(net
            .with_evaluator(self.evaluator.clone())
            .with_policy(self.config.evaluation_policy)
            .with_validator(validator))
    }

    fn diagnose(&self, net: &Net) -> Vec<Diagnostic> {
        let mut collector = DiagnosticCollector::new();
        Verifier::new(self.evaluator.as_ref())
            .legacy_schema(self.config.legacy_schema)
            .verify_net(net, &mut collector);
        let mut diagnostics = collector.into_diagnostics();

        for task in net.tasks() {
            let Some(decomposition) = task.decomposition() else {
                continue;
            };
            match self.handlers.get(decomposition.handler_name()) {
                None => diagnostics.push(Diagnostic::new(
                    task.id(),
                    format!("no handler registered for '{}'", decomposition.handler_name()),
                )),
                Some(handler) => {
                    if let Err(e) = handler.validate(&decomposition.params) {
                        diagnostics.push(Diagnostic::new(
                            task.id(),
                            format!("invalid parameters for '{}': {}", decomposition.id, e),
                        ));
                    }
                }
            }
        }
        diagnostics.sort();
        diagnostics.dedup();
        diagnostics
    }

    /// Compiles and verifies a [`NetSpec`] without registering it.
    pub fn verify(&self, spec: NetSpec) -> Result<Vec<Diagnostic>> {
        let net = self.compile(spec)?;
        Ok(self.diagnose(&net))
    }

    /// Compiles, verifies and registers a net. Any diagnostic rejects it.
    pub fn register_net(&self, spec: NetSpec) -> Result<()> {
        let id = spec.id.clone();
        let net = self.compile(spec).with_context(|| format!("Failed to compile net {}", id))?;
        let diagnostics = self.diagnose(&net);
        if !diagnostics.is_empty() {
            let report: Vec<String> = diagnostics.iter().map(|d| format!("  {}", d)).collect();
            bail!("Net {} failed verification:\n{}", id, report.join("\n"));
        }
        info!(net = %id, "net registered");
        self.nets.insert(id, Arc::new(net));
        Ok(())
    }

    /// Runs a new case of `net_id` to completion.
    ///
    /// Every tick fires each enabled task in turn, runs its instances through
    /// their handlers and completes them, then commits the tick's transaction.
    /// The case ends when the output condition is marked or nothing is enabled.
    pub async fn launch_case(&self, net_id: &str, vars: BTreeMap<String, Value>) -> Result<CaseOutcome> {
        let template = self
            .nets
            .get(net_id)
            .map(|n| n.value().clone())
            .ok_or_else(|| anyhow!("Net not found: {}", net_id))?;
        let mut net = template.as_ref().clone();
        let case_id = Uuid::new_v4();

        let mut tx = Transaction::new();
        for (k, v) in vars {
            net.set_var(&mut tx, &k, v);
        }
        net.start_case(&mut tx, Identifier::case(case_id))?;
        tx.commit(self.journal.as_ref(), case_id).await?;
        info!(net = %net_id, case = %case_id, "case launched");

        let mut ticks = 0;
        let mut fired = 0;
        while !net.is_completed() {
            let enabled = net.enabled_tasks();
            if enabled.is_empty() {
                warn!(net = %net_id, case = %case_id, busy = ?net.busy_tasks(), "case stalled, no task enabled");
                break;
            }
            if ticks >= self.config.max_ticks {
                bail!("Case {} exceeded {} ticks", case_id, self.config.max_ticks);
            }
            ticks += 1;

            let mut tx = Transaction::new();
            for task_id in enabled {
                // An earlier firing in this tick may have taken the token.
                if !net.is_enabled(&task_id) {
                    continue;
                }
                self.run_task(&mut net, &task_id, &mut tx)
                    .await
                    .with_context(|| format!("Task {} failed in case {}", task_id, case_id))?;
                fired += 1;
            }
            let written = tx.commit(self.journal.as_ref(), case_id).await?;
            debug!(case = %case_id, tick = ticks, intents = written, "tick committed");
        }

        let completed = net.is_completed();
        info!(net = %net_id, case = %case_id, completed, ticks, fired, "case finished");
        Ok(CaseOutcome {
            case_id,
            completed,
            variables: net.data().vars().clone(),
            ticks,
            fired,
        })
    }

    async fn run_task(&self, net: &mut Net, task_id: &str, tx: &mut Transaction) -> Result<()> {
        let children = net.fire_task(task_id, tx)?;
        for child in children {
            net.start_instance(task_id, &child, tx)?;
            let output = self.execute_instance(net, task_id, &child).await?;
            if net.complete_instance(task_id, &child, &output, tx)? {
                // Exited early; the remaining instances were cancelled.
                break;
            }
        }
        Ok(())
    }

    async fn execute_instance(&self, net: &Net, task_id: &str, child: &Identifier) -> Result<Value> {
        let task = net
            .task(task_id)
            .ok_or_else(|| anyhow!("Task not found: {}", task_id))?;
        let Some(decomposition) = task.decomposition() else {
            return Ok(json!({}));
        };
        let handler = self
            .handlers
            .get(decomposition.handler_name())
            .ok_or_else(|| anyhow!("Handler not found: {}", decomposition.handler_name()))?;

        let item = WorkItem {
            task: task_id.to_string(),
            instance: child.clone(),
            input: task.instance_input(child).cloned().unwrap_or_else(|| json!({})),
            enablement: task.enablement_data().clone(),
            params: decomposition.params.clone(),
        };
        let timeout_duration = Duration::from_secs(self.config.handler_timeout_secs);
        match timeout(timeout_duration, handler.execute(&item)).await {
            Ok(result) => result.with_context(|| format!("Handler {} failed", handler.name())),
            Err(_) => Err(anyhow!("Handler {} timed out after {:?}", handler.name(), timeout_duration)),
        }
    }
}
