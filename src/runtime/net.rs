use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::expr::{Evaluator, EvaluationPolicy, ExprEvaluator};
use crate::nodes::condition::{Condition, ConditionKind};
use crate::nodes::flow::Flow;
use crate::nodes::mapping::DataValidator;
use crate::nodes::task::Task;
use crate::nodes::{Cancellable, NetElement};
use crate::runtime::context::DataContext;
use crate::runtime::identifier::{Identifier, IdentifierRegistry};
use crate::runtime::or_join::{OrJoinAnalyser, ReachabilityOrJoin};
use crate::runtime::storage::Transaction;

/// Read-only view of a net, lent to a task for enablement decisions.
pub struct NetView<'a> {
    pub elements: &'a BTreeMap<String, NetElement>,
    pub data: &'a DataContext,
    pub evaluator: &'a dyn Evaluator,
    pub policy: EvaluationPolicy,
    pub or_join: &'a dyn OrJoinAnalyser,
}

impl<'a> NetView<'a> {
    pub fn condition(&self, id: &str) -> Option<&'a Condition> {
        self.elements.get(id).and_then(NetElement::as_condition)
    }

    pub fn task(&self, id: &str) -> Option<&'a Task> {
        self.elements.get(id).and_then(NetElement::as_task)
    }
}

/// Mutable access to everything in a net except the task being operated on.
pub struct NetEnv<'a> {
    pub elements: &'a mut BTreeMap<String, NetElement>,
    pub data: &'a mut DataContext,
    pub identifiers: &'a mut IdentifierRegistry,
    pub evaluator: &'a dyn Evaluator,
    pub policy: EvaluationPolicy,
    pub or_join: &'a dyn OrJoinAnalyser,
    pub validator: Option<&'a dyn DataValidator>,
}

impl<'a> NetEnv<'a> {
    pub fn view(&self) -> NetView<'_> {
        NetView {
            elements: self.elements,
            data: self.data,
            evaluator: self.evaluator,
            policy: self.policy,
            or_join: self.or_join,
        }
    }

    pub fn condition_mut(&mut self, id: &str) -> Option<&mut Condition> {
        self.elements.get_mut(id).and_then(NetElement::as_condition_mut)
    }
}

/// 工作流网 (Net)
///
/// One instance of a net carries one case: its marking, its data and the
/// execution state of its tasks. Engines keep a compiled template and clone it
/// per case.
#[derive(Debug, Clone)]
pub struct Net {
    id: String,
    name: Option<String>,
    input_condition: String,
    output_condition: String,
    elements: BTreeMap<String, NetElement>,
    data: DataContext,
    identifiers: IdentifierRegistry,
    evaluator: Arc<dyn Evaluator>,
    policy: EvaluationPolicy,
    or_join: Arc<dyn OrJoinAnalyser>,
    validator: Option<Arc<dyn DataValidator>>,
}

impl Net {
    pub fn new(id: impl Into<String>, input_condition: &str, output_condition: &str) -> Self {
        let mut elements = BTreeMap::new();
        elements.insert(
            input_condition.to_string(),
            NetElement::Condition(Condition::new(input_condition, ConditionKind::Input)),
        );
        elements.insert(
            output_condition.to_string(),
            NetElement::Condition(Condition::new(output_condition, ConditionKind::Output)),
        );
        Self {
            id: id.into(),
            name: None,
            input_condition: input_condition.to_string(),
            output_condition: output_condition.to_string(),
            elements,
            data: DataContext::default(),
            identifiers: IdentifierRegistry::new(),
            evaluator: Arc::new(ExprEvaluator::new()),
            policy: EvaluationPolicy::default(),
            or_join: Arc::new(ReachabilityOrJoin),
            validator: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_policy(mut self, policy: EvaluationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_or_join(mut self, analyser: Arc<dyn OrJoinAnalyser>) -> Self {
        self.or_join = analyser;
        self
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn DataValidator>>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_variables(mut self, vars: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.data = DataContext::new(vars);
        self
    }

    // --- Topology ---

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn input_condition(&self) -> &str {
        &self.input_condition
    }

    pub fn output_condition(&self) -> &str {
        &self.output_condition
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    pub fn policy(&self) -> EvaluationPolicy {
        self.policy
    }

    pub fn elements(&self) -> &BTreeMap<String, NetElement> {
        &self.elements
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    pub fn add_condition(&mut self, condition: Condition) -> EngineResult<()> {
        self.insert(NetElement::Condition(condition))
    }

    pub fn add_task(&mut self, task: Task) -> EngineResult<()> {
        self.insert(NetElement::Task(task))
    }

    fn insert(&mut self, element: NetElement) -> EngineResult<()> {
        let id = element.id().to_string();
        if self.elements.contains_key(&id) {
            return Err(EngineError::invariant(&id, "duplicate element id"));
        }
        self.elements.insert(id, element);
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.elements.get(id).and_then(NetElement::as_task)
    }

    pub fn condition(&self, id: &str) -> Option<&Condition> {
        self.elements.get(id).and_then(NetElement::as_condition)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.elements.values().filter_map(NetElement::as_task)
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.elements.values().filter_map(NetElement::as_condition)
    }

    fn task_mut(&mut self, id: &str) -> EngineResult<&mut Task> {
        match self.elements.get_mut(id) {
            Some(NetElement::Task(t)) => Ok(t),
            _ => Err(EngineError::ElementNotFound(format!("task '{}'", id))),
        }
    }

    fn condition_mut(&mut self, id: &str) -> EngineResult<&mut Condition> {
        self.elements
            .get_mut(id)
            .and_then(NetElement::as_condition_mut)
            .ok_or_else(|| EngineError::ElementNotFound(format!("condition '{}'", id)))
    }

    pub fn set_condition_name(&mut self, id: &str, name: Option<String>) -> EngineResult<()> {
        self.condition_mut(id)?.set_name(name);
        Ok(())
    }

    /// Wires `condition -> task`.
    pub fn connect_condition(&mut self, condition: &str, task: &str) -> EngineResult<()> {
        self.condition_mut(condition)?.add_postset(task);
        self.task_mut(task)?.add_preset(condition);
        Ok(())
    }

    /// Wires `task -> flow.target`.
    pub fn connect_task(&mut self, task: &str, flow: Flow) -> EngineResult<()> {
        self.condition_mut(&flow.target)?.add_preset(task);
        self.task_mut(task)?.add_postset(flow);
        Ok(())
    }

    // --- Case state ---

    pub fn data(&self) -> &DataContext {
        &self.data
    }

    pub fn set_var(&mut self, tx: &mut Transaction, key: &str, value: Value) {
        self.data.set_var(tx, key, value);
    }

    pub fn identifiers(&self) -> &IdentifierRegistry {
        &self.identifiers
    }

    /// Puts the case token into the input condition.
    pub fn start_case(&mut self, tx: &mut Transaction, identifier: Identifier) -> EngineResult<()> {
        let input = self.input_condition.clone();
        self.add_token(tx, &input, identifier)
    }

    pub fn add_token(&mut self, tx: &mut Transaction, condition: &str, identifier: Identifier) -> EngineResult<()> {
        self.condition_mut(condition)?.add(tx, identifier.clone());
        self.identifiers.add_location(tx, &identifier, condition);
        Ok(())
    }

    pub fn remove_token(&mut self, tx: &mut Transaction, condition: &str, identifier: &Identifier) -> EngineResult<bool> {
        let removed = self.condition_mut(condition)?.remove(tx, identifier);
        if removed {
            self.identifiers.remove_location(tx, identifier, condition);
        }
        Ok(removed)
    }

    pub fn is_completed(&self) -> bool {
        self.condition(&self.output_condition)
            .is_some_and(Condition::contains_identifier)
    }

    pub fn view(&self) -> NetView<'_> {
        NetView {
            elements: &self.elements,
            data: &self.data,
            evaluator: self.evaluator.as_ref(),
            policy: self.policy,
            or_join: self.or_join.as_ref(),
        }
    }

    // --- Token game ---

    pub fn is_enabled(&self, task: &str) -> bool {
        let view = self.view();
        view.task(task).is_some_and(|t| t.t_enabled(&view, None))
    }

    pub fn enabled_tasks(&self) -> Vec<String> {
        let view = self.view();
        self.tasks()
            .filter(|t| t.t_enabled(&view, None))
            .map(|t| t.id().to_string())
            .collect()
    }

    pub fn busy_tasks(&self) -> Vec<String> {
        self.tasks()
            .filter(|t| t.is_busy())
            .map(|t| t.id().to_string())
            .collect()
    }

    pub fn is_exit_enabled(&self, task: &str) -> bool {
        let view = self.view();
        view.task(task).is_some_and(|t| t.t_is_exit_enabled(&view))
    }

    pub fn fire_task(&mut self, task: &str, tx: &mut Transaction) -> EngineResult<Vec<Identifier>> {
        self.with_task(task, |t, env| t.t_fire(env, tx))
    }

    pub fn start_instance(&mut self, task: &str, child: &Identifier, tx: &mut Transaction) -> EngineResult<()> {
        self.task_mut(task)?.t_start(tx, child)
    }

    pub fn add_instance(&mut self, task: &str, input: Value, tx: &mut Transaction) -> EngineResult<Identifier> {
        self.with_task(task, |t, env| t.t_add_instance(env, tx, input))
    }

    pub fn complete_instance(
        &mut self,
        task: &str,
        child: &Identifier,
        output: &Value,
        tx: &mut Transaction,
    ) -> EngineResult<bool> {
        self.with_task(task, |t, env| t.t_complete(env, tx, child, output))
    }

    pub fn exit_task(&mut self, task: &str, tx: &mut Transaction) -> EngineResult<bool> {
        self.with_task(task, |t, env| t.t_exit(env, tx))
    }

    /// Purges a task or condition, as a cancellation region would.
    pub fn cancel_element(&mut self, id: &str, tx: &mut Transaction) -> EngineResult<()> {
        let element = self
            .elements
            .get_mut(id)
            .ok_or_else(|| EngineError::ElementNotFound(id.to_string()))?;
        element.cancel(tx, &mut self.identifiers);
        debug!(net = %self.id, element = %id, "element cancelled");
        Ok(())
    }

    /// Runs `f` with the task detached from the element map so it can mutate
    /// the rest of the net. The task is always put back.
    fn with_task<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Task, &mut NetEnv<'_>) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut task = match self.elements.remove(id) {
            Some(NetElement::Task(t)) => t,
            Some(other) => {
                self.elements.insert(id.to_string(), other);
                return Err(EngineError::ElementNotFound(format!("task '{}'", id)));
            }
            None => return Err(EngineError::ElementNotFound(format!("task '{}'", id))),
        };
        let result = {
            let mut env = NetEnv {
                elements: &mut self.elements,
                data: &mut self.data,
                identifiers: &mut self.identifiers,
                evaluator: self.evaluator.as_ref(),
                policy: self.policy,
                or_join: self.or_join.as_ref(),
                validator: self.validator.as_deref(),
            };
            f(&mut task, &mut env)
        };
        self.elements.insert(id.to_string(), NetElement::Task(task));
        result
    }
}
